use async_trait::async_trait;

use super::reconcile_model::{MessageRecord, PersonKind, PersonRecord, RecordResult};
use crate::errors::Result;

/// Trait for the remote CRM object store.
///
/// Queries return whatever the remote holds right now; reconciliation reads
/// immediately before it writes. Bulk updates report one [`RecordResult`]
/// per submitted record and must not fail as a whole because some records
/// were rejected.
#[async_trait]
pub trait CrmStore: Send + Sync {
    /// Establishes a session for the calls that follow.
    async fn connect(&self) -> Result<()>;

    /// Message records whose provider message id is in `message_ids`.
    async fn find_messages(&self, message_ids: &[String]) -> Result<Vec<MessageRecord>>;

    /// Lead or contact records whose email is in `emails`.
    async fn find_people_by_email(
        &self,
        kind: PersonKind,
        emails: &[String],
    ) -> Result<Vec<PersonRecord>>;

    /// Candidate accounts whose website mentions one of `domains`.
    ///
    /// May over-match; callers compare normalized domains themselves.
    async fn find_accounts_by_domain(&self, domains: &[String]) -> Result<Vec<PersonRecord>>;

    /// Accounts by record id.
    async fn find_accounts_by_id(&self, ids: &[String]) -> Result<Vec<PersonRecord>>;

    async fn update_messages(&self, records: &[MessageRecord]) -> Result<Vec<RecordResult>>;

    async fn update_people(
        &self,
        kind: PersonKind,
        records: &[PersonRecord],
    ) -> Result<Vec<RecordResult>>;
}
