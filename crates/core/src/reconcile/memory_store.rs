//! In-process CRM store for tests and dry runs.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::crm_traits::CrmStore;
use super::reconcile_model::{MessageRecord, PersonKind, PersonRecord, RecordResult};
use crate::errors::{CrmError, Error, Result};

/// One bulk update call seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCall {
    Messages(Vec<String>),
    People(PersonKind, Vec<String>),
}

#[derive(Default)]
struct StoreState {
    messages: Vec<MessageRecord>,
    people: Vec<PersonRecord>,
    connect_error: Option<String>,
    rejected_ids: HashSet<String>,
    failing_kinds: HashSet<PersonKind>,
    fail_message_queries: bool,
    connects: usize,
    updates: Vec<UpdateCall>,
}

/// [`CrmStore`] backed by vectors behind a mutex.
///
/// Domain lookups behave like a substring match on the website, so they can
/// over-match the same way a remote `LIKE` query does. Failures can be
/// injected per record, per record type or at connect time.
#[derive(Default)]
pub struct InMemoryCrmStore {
    state: Mutex<StoreState>,
}

impl InMemoryCrmStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_message(self, record: MessageRecord) -> Self {
        self.lock().messages.push(record);
        self
    }

    pub fn with_person(self, record: PersonRecord) -> Self {
        self.lock().people.push(record);
        self
    }

    /// Makes `connect` fail with an auth error.
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.lock().connect_error = Some(message.into());
        self
    }

    /// Rejects updates to the record with `id`, leaving the rest of the call intact.
    pub fn reject_update(self, id: impl Into<String>) -> Self {
        self.lock().rejected_ids.insert(id.into());
        self
    }

    /// Makes every bulk update of `kind` fail outright.
    pub fn fail_updates_for(self, kind: PersonKind) -> Self {
        self.lock().failing_kinds.insert(kind);
        self
    }

    /// Makes message lookups fail.
    pub fn fail_message_queries(self) -> Self {
        self.lock().fail_message_queries = true;
        self
    }

    pub fn message(&self, id: &str) -> Option<MessageRecord> {
        self.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn person(&self, kind: PersonKind, id: &str) -> Option<PersonRecord> {
        self.lock()
            .people
            .iter()
            .find(|p| p.kind == kind && p.id == id)
            .cloned()
    }

    pub fn update_calls(&self) -> Vec<UpdateCall> {
        self.lock().updates.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    fn people_where(&self, predicate: impl Fn(&PersonRecord) -> bool) -> Vec<PersonRecord> {
        self.lock()
            .people
            .iter()
            .filter(|p| predicate(p))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CrmStore for InMemoryCrmStore {
    async fn connect(&self) -> Result<()> {
        let mut state = self.lock();
        state.connects += 1;
        match &state.connect_error {
            Some(message) => Err(Error::Auth(message.clone())),
            None => Ok(()),
        }
    }

    async fn find_messages(&self, message_ids: &[String]) -> Result<Vec<MessageRecord>> {
        let state = self.lock();
        if state.fail_message_queries {
            return Err(CrmError::Query("message lookup unavailable".to_string()).into());
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| message_ids.contains(&m.message_id))
            .cloned()
            .collect())
    }

    async fn find_people_by_email(
        &self,
        kind: PersonKind,
        emails: &[String],
    ) -> Result<Vec<PersonRecord>> {
        Ok(self.people_where(|p| {
            p.kind == kind
                && p
                    .email
                    .as_deref()
                    .is_some_and(|e| emails.iter().any(|x| x.eq_ignore_ascii_case(e)))
        }))
    }

    async fn find_accounts_by_domain(&self, domains: &[String]) -> Result<Vec<PersonRecord>> {
        Ok(self.people_where(|p| {
            p.kind == PersonKind::Account
                && p.website.as_deref().is_some_and(|w| {
                    let w = w.to_ascii_lowercase();
                    domains.iter().any(|d| w.contains(&d.to_ascii_lowercase()))
                })
        }))
    }

    async fn find_accounts_by_id(&self, ids: &[String]) -> Result<Vec<PersonRecord>> {
        Ok(self.people_where(|p| p.kind == PersonKind::Account && ids.contains(&p.id)))
    }

    async fn update_messages(&self, records: &[MessageRecord]) -> Result<Vec<RecordResult>> {
        let mut state = self.lock();
        state
            .updates
            .push(UpdateCall::Messages(records.iter().map(|r| r.id.clone()).collect()));

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            if state.rejected_ids.contains(&record.id) {
                results.push(RecordResult::failed(&record.id, "rejected by store"));
                continue;
            }
            match state.messages.iter_mut().find(|m| m.id == record.id) {
                Some(stored) => {
                    *stored = record.clone();
                    results.push(RecordResult::ok(&record.id));
                }
                None => results.push(RecordResult::failed(&record.id, "ENTITY_IS_DELETED")),
            }
        }
        Ok(results)
    }

    async fn update_people(
        &self,
        kind: PersonKind,
        records: &[PersonRecord],
    ) -> Result<Vec<RecordResult>> {
        let mut state = self.lock();
        state.updates.push(UpdateCall::People(
            kind,
            records.iter().map(|r| r.id.clone()).collect(),
        ));
        if state.failing_kinds.contains(&kind) {
            return Err(CrmError::Remote {
                status: 503,
                message: format!("{} updates unavailable", kind),
            }
            .into());
        }

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            if state.rejected_ids.contains(&record.id) {
                results.push(RecordResult::failed(&record.id, "rejected by store"));
                continue;
            }
            match state
                .people
                .iter_mut()
                .find(|p| p.kind == kind && p.id == record.id)
            {
                Some(stored) => {
                    stored.counters = record.counters.clone();
                    results.push(RecordResult::ok(&record.id));
                }
                None => results.push(RecordResult::failed(&record.id, "ENTITY_IS_DELETED")),
            }
        }
        Ok(results)
    }
}
