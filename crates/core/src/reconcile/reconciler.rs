//! Applies one flushed batch onto the CRM.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use super::crm_traits::CrmStore;
use super::message_merge::apply_message_engagement;
use super::person_resolution::resolve_targets;
use super::reconcile_model::{
    MessageRecord, PersonRecord, PrecedencePolicy, ReconcileSummary, UpdateReport,
};
use crate::aggregate::{aggregate, BatchAggregates, MessageEngagement};
use crate::batch::{Batch, BatchHandler};
use crate::errors::Result;
use crate::events::EngagementEvent;

/// Reads the remote records a batch touches, merges the batch's engagement
/// onto them and writes the changed ones back.
///
/// The message-level and person-level flows fail independently: an error in
/// one is recorded in the summary and the other still runs. Failing to
/// connect fails the whole batch.
pub struct Reconciler {
    store: Arc<dyn CrmStore>,
    policy: PrecedencePolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CrmStore>, policy: PrecedencePolicy) -> Self {
        Self { store, policy }
    }

    pub async fn reconcile(&self, batch: &[EngagementEvent]) -> Result<ReconcileSummary> {
        let aggregates = aggregate(batch);
        let mut summary = ReconcileSummary {
            events: batch.len(),
            ..Default::default()
        };
        if aggregates.is_empty() {
            debug!("Batch of {} events has nothing to reconcile", batch.len());
            return Ok(summary);
        }

        self.store.connect().await?;

        if !aggregates.by_message.is_empty() {
            if let Err(e) = self.reconcile_messages(&aggregates, &mut summary).await {
                error!("Message reconciliation failed: {}", e);
                summary.errors.push(format!("messages: {}", e));
            }
        }
        if !aggregates.by_email.is_empty() {
            if let Err(e) = self.reconcile_people(&aggregates, &mut summary).await {
                error!("Person reconciliation failed: {}", e);
                summary.errors.push(format!("people: {}", e));
            }
        }

        Ok(summary)
    }

    async fn reconcile_messages(
        &self,
        aggregates: &BatchAggregates,
        summary: &mut ReconcileSummary,
    ) -> Result<()> {
        let records = self
            .store
            .find_messages(&aggregates.message_ids())
            .await?;

        let mut by_message_id: BTreeMap<&str, MessageRecord> = BTreeMap::new();
        for record in &records {
            if by_message_id.contains_key(record.message_id.as_str()) {
                warn!(
                    "Multiple message records for {}; keeping the first, ignoring {}",
                    record.message_id, record.id
                );
                continue;
            }
            by_message_id.insert(record.message_id.as_str(), record.clone());
        }

        let mut changed = Vec::new();
        for (message_id, engagement) in &aggregates.by_message {
            match by_message_id.remove(message_id.as_str()) {
                Some(record) => {
                    if let Some(record) = merged_message(record, engagement) {
                        changed.push(record);
                    }
                }
                None => summary.unmatched_messages.push(message_id.clone()),
            }
        }
        if !summary.unmatched_messages.is_empty() {
            info!(
                "No message record for {} message id(s): {:?}",
                summary.unmatched_messages.len(),
                summary.unmatched_messages
            );
        }
        if changed.is_empty() {
            return Ok(());
        }

        let results = self.store.update_messages(&changed).await?;
        let report = UpdateReport::from_results(changed.len(), results);
        log_failures("message", &report);
        summary.message_updates = report;
        Ok(())
    }

    async fn reconcile_people(
        &self,
        aggregates: &BatchAggregates,
        summary: &mut ReconcileSummary,
    ) -> Result<()> {
        let resolved = resolve_targets(self.store.as_ref(), self.policy, &aggregates.by_email).await?;
        if !resolved.unmatched.is_empty() {
            info!(
                "{} email(s) matched no CRM record: {:?}",
                resolved.unmatched.len(),
                resolved.unmatched
            );
        }
        summary.unmatched_emails = resolved.unmatched.clone();

        for (kind, targets) in resolved.by_kind() {
            let changed: Vec<PersonRecord> = targets
                .into_iter()
                .filter_map(|(mut record, engagement)| {
                    record.counters.absorb(&engagement).then_some(record)
                })
                .collect();
            if changed.is_empty() {
                continue;
            }
            // One record type failing does not stop the others.
            match self.store.update_people(kind, &changed).await {
                Ok(results) => {
                    let report = UpdateReport::from_results(changed.len(), results);
                    log_failures(kind.as_str(), &report);
                    summary.person_updates.insert(kind, report);
                }
                Err(e) => {
                    error!("{} update failed: {}", kind, e);
                    summary.errors.push(format!("{}: {}", kind, e));
                    summary
                        .person_updates
                        .insert(kind, UpdateReport::from_results(changed.len(), Vec::new()));
                }
            }
        }
        Ok(())
    }
}

fn merged_message(mut record: MessageRecord, engagement: &MessageEngagement) -> Option<MessageRecord> {
    apply_message_engagement(&mut record, engagement).then_some(record)
}

fn log_failures(object: &str, report: &UpdateReport) {
    for failure in &report.failures {
        warn!(
            "Failed to update {} record {}: {}",
            object,
            failure.id,
            failure.errors.join("; ")
        );
    }
}

#[async_trait]
impl BatchHandler for Reconciler {
    async fn handle(&self, batch: Batch) {
        match self.reconcile(&batch).await {
            Ok(summary) => {
                let people: usize = summary.person_updates.values().map(|r| r.succeeded).sum();
                info!(
                    "Reconciled batch of {} events: {}/{} message records, {} person records updated, {} flow error(s)",
                    summary.events,
                    summary.message_updates.succeeded,
                    summary.message_updates.attempted,
                    people,
                    summary.errors.len()
                );
            }
            Err(e) => {
                error!("Dropping batch of {} events: {}", batch.len(), e);
            }
        }
    }
}
