//! Folds a flushed batch into per-message and per-email views.

use super::aggregate_model::{BatchAggregates, ClickRecord};
use crate::events::{EngagementEvent, EventType};

/// Aggregates one batch. Results are batch-scoped and never merged with
/// earlier batches.
///
/// - events without a message id only touch the per-email view
/// - events with an empty email only touch the per-message view
/// - `Other` events are ignored
pub fn aggregate(batch: &[EngagementEvent]) -> BatchAggregates {
    let mut aggregates = BatchAggregates::default();

    for event in batch {
        if event.event_type == EventType::Other {
            continue;
        }

        if let Some(message_id) = event.message_id.as_deref() {
            let message = aggregates
                .by_message
                .entry(message_id.to_string())
                .or_default();
            match event.event_type {
                EventType::Open => message.opens.push(event.occurred_at),
                EventType::Click => message.clicks.push(ClickRecord {
                    occurred_at: event.occurred_at,
                    url: event.url.clone(),
                }),
                EventType::Bounce | EventType::Dropped => {
                    message.record_bounce(event.occurred_at, event.reason.clone())
                }
                EventType::Other => {}
            }
        }

        if event.email.is_empty() {
            continue;
        }
        let email = aggregates.by_email.entry(event.email.clone()).or_default();
        match event.event_type {
            EventType::Open => email.record_open(event.occurred_at),
            EventType::Click => email.record_click(event.occurred_at, event.url.clone()),
            EventType::Bounce | EventType::Dropped => {
                email.record_bounce(event.occurred_at, event.reason.clone())
            }
            EventType::Other => {}
        }
    }

    aggregates
}
