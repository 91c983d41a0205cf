//! Engagement event sink trait and implementations.

use std::sync::{Arc, Mutex, PoisonError};

use super::EngagementEvent;

/// Trait for receiving normalized engagement events.
///
/// The ingress endpoint emits through this trait; the batch accumulator is the
/// production implementation.
///
/// # Design Rules
///
/// - `emit()` must be fast and non-blocking (no network calls)
/// - Implementations buffer events for deferred processing
/// - Failure to emit must not affect the caller (best-effort)
pub trait EngagementSink: Send + Sync {
    /// Emit a single engagement event.
    fn emit(&self, event: EngagementEvent);

    /// Emit multiple engagement events, preserving their order.
    ///
    /// Default implementation calls `emit()` for each event.
    fn emit_batch(&self, events: Vec<EngagementEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Mock sink for testing - collects emitted events.
#[derive(Clone, Default)]
pub struct MockEngagementSink {
    events: Arc<Mutex<Vec<EngagementEvent>>>,
}

impl MockEngagementSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    pub fn events(&self) -> Vec<EngagementEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of collected events.
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EngagementSink for MockEngagementSink {
    fn emit(&self, event: EngagementEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
