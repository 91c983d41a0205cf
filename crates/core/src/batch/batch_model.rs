//! Batch configuration and handler contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT_MS};
use crate::events::EngagementEvent;

/// A detached, ordered group of events handed off by a flush.
pub type Batch = Vec<EngagementEvent>;

/// Flush policy for a [`super::BatchAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of buffered events that forces a flush.
    pub size_threshold: usize,
    /// Maximum time an event waits in the open batch.
    pub timeout: Duration,
}

impl BatchConfig {
    pub fn new(size_threshold: usize, timeout: Duration) -> Self {
        Self {
            // A zero threshold would never be "reached"; treat it as flush-per-event.
            size_threshold: size_threshold.max(1),
            timeout,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_BATCH_SIZE,
            Duration::from_millis(DEFAULT_BATCH_TIMEOUT_MS),
        )
    }
}

/// Receives each flushed batch.
///
/// Called on its own spawned task; several calls may be in flight at once and
/// nothing orders them. Implementations own their error reporting: there is
/// no caller to return an error to.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: Batch);
}
