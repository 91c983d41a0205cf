//! Size/timeout bounded event accumulator.
//!
//! Holds exactly one open batch. A flush detaches the open batch and resets it
//! under the same lock that appends take, so no event is seen by two flushes
//! and none is lost in between. Detached batches are handed to the
//! [`BatchHandler`] on a spawned task; accumulation continues meanwhile.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::debug;
use tokio::task::JoinHandle;

use super::batch_model::{Batch, BatchConfig, BatchHandler};
use crate::events::{EngagementEvent, EngagementSink};

struct OpenBatch {
    events: Batch,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every detach so a timer armed for an earlier batch never
    /// flushes a later one.
    epoch: u64,
}

struct Inner {
    config: BatchConfig,
    handler: Arc<dyn BatchHandler>,
    state: Mutex<OpenBatch>,
}

/// Buffers engagement events and flushes them by size or by age.
///
/// Cheap to clone; clones share the same open batch. Must be used from within
/// a Tokio runtime since appends may arm a timer task.
#[derive(Clone)]
pub struct BatchAccumulator {
    inner: Arc<Inner>,
}

impl BatchAccumulator {
    pub fn new(config: BatchConfig, handler: Arc<dyn BatchHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state: Mutex::new(OpenBatch {
                    events: Vec::new(),
                    timer: None,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Adds one event to the open batch.
    ///
    /// Flushes immediately when the size threshold is reached, otherwise arms
    /// the timeout if it isn't already pending.
    pub fn append(&self, event: EngagementEvent) {
        self.append_all(vec![event]);
    }

    /// Adds events in order. A large input may produce several full batches.
    pub fn append_all(&self, events: Vec<EngagementEvent>) {
        if events.is_empty() {
            return;
        }
        let threshold = self.inner.config.size_threshold;
        let mut full_batches = Vec::new();
        {
            let mut state = self.inner.lock();
            for event in events {
                state.events.push(event);
                if state.events.len() >= threshold {
                    full_batches.push(detach(&mut state));
                }
            }
            if !state.events.is_empty() && state.timer.is_none() {
                let epoch = state.epoch;
                state.timer = Some(spawn_timer(Arc::downgrade(&self.inner), epoch));
            }
        }
        for batch in full_batches {
            debug!("Batch size threshold reached ({} events)", batch.len());
            self.inner.dispatch(batch);
        }
    }

    /// Detaches and dispatches the open batch.
    ///
    /// No-op on an empty batch. Returns the number of events handed off.
    pub fn flush(&self) -> usize {
        let batch = {
            let mut state = self.inner.lock();
            if state.events.is_empty() {
                return 0;
            }
            detach(&mut state)
        };
        let count = batch.len();
        self.inner.dispatch(batch);
        count
    }

    /// Number of events waiting in the open batch.
    pub fn pending(&self) -> usize {
        self.inner.lock().events.len()
    }
}

impl EngagementSink for BatchAccumulator {
    fn emit(&self, event: EngagementEvent) {
        self.append(event);
    }

    fn emit_batch(&self, events: Vec<EngagementEvent>) {
        self.append_all(events);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, OpenBatch> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer expiry. Ignored if the batch it was armed for is already gone.
    fn expire(&self, epoch: u64) {
        let batch = {
            let mut state = self.lock();
            if state.epoch != epoch || state.events.is_empty() {
                return;
            }
            // We are the timer task; drop our own handle instead of aborting it.
            state.timer = None;
            detach(&mut state)
        };
        debug!("Batch timeout reached ({} events)", batch.len());
        self.dispatch(batch);
    }

    fn dispatch(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        let handler = self.handler.clone();
        tokio::spawn(async move {
            handler.handle(batch).await;
        });
    }
}

fn detach(state: &mut OpenBatch) -> Batch {
    state.epoch = state.epoch.wrapping_add(1);
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
    mem::take(&mut state.events)
}

fn spawn_timer(inner: Weak<Inner>, epoch: u64) -> JoinHandle<()> {
    let timeout = inner
        .upgrade()
        .map(|inner| inner.config.timeout)
        .unwrap_or_default();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = inner.upgrade() {
            inner.expire(epoch);
        }
    })
}
