//! Batching module - the open batch and its flush policy.

mod accumulator;
mod batch_model;

pub use accumulator::BatchAccumulator;
pub use batch_model::{Batch, BatchConfig, BatchHandler};
