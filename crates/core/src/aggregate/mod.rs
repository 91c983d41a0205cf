//! Aggregation module - per-message and per-email views of a batch.

mod aggregate_model;
mod aggregator;

pub use aggregate_model::*;
pub use aggregator::aggregate;
