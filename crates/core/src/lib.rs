//! Mailpulse Core - engagement events, batching, aggregation and CRM reconciliation.
//!
//! This crate holds the pipeline logic. It is transport-agnostic and defines
//! the `CrmStore` trait that the `mailpulse-crm` crate implements.

pub mod aggregate;
pub mod batch;
pub mod constants;
pub mod errors;
pub mod events;
pub mod reconcile;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
