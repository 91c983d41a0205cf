//! Mailpulse CRM - remote CRM client.
//!
//! Implements the `CrmStore` trait from `mailpulse-core` over the CRM's SOAP
//! login and REST data APIs.

pub mod client;
mod records;
pub mod schema;

// Re-export commonly used types
pub use client::{
    CrmClient, CrmCredentials, Session, DEFAULT_API_VERSION, DEFAULT_LOGIN_URL,
    DEFAULT_TIMEOUT_SECS,
};
pub use schema::{CounterFields, FieldMap, MessageFields};
