//! Core error types for mailpulse.
//!
//! Remote-specific failures (HTTP, SOAP faults, query errors) are converted to
//! these types by the CRM client crate so this crate stays transport-agnostic.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the engagement pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("CRM authentication failed: {0}")]
    Auth(String),

    #[error("CRM request failed: {0}")]
    Crm(#[from] CrmError),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Failures reported by a remote CRM store.
#[derive(Error, Debug)]
pub enum CrmError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status.
    #[error("Remote returned {status}: {message}")]
    Remote { status: u16, message: String },

    /// A query was rejected or its result could not be decoded.
    #[error("Query failed: {0}")]
    Query(String),

    /// No session is available; `connect` was not called or failed.
    #[error("Not connected")]
    NotConnected,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidPayload(err.to_string())
    }
}
