//! Operation-level error taxonomy.
//!
//! Validation failures are rejected synchronously to the caller before any
//! mutation; store failures on the request path surface as a failed
//! operation; scheduled tasks swallow and log failures at the task boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// No usable quote is available. Display and evaluation degrade
    /// gracefully rather than raising.
    #[error("no usable rate data available")]
    NoData,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A customer is already being served; finish them before dequeuing
    /// the next one.
    #[error("a customer is already being served")]
    ServiceBusy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
