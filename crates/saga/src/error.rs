//! Saga error types.

use session::SessionError;
use thiserror::Error;

use crate::correlation::CorrelationError;

/// Errors that can occur while driving a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Inbound payload is missing a field or has the wrong shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A ledger address could not be decoded.
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    /// Correlation table rejected the operation.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// A saga step failed.
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: &'static str, reason: String },

    /// Oracle notification error.
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Reverse geocoding error.
    #[error("Geocoding error: {0}")]
    Geocoding(String),

    /// Ledger RPC error.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Writing to the client session failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub(crate) fn step(step: &'static str, reason: impl ToString) -> Self {
        SagaError::StepFailed {
            step,
            reason: reason.to_string(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
