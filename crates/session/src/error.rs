//! Session error types.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::BoxError;
use crate::envelope::MessageType;

/// Errors that terminate a session or fail a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Inbound frame is not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Decode(String),

    /// Inbound frame exceeds the configured size bound.
    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// No handler is registered for the envelope's type tag.
    #[error("No handler registered for message type {0}")]
    UnknownMessageType(MessageType),

    /// A handler was registered twice for the same type tag.
    #[error("Handler already registered for message type {0}")]
    DuplicateHandler(MessageType),

    /// A handler returned an error.
    #[error("Handler for message type {message_type} failed: {source}")]
    Handler {
        message_type: MessageType,
        #[source]
        source: BoxError,
    },

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An outbound send did not complete within the write deadline.
    #[error("Send timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The session has already been terminated.
    #[error("Session is closed")]
    Closed,

    /// The hub coordination loop is no longer running.
    #[error("Session hub is shut down")]
    HubClosed,

    /// Outbound message could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for session results.
pub type Result<T> = std::result::Result<T, SessionError>;
