//! Wire envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

/// Integer tag selecting the handler for an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub i64);

impl From<i64> for MessageType {
    fn from(tag: i64) -> Self {
        Self(tag)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound wire unit: `{"type": <int>, "data": <any>}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Decodes one text frame.
    pub fn decode(frame: &str) -> Result<Self, SessionError> {
        serde_json::from_str(frame).map_err(|e| SessionError::Decode(e.to_string()))
    }
}

/// Generic outbound wire unit: `{"data": <any>}`.
#[derive(Debug, Serialize)]
pub struct Response<'a> {
    pub data: &'a Value,
}
