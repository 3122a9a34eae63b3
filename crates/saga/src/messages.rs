//! Saga wire messages.

use common::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INITIATE: &str = "Initiate";
pub const UNSIGNED_TX: &str = "unsignedTx";
pub const SUCCESS: &str = "success";
pub const RESULT: &str = "result";
pub const ERROR: &str = "error";

pub const TIMEOUT_MESSAGE: &str = "Request timed out waiting for GPing response";

/// Status, error and result notice: `{type, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Notice {
    pub fn new(kind: &str, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.to_string(),
            payload: payload.into(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self::new(ERROR, message)
    }
}

/// Notice that must round-trip with its request id: `{type, payload, requestId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
}

/// Payload of a start-geolocation message.
#[derive(Debug, Clone, Deserialize)]
pub struct LocateRequest {
    pub ip: String,
}

/// Payload of a submit-signed-operation message.
#[derive(Debug, Clone, Deserialize)]
pub struct SettleRequest {
    #[serde(alias = "signedTransaction", alias = "signedTx")]
    pub signed_tx: String,
    #[serde(alias = "requestId")]
    pub request_id: RequestId,
}
