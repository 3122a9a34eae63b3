//! Oracle broadcast client.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use common::RequestId;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;

use crate::correlation::CorrelationStore;
use crate::error::SagaError;

/// One configured geolocation oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleEndpoint {
    /// JSON-RPC endpoint that receives `_location` notifications.
    pub url: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub vault_address: String,
}

/// An oracle's out-of-band answer, posted to the ingress route.
///
/// The request id is kept as sent; an id that does not parse simply matches
/// no in-flight saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleAnswer {
    #[serde(rename = "requestId", alias = "request_id")]
    pub request_id: String,
    #[serde(deserialize_with = "coordinate")]
    pub latitude: String,
    #[serde(deserialize_with = "coordinate")]
    pub longitude: String,
    #[serde(rename = "vaultAddress", alias = "vault", alias = "vault_address")]
    pub vault_address: String,
}

impl OracleAnswer {
    /// The saga this answer is addressed to, if the id is well formed.
    pub fn correlation_id(&self) -> Option<RequestId> {
        self.request_id.parse().ok()
    }
}

/// Accepts a coordinate sent either as a JSON string or a number.
fn coordinate<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text.trim().to_string(),
        Raw::Number(number) => number.to_string(),
    };
    value
        .parse::<f64>()
        .map_err(|_| serde::de::Error::custom(format!("invalid coordinate '{value}'")))?;
    Ok(value)
}

/// Aggregated outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Fans a location query out to every oracle.
///
/// Individual endpoint failures are tolerated; only the first answer
/// matters.
#[async_trait]
pub trait OracleNetwork: Send + Sync {
    async fn broadcast(&self, ip: &str, request_id: RequestId) -> BroadcastReport;
}

/// JSON-RPC notification fan-out over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOracleNetwork {
    client: reqwest::Client,
    endpoints: Arc<[OracleEndpoint]>,
}

impl HttpOracleNetwork {
    pub fn new(endpoints: Vec<OracleEndpoint>, timeout: Duration) -> Result<Self, SagaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::Oracle(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoints: endpoints.into(),
        })
    }

    async fn notify(&self, endpoint: &OracleEndpoint, body: &serde_json::Value) -> bool {
        let result = self
            .client
            .post(&endpoint.url)
            .json(body)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        match result {
            Ok(_) => {
                metrics::counter!("oracle_notifications_total", "outcome" => "ok").increment(1);
                true
            }
            Err(e) => {
                metrics::counter!("oracle_notifications_total", "outcome" => "error").increment(1);
                tracing::debug!(url = %endpoint.url, error = %e, "oracle notification failed");
                false
            }
        }
    }
}

#[async_trait]
impl OracleNetwork for HttpOracleNetwork {
    #[tracing::instrument(skip(self), fields(endpoints = self.endpoints.len()))]
    async fn broadcast(&self, ip: &str, request_id: RequestId) -> BroadcastReport {
        let id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as i64)
            .unwrap_or_default();
        let body = json!({
            "jsonrpc": "2.0",
            "method": "_location",
            "params": { "ip": ip, "request_id": request_id },
            "id": id,
        });

        let outcomes = futures::future::join_all(
            self.endpoints
                .iter()
                .map(|endpoint| self.notify(endpoint, &body)),
        )
        .await;

        BroadcastReport {
            attempted: outcomes.len(),
            succeeded: outcomes.into_iter().filter(|ok| *ok).count(),
        }
    }
}

/// How the in-memory oracle reacts to a broadcast.
#[derive(Debug, Clone)]
pub enum OracleBehavior {
    /// Resolve the request after `delay` with the given answer fields.
    Answer {
        latitude: String,
        longitude: String,
        vault_address: String,
        delay: Duration,
    },
    /// Never answer.
    Silent,
}

#[derive(Debug)]
struct InMemoryOracleState {
    behavior: OracleBehavior,
    broadcasts: Vec<(String, RequestId)>,
}

/// In-memory oracle swarm for testing.
///
/// Answers by resolving the shared correlation store directly, the way the
/// ingress route does for a real oracle.
#[derive(Debug, Clone)]
pub struct InMemoryOracleNetwork {
    store: CorrelationStore,
    state: Arc<Mutex<InMemoryOracleState>>,
}

impl InMemoryOracleNetwork {
    /// Creates an oracle that answers immediately with a fixed location.
    pub fn new(store: CorrelationStore) -> Self {
        Self::with_behavior(
            store,
            OracleBehavior::Answer {
                latitude: "10.0".to_string(),
                longitude: "20.0".to_string(),
                vault_address: "GPingVau1t1111111111111111111111111111111111".to_string(),
                delay: Duration::ZERO,
            },
        )
    }

    pub fn with_behavior(store: CorrelationStore, behavior: OracleBehavior) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(InMemoryOracleState {
                behavior,
                broadcasts: Vec::new(),
            })),
        }
    }

    pub fn set_behavior(&self, behavior: OracleBehavior) {
        self.state.lock().behavior = behavior;
    }

    /// Returns every `(ip, request_id)` broadcast so far.
    pub fn broadcasts(&self) -> Vec<(String, RequestId)> {
        self.state.lock().broadcasts.clone()
    }
}

#[async_trait]
impl OracleNetwork for InMemoryOracleNetwork {
    async fn broadcast(&self, ip: &str, request_id: RequestId) -> BroadcastReport {
        let behavior = {
            let mut state = self.state.lock();
            state.broadcasts.push((ip.to_string(), request_id));
            state.behavior.clone()
        };

        if let OracleBehavior::Answer {
            latitude,
            longitude,
            vault_address,
            delay,
        } = behavior
        {
            let store = self.store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                store.resolve(
                    request_id,
                    OracleAnswer {
                        request_id: request_id.to_string(),
                        latitude,
                        longitude,
                        vault_address,
                    },
                );
            });
        }

        BroadcastReport {
            attempted: 1,
            succeeded: 1,
        }
    }
}
