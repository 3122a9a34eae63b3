//! Session handlers that route envelopes into the saga.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use session::{
    Handler, HandlerResult, HandlerTableBuilder, MessageType, Session, SessionError, SessionId,
    SessionListener,
};

use crate::coordinator::SagaCoordinator;
use crate::correlation::CorrelationStore;
use crate::error::SagaError;
use crate::messages::{LocateRequest, SettleRequest};
use crate::services::geocoder::Geocoder;
use crate::services::ledger::Ledger;
use crate::services::oracle::OracleNetwork;
use crate::services::signer::ServiceSigner;

/// Tag of the start-geolocation message.
pub const LOCATE: MessageType = MessageType(1);

/// Tag of the submit-signed-operation message.
pub const SETTLE: MessageType = MessageType(2);

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, SagaError> {
    serde_json::from_value(data).map_err(|e| SagaError::InvalidPayload(e.to_string()))
}

/// Phase 1 entry point.
pub struct LocateHandler<O, G, L, K>
where
    O: OracleNetwork,
    G: Geocoder,
    L: Ledger,
    K: ServiceSigner,
{
    saga: Arc<SagaCoordinator<O, G, L, K>>,
}

#[async_trait]
impl<O, G, L, K> Handler for LocateHandler<O, G, L, K>
where
    O: OracleNetwork + 'static,
    G: Geocoder + 'static,
    L: Ledger + 'static,
    K: ServiceSigner + 'static,
{
    async fn handle(&self, data: Value, session: &Session) -> HandlerResult {
        let request: LocateRequest = decode(data)?;
        self.saga.locate(session, request).await?;
        Ok(Value::Null)
    }
}

/// Phase 2 entry point.
pub struct SettleHandler<O, G, L, K>
where
    O: OracleNetwork,
    G: Geocoder,
    L: Ledger,
    K: ServiceSigner,
{
    saga: Arc<SagaCoordinator<O, G, L, K>>,
}

#[async_trait]
impl<O, G, L, K> Handler for SettleHandler<O, G, L, K>
where
    O: OracleNetwork + 'static,
    G: Geocoder + 'static,
    L: Ledger + 'static,
    K: ServiceSigner + 'static,
{
    async fn handle(&self, data: Value, session: &Session) -> HandlerResult {
        let request: SettleRequest = decode(data)?;
        self.saga.settle(session, request).await?;
        Ok(Value::Null)
    }
}

/// Drops located sagas whose session went away before phase 2.
pub struct ReleaseOnDisconnect {
    store: CorrelationStore,
}

impl ReleaseOnDisconnect {
    pub fn new(store: CorrelationStore) -> Self {
        Self { store }
    }
}

impl SessionListener for ReleaseOnDisconnect {
    fn on_disconnect(&self, session_id: SessionId) {
        self.store.release_session(session_id);
    }
}

/// Registers the saga handlers and the disconnect listener.
pub fn register_handlers<O, G, L, K>(
    saga: Arc<SagaCoordinator<O, G, L, K>>,
    builder: &mut HandlerTableBuilder,
) -> Result<(), SessionError>
where
    O: OracleNetwork + 'static,
    G: Geocoder + 'static,
    L: Ledger + 'static,
    K: ServiceSigner + 'static,
{
    builder.register(
        LOCATE,
        Arc::new(LocateHandler {
            saga: Arc::clone(&saga),
        }),
    )?;
    builder.register(
        SETTLE,
        Arc::new(SettleHandler {
            saga: Arc::clone(&saga),
        }),
    )?;
    builder.listen(Arc::new(ReleaseOnDisconnect::new(saga.store().clone())));
    Ok(())
}
