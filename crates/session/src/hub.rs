//! Session registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use common::SessionId;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::dispatch::HandlerTable;
use crate::error::SessionError;
use crate::session::{InboundFrames, Session};
use crate::transport::Transport;

/// Capacity of the acceptance queue. A full queue blocks `accept`.
pub const ACCEPT_QUEUE_CAPACITY: usize = 1000;

/// Capacity of the disconnect queue. A full queue blocks terminating sessions.
pub const DISCONNECT_QUEUE_CAPACITY: usize = 1000;

struct Accepted {
    session: Arc<Session>,
    inbound: InboundFrames,
}

/// Accepts sessions and keeps the authoritative live-session count.
///
/// A single coordination loop consumes the acceptance and disconnect queues,
/// so the count only changes in one place. Must be created inside a Tokio
/// runtime.
#[derive(Clone)]
pub struct Hub {
    connect_tx: mpsc::Sender<Accepted>,
    live: Arc<AtomicI64>,
    config: SessionConfig,
}

impl Hub {
    /// Creates a hub dispatching through `handlers` and spawns its loop.
    pub fn new(handlers: HandlerTable, config: SessionConfig) -> Self {
        let (connect_tx, connect_rx) = mpsc::channel(ACCEPT_QUEUE_CAPACITY);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(DISCONNECT_QUEUE_CAPACITY);
        let live = Arc::new(AtomicI64::new(0));

        tokio::spawn(coordinate(
            connect_rx,
            disconnect_tx,
            disconnect_rx,
            Arc::new(handlers),
            Arc::clone(&live),
        ));

        Self {
            connect_tx,
            live,
            config,
        }
    }

    /// Hands an upgraded connection to the hub.
    ///
    /// The session starts running once the coordination loop picks it up.
    pub async fn accept<S, T>(&self, inbound: S, transport: T) -> Result<Arc<Session>, SessionError>
    where
        S: Stream<Item = Result<String, SessionError>> + Send + 'static,
        T: Transport + 'static,
    {
        let session = Session::new(transport, self.config.clone());
        self.connect_tx
            .send(Accepted {
                session: Arc::clone(&session),
                inbound: inbound.boxed(),
            })
            .await
            .map_err(|_| SessionError::HubClosed)?;
        Ok(session)
    }

    /// Number of sessions currently running.
    pub fn live_count(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

async fn coordinate(
    mut connect_rx: mpsc::Receiver<Accepted>,
    disconnect_tx: mpsc::Sender<SessionId>,
    mut disconnect_rx: mpsc::Receiver<SessionId>,
    handlers: Arc<HandlerTable>,
    live: Arc<AtomicI64>,
) {
    loop {
        tokio::select! {
            accepted = connect_rx.recv() => {
                let Some(Accepted { session, inbound }) = accepted else { break };
                let count = live.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::gauge!("sessions_live").set(count as f64);
                tracing::info!(session_id = %session.id(), live = count, "session accepted");

                let handlers = Arc::clone(&handlers);
                let disconnect_tx = disconnect_tx.clone();
                tokio::spawn(async move {
                    let session_id = session.id();
                    session.run(inbound, handlers).await;
                    if disconnect_tx.send(session_id).await.is_err() {
                        tracing::warn!(%session_id, "hub gone before disconnect was recorded");
                    }
                });
            }
            Some(session_id) = disconnect_rx.recv() => {
                let count = live.fetch_sub(1, Ordering::SeqCst) - 1;
                metrics::gauge!("sessions_live").set(count as f64);
                tracing::info!(%session_id, live = count, "session disconnected");
                handlers.notify_disconnect(session_id);
            }
        }
    }
    tracing::debug!("hub coordination loop stopped");
}
