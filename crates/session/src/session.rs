//! Session worker: reader, dispatcher and outbound framing.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::SessionId;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::context::SessionContext;
use crate::dispatch::HandlerTable;
use crate::envelope::{Envelope, Response};
use crate::error::SessionError;
use crate::transport::Transport;

/// Inbound text frames of one connection.
pub type InboundFrames = BoxStream<'static, Result<String, SessionError>>;

/// One accepted client connection.
///
/// The reader and dispatcher of a session share one cancellation token.
/// Whichever side stops first cancels it, which stops the other side and
/// unblocks any handler wait scoped to the session.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    last_send: Mutex<Instant>,
    context: SessionContext,
    cancel: CancellationToken,
}

impl Session {
    /// Creates a session around the write half of a connection.
    pub fn new(transport: impl Transport + 'static, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            config,
            transport: tokio::sync::Mutex::new(Box::new(transport)),
            last_send: Mutex::new(Instant::now()),
            context: SessionContext::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Token cancelled when the session terminates.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Terminates the session.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Time since the last successful outbound send.
    pub fn idle_for(&self) -> Duration {
        self.last_send.lock().elapsed()
    }

    /// Stores a typed context value for later handlers on this session.
    pub fn set_context<T: Any + Send + Sync>(&self, value: T) {
        self.context.set(value);
    }

    pub fn context<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.context.get()
    }

    pub fn clear_context<T: Any + Send + Sync>(&self) -> Option<T> {
        self.context.clear()
    }

    /// Serializes `message` and writes it as one text frame.
    ///
    /// A transport failure or a send exceeding the write deadline terminates
    /// the session. Sending on a closed session fails with
    /// [`SessionError::Closed`].
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let text = serde_json::to_string(message)?;

        let mut transport = self.transport.lock().await;
        match tokio::time::timeout(self.config.write_timeout, transport.send_text(text)).await {
            Ok(Ok(())) => {
                *self.last_send.lock() = Instant::now();
                Ok(())
            }
            Ok(Err(e)) => {
                self.cancel.cancel();
                Err(e)
            }
            Err(_) => {
                self.cancel.cancel();
                Err(SessionError::WriteTimeout(self.config.write_timeout))
            }
        }
    }

    /// Drives the session until it terminates.
    ///
    /// Returns after the dispatcher has stopped and the transport is closed.
    pub async fn run(self: Arc<Self>, inbound: InboundFrames, handlers: Arc<HandlerTable>) {
        let (request_tx, request_rx) = mpsc::channel(self.config.inbound_queue.max(1));
        let dispatcher = tokio::spawn(Arc::clone(&self).dispatch_loop(request_rx, handlers));

        self.read_loop(inbound, request_tx).await;
        self.cancel.cancel();

        if let Err(e) = dispatcher.await {
            tracing::error!(session_id = %self.id, error = %e, "dispatcher task failed");
        }
        self.transport.lock().await.close().await;
        tracing::info!(session_id = %self.id, "session closed");
    }

    async fn read_loop(&self, mut inbound: InboundFrames, request_tx: mpsc::Sender<Envelope>) {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return,
                frame = inbound.next() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    tracing::debug!(session_id = %self.id, error = %e, "read failed");
                    return;
                }
                None => return,
            };

            if text.len() > self.config.max_frame_bytes {
                let err = SessionError::FrameTooLarge {
                    size: text.len(),
                    limit: self.config.max_frame_bytes,
                };
                tracing::warn!(session_id = %self.id, error = %err, "dropping session");
                return;
            }

            let envelope = match Envelope::decode(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(session_id = %self.id, error = %e, "dropping session");
                    return;
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                sent = request_tx.send(envelope) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut request_rx: mpsc::Receiver<Envelope>,
        handlers: Arc<HandlerTable>,
    ) {
        let mut liveness = tokio::time::interval(self.config.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = request_rx.recv() => {
                    let Some(envelope) = request else { break };
                    if let Err(e) = self.dispatch(&handlers, envelope).await {
                        tracing::warn!(session_id = %self.id, error = %e, "dropping session");
                        break;
                    }
                }
                _ = liveness.tick() => {
                    let idle = self.idle_for();
                    if idle > self.config.idle_timeout {
                        tracing::info!(
                            session_id = %self.id,
                            idle_ms = idle.as_millis() as u64,
                            "session idle, closing"
                        );
                        break;
                    }
                }
            }
        }

        self.cancel.cancel();
    }

    async fn dispatch(
        &self,
        handlers: &HandlerTable,
        envelope: Envelope,
    ) -> Result<(), SessionError> {
        let message_type = envelope.message_type;
        let handler = handlers
            .get(message_type)
            .ok_or(SessionError::UnknownMessageType(message_type))?;

        tracing::debug!(session_id = %self.id, %message_type, "dispatching");
        let reply = handler
            .handle(envelope.data, self)
            .await
            .map_err(|source| SessionError::Handler {
                message_type,
                source,
            })?;

        self.send(&Response { data: &reply }).await
    }
}
