//! Handler dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::SessionId;
use serde_json::Value;

use crate::envelope::MessageType;
use crate::error::SessionError;
use crate::session::Session;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation.
///
/// `Ok(payload)` is written back as `{"data": payload}`, including
/// `Value::Null`. Any `Err` terminates the session.
pub type HandlerResult = Result<Value, BoxError>;

/// Processes the decoded payload of one inbound envelope.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, data: Value, session: &Session) -> HandlerResult;
}

/// Receives session lifecycle events from the hub.
pub trait SessionListener: Send + Sync {
    /// Called once after a session has fully terminated.
    fn on_disconnect(&self, session_id: SessionId);
}

/// Collects handler registrations during startup.
#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: HashMap<MessageType, Arc<dyn Handler>>,
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl HandlerTableBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `message_type`.
    ///
    /// Registering the same tag twice is an error; callers treat it as
    /// fatal at startup.
    pub fn register(
        &mut self,
        message_type: MessageType,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, SessionError> {
        if self.handlers.contains_key(&message_type) {
            return Err(SessionError::DuplicateHandler(message_type));
        }
        self.handlers.insert(message_type, handler);
        Ok(self)
    }

    /// Adds a lifecycle listener.
    pub fn listen(&mut self, listener: Arc<dyn SessionListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Freezes the registrations.
    pub fn build(self) -> HandlerTable {
        HandlerTable {
            handlers: self.handlers,
            listeners: self.listeners,
        }
    }
}

/// Immutable mapping from message tag to handler, shared by every session.
pub struct HandlerTable {
    handlers: HashMap<MessageType, Arc<dyn Handler>>,
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl HandlerTable {
    /// Starts a new table.
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::new()
    }

    /// Looks up the handler for `message_type`.
    pub fn get(&self, message_type: MessageType) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&message_type)
    }

    /// Returns the registered tags in ascending order.
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort();
        tags
    }

    /// Delivers a disconnect event to every listener.
    pub fn notify_disconnect(&self, session_id: SessionId) {
        for listener in &self.listeners {
            listener.on_disconnect(session_id);
        }
    }
}
