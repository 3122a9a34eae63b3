//! Session layer for the geolocation settlement gateway.
//!
//! A [`Session`] is one persistent client connection. Each session runs a
//! reader and a dispatcher that share a cancellation token: the reader decodes
//! inbound [`Envelope`]s and forwards them, the dispatcher routes each one
//! through the [`HandlerTable`] and owns outbound ordering and liveness.
//! The [`Hub`] accepts sessions, tracks the live count and fans out
//! lifecycle events.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod session;
pub mod transport;

pub use common::SessionId;
pub use config::SessionConfig;
pub use dispatch::{
    BoxError, Handler, HandlerResult, HandlerTable, HandlerTableBuilder, SessionListener,
};
pub use envelope::{Envelope, MessageType, Response};
pub use error::{Result, SessionError};
pub use hub::Hub;
pub use session::{InboundFrames, Session};
pub use transport::{ChannelTransport, Transport};
