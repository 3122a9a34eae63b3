//! HTTP and WebSocket route handlers.

pub mod health;
pub mod metrics;
pub mod oracle;
pub mod ws;

use saga::CorrelationStore;
use session::Hub;

/// Shared state for all stateful routes.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub store: CorrelationStore,
}
