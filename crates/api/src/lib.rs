//! HTTP and WebSocket gateway for the geolocation settlement saga.
//!
//! Clients hold a WebSocket session on `/ws/ip-geo`; oracles post their
//! answers to `/gping/answer`. Structured logging via tracing and
//! Prometheus metrics on `/metrics`.

pub mod config;
pub mod error;
pub mod routes;
pub mod sweeper;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::{Geocoder, Ledger, OracleNetwork, ServiceSigner};
use saga::{SagaCoordinator, register_handlers};
use session::{HandlerTable, Hub, SessionConfig, SessionError};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;
use routes::metrics::MetricsState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            app: state.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/ws/ip-geo", get(routes::ws::upgrade))
        .route("/gping/answer", post(routes::oracle::answer))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Registers the saga handlers and starts the session hub.
///
/// Must be called inside a Tokio runtime.
pub fn build_state<O, G, L, K>(
    saga: Arc<SagaCoordinator<O, G, L, K>>,
    session_config: SessionConfig,
) -> Result<AppState, SessionError>
where
    O: OracleNetwork + 'static,
    G: Geocoder + 'static,
    L: Ledger + 'static,
    K: ServiceSigner + 'static,
{
    let store = saga.store().clone();
    let mut builder = HandlerTable::builder();
    register_handlers(saga, &mut builder)?;
    let handlers = builder.build();
    tracing::debug!(message_types = ?handlers.message_types(), "handler table built");

    Ok(AppState {
        hub: Hub::new(handlers, session_config),
        store,
    })
}
