//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use super::AppState;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub app: AppState,
}

/// GET /metrics: returns Prometheus-formatted metrics.
///
/// Live session and pending saga gauges are refreshed from their owners on
/// every scrape.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    ::metrics::gauge!("sessions_live").set(state.app.hub.live_count() as f64);
    ::metrics::gauge!("correlation_entries").set(state.app.store.len() as f64);

    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.handle.render(),
    )
}
