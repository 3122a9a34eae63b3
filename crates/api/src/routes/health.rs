//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub live_sessions: i64,
    pub pending_sagas: usize,
}

/// GET /health: returns system health status.
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        live_sessions: state.hub.live_count(),
        pending_sagas: state.store.len(),
    })
}
