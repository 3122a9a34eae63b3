//! Oracle answer ingress.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use saga::{OracleAnswer, ResolveOutcome};
use serde_json::{Value, json};

use super::AppState;
use crate::error::ApiError;

/// POST /gping/answer: delivers an oracle's answer to the waiting saga.
///
/// Only the first answer for a request id is accepted; later ones, answers
/// for ids that already timed out, and ids that are not UUIDs get 404.
#[tracing::instrument(skip_all)]
pub async fn answer(
    State(state): State<AppState>,
    payload: Result<Json<OracleAnswer>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(answer) = payload.map_err(|rejection| {
        metrics::counter!("oracle_answers_total", "outcome" => "rejected").increment(1);
        ApiError::from(rejection)
    })?;

    let Some(request_id) = answer.correlation_id() else {
        metrics::counter!("oracle_answers_total", "outcome" => "not_found").increment(1);
        tracing::debug!(request_id = %answer.request_id, "oracle answer with malformed request id");
        return Err(not_found());
    };
    match state.store.resolve(request_id, answer) {
        ResolveOutcome::Delivered => {
            metrics::counter!("oracle_answers_total", "outcome" => "delivered").increment(1);
            tracing::info!(%request_id, "oracle answer delivered");
            Ok(Json(json!({ "status": "success" })))
        }
        ResolveOutcome::NotFound => {
            metrics::counter!("oracle_answers_total", "outcome" => "not_found").increment(1);
            tracing::debug!(%request_id, "oracle answer for unknown or settled request");
            Err(not_found())
        }
    }
}

fn not_found() -> ApiError {
    ApiError::NotFound("Request not found".to_string())
}
