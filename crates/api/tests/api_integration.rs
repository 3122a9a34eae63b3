//! Integration tests for the gateway's HTTP routes.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::routes::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{RequestId, SessionId};
use keystore::ServiceKeypair;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CorrelationStore, InMemoryGeocoder, InMemoryLedger, InMemoryOracleNetwork, SagaConfig,
    SagaCoordinator, WaitOutcome,
};
use serde_json::{Value, json};
use session::SessionConfig;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_state() -> (axum::Router, AppState) {
    let store = CorrelationStore::new();
    let saga = Arc::new(SagaCoordinator::new(
        store.clone(),
        InMemoryOracleNetwork::new(store),
        InMemoryGeocoder::default(),
        InMemoryLedger::new(),
        ServiceKeypair::generate(),
        SagaConfig::default(),
    ));
    let state = api::build_state(saga, SessionConfig::default()).unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn post_answer(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/gping/answer")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["live_sessions"], 0);
    assert_eq!(json["pending_sagas"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("sessions_live"));
    assert!(text.contains("correlation_entries"));
}

#[tokio::test]
async fn test_oracle_answer_wakes_waiting_saga() {
    let (app, state) = setup_with_state();
    let request_id = RequestId::new();
    let mut pending = state
        .store
        .begin_locate(request_id, SessionId::new(), "1.2.3.4")
        .unwrap();

    let body = json!({
        "requestId": request_id,
        "latitude": 37.5,
        "longitude": "127.0",
        "vaultAddress": "V"
    });
    let response = app.oneshot(post_answer(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "success");

    match pending
        .wait(Duration::from_secs(1), &CancellationToken::new())
        .await
    {
        WaitOutcome::Answered(answer) => {
            assert_eq!(answer.latitude, "37.5");
            assert_eq!(answer.longitude, "127.0");
            assert_eq!(answer.vault_address, "V");
        }
        other => panic!("expected an answer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_oracle_answer_is_not_found() {
    let (app, state) = setup_with_state();
    let request_id = RequestId::new();
    let _pending = state
        .store
        .begin_locate(request_id, SessionId::new(), "1.2.3.4")
        .unwrap();

    let body = json!({
        "request_id": request_id,
        "latitude": "1",
        "longitude": "2",
        "vault": "V"
    })
    .to_string();

    let first = app.clone().oneshot(post_answer(body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(post_answer(body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oracle_answer_for_unknown_request() {
    let (app, _) = setup_with_state();

    let body = json!({
        "requestId": RequestId::new(),
        "latitude": "1",
        "longitude": "2",
        "vaultAddress": "V"
    });
    let response = app.oneshot(post_answer(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Request not found");
}

#[tokio::test]
async fn test_oracle_answer_with_non_uuid_request_id() {
    let (app, _) = setup_with_state();

    let body = json!({
        "requestId": "not-a-uuid",
        "latitude": "1",
        "longitude": "2",
        "vaultAddress": "V"
    });
    let response = app.oneshot(post_answer(body.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Request not found");
}

#[tokio::test]
async fn test_malformed_oracle_answers_are_rejected() {
    let (app, _) = setup_with_state();

    let cases = [
        json!({"requestId": RequestId::new(), "latitude": "north", "longitude": "2", "vaultAddress": "V"}),
        json!({"requestId": RequestId::new(), "latitude": "1", "longitude": "2"}),
    ];
    for case in cases {
        let response = app.clone().oneshot(post_answer(case.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {case}");
    }

    let response = app
        .oneshot(post_answer("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_plain_get_on_session_route_is_not_upgraded() {
    let (app, _) = setup_with_state();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ws/ip-geo")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(!response.status().is_success());
}
