//! End-to-end tests: a real WebSocket client against the served gateway,
//! with an HTTP oracle that answers through the ingress route.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::routing::post;
use futures::{SinkExt, StreamExt};
use keystore::ServiceKeypair;
use saga::{
    HttpOracleNetwork, InMemoryGeocoder, InMemoryLedger, OracleEndpoint, SagaConfig,
    SagaCoordinator,
};
use serde_json::{Value, json};
use session::SessionConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Oracle that answers every `_location` notification by posting back to
/// the gateway.
async fn spawn_mock_oracle(gateway: SocketAddr) -> SocketAddr {
    async fn location(State(gateway): State<SocketAddr>, Json(body): Json<Value>) -> Json<Value> {
        let request_id = body["params"]["request_id"].clone();
        tokio::spawn(async move {
            let answer = json!({
                "requestId": request_id,
                "latitude": "10.0",
                "longitude": "20.0",
                "vaultAddress": "V"
            });
            let _ = reqwest::Client::new()
                .post(format!("http://{gateway}/gping/answer"))
                .json(&answer)
                .send()
                .await;
        });
        Json(json!({ "jsonrpc": "2.0", "result": "ok", "id": body["id"] }))
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new()
        .route("/", post(location))
        .with_state(gateway);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Gateway {
    addr: SocketAddr,
    ledger: InMemoryLedger,
}

async fn spawn_gateway(with_oracle: bool, locate_deadline: Duration) -> Gateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let endpoints = if with_oracle {
        let oracle = spawn_mock_oracle(addr).await;
        vec![OracleEndpoint {
            url: format!("http://{oracle}/"),
            address: "oracle".to_string(),
            vault_address: "V".to_string(),
        }]
    } else {
        Vec::new()
    };

    let store = saga::CorrelationStore::new();
    let ledger = InMemoryLedger::new();
    let saga = Arc::new(SagaCoordinator::new(
        store,
        HttpOracleNetwork::new(endpoints, Duration::from_secs(2)).unwrap(),
        InMemoryGeocoder::new("Seoul, South Korea"),
        ledger.clone(),
        ServiceKeypair::generate(),
        SagaConfig {
            locate_deadline,
            ..SagaConfig::default()
        },
    ));

    let state = api::build_state(saga, SessionConfig::default()).unwrap();
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let app = api::create_app(state, metrics_handle);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Gateway { addr, ledger }
}

async fn connect(gateway: &Gateway) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/ip-geo", gateway.addr))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, message: Value) {
    client.send(Message::Text(message.to_string())).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), client.next())
            .await
            .expect("no message within 3s")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn health(gateway: &Gateway) -> Value {
    reqwest::get(format!("http://{}/health", gateway.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_saga_over_websocket() {
    let gateway = spawn_gateway(true, Duration::from_secs(3)).await;
    let mut client = connect(&gateway).await;

    send(&mut client, json!({"type": 1, "data": {"ip": "1.2.3.4"}})).await;
    assert_eq!(recv(&mut client).await["type"], "Initiate");

    let unsigned = recv(&mut client).await;
    assert_eq!(unsigned["type"], "unsignedTx");
    let request_id = unsigned["requestId"].as_str().unwrap().to_string();
    assert_eq!(recv(&mut client).await, json!({"data": null}));

    send(
        &mut client,
        json!({"type": 2, "data": {"signedTransaction": "c2lnbmVk", "requestId": request_id}}),
    )
    .await;
    assert_eq!(recv(&mut client).await["type"], "success");
    let result = recv(&mut client).await;
    assert_eq!(result["type"], "result");
    assert_eq!(result["payload"]["geoResult"], "Seoul, South Korea");
    assert_eq!(recv(&mut client).await, json!({"data": null}));

    assert_eq!(gateway.ledger.submission_count(), 2);
    let status = health(&gateway).await;
    assert_eq!(status["pending_sagas"], 0);
    assert_eq!(status["live_sessions"], 1);
}

#[tokio::test]
async fn test_locate_times_out_without_oracles() {
    let gateway = spawn_gateway(false, Duration::from_millis(200)).await;
    let mut client = connect(&gateway).await;

    send(&mut client, json!({"type": 1, "data": {"ip": "1.2.3.4"}})).await;
    assert_eq!(recv(&mut client).await["type"], "Initiate");
    let error = recv(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"], "Request timed out waiting for GPing response");
    assert_eq!(recv(&mut client).await, json!({"data": null}));

    assert_eq!(health(&gateway).await["pending_sagas"], 0);

    // the session survives the timeout and accepts a new request
    send(&mut client, json!({"type": 1, "data": {"ip": "5.6.7.8"}})).await;
    assert_eq!(recv(&mut client).await["type"], "Initiate");
}

#[tokio::test]
async fn test_unknown_message_type_closes_connection() {
    let gateway = spawn_gateway(false, Duration::from_millis(200)).await;
    let mut client = connect(&gateway).await;

    send(&mut client, json!({"type": 99, "data": {}})).await;

    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection was not closed");
}
