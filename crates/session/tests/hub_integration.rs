//! Integration tests for the session hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use parking_lot::Mutex;
use serde_json::Value;
use session::{
    ChannelTransport, Handler, HandlerResult, HandlerTable, Hub, MessageType, Session,
    SessionConfig, SessionError, SessionId, SessionListener,
};
use tokio::sync::mpsc;

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, data: Value, _session: &Session) -> HandlerResult {
        Ok(data)
    }
}

#[derive(Default)]
struct DisconnectLog {
    count: AtomicUsize,
    seen: Mutex<Vec<SessionId>>,
}

impl SessionListener for DisconnectLog {
    fn on_disconnect(&self, session_id: SessionId) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(session_id);
    }
}

struct Client {
    session: Arc<Session>,
    inbound: UnboundedSender<Result<String, SessionError>>,
    outbound: mpsc::Receiver<String>,
}

async fn connect(hub: &Hub) -> Client {
    let (transport, outbound) = ChannelTransport::pair(8);
    let (inbound, frames) = unbounded();
    let session = hub.accept(frames, transport).await.unwrap();
    Client {
        session,
        inbound,
        outbound,
    }
}

fn hub_with(listener: Arc<DisconnectLog>) -> Hub {
    let mut builder = HandlerTable::builder();
    builder.register(MessageType(1), Arc::new(Echo)).unwrap();
    builder.listen(listener);
    Hub::new(builder.build(), SessionConfig::default())
}

async fn wait_for_live(hub: &Hub, expected: i64) {
    for _ in 0..200 {
        if hub.live_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "live count never reached {expected}, still {}",
        hub.live_count()
    );
}

#[tokio::test]
async fn test_live_count_tracks_accept_and_disconnect() {
    let log = Arc::new(DisconnectLog::default());
    let hub = hub_with(log.clone());
    assert_eq!(hub.live_count(), 0);

    let a = connect(&hub).await;
    let b = connect(&hub).await;
    wait_for_live(&hub, 2).await;

    drop(a.inbound);
    wait_for_live(&hub, 1).await;
    assert!(a.session.is_closed());
    assert!(!b.session.is_closed());

    drop(b.inbound);
    wait_for_live(&hub, 0).await;
    assert_eq!(log.count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_disconnect_is_reported_exactly_once() {
    let log = Arc::new(DisconnectLog::default());
    let hub = hub_with(log.clone());

    let client = connect(&hub).await;
    wait_for_live(&hub, 1).await;

    // protocol violation and transport end race each other
    client
        .inbound
        .unbounded_send(Ok(r#"{"type":77}"#.to_string()))
        .unwrap();
    drop(client.inbound);
    client.session.close();

    wait_for_live(&hub, 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(log.count.load(Ordering::SeqCst), 1);
    assert_eq!(*log.seen.lock(), vec![client.session.id()]);
}

#[tokio::test]
async fn test_malformed_frame_leaves_other_sessions_running() {
    let log = Arc::new(DisconnectLog::default());
    let hub = hub_with(log);

    let bad = connect(&hub).await;
    let mut good = connect(&hub).await;
    wait_for_live(&hub, 2).await;

    bad.inbound
        .unbounded_send(Ok("garbage".to_string()))
        .unwrap();
    wait_for_live(&hub, 1).await;
    assert!(bad.session.is_closed());

    good.inbound
        .unbounded_send(Ok(r#"{"type":1,"data":[1,2]}"#.to_string()))
        .unwrap();
    let frame = good.outbound.recv().await.unwrap();
    assert_eq!(frame, r#"{"data":[1,2]}"#);
}
