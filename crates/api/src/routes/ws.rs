//! WebSocket session endpoint.

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt, future};
use session::{SessionError, Transport};

use super::AppState;

/// Write half of an upgraded WebSocket.
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Maps a raw WebSocket message to a session frame.
///
/// Control frames are skipped; a close frame ends the inbound stream with
/// [`SessionError::Closed`].
fn inbound_frame(
    message: Result<Message, axum::Error>,
) -> Option<Result<String, SessionError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| SessionError::Decode("binary frame is not UTF-8".to_string())),
        ),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(Err(SessionError::Closed)),
        Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
    }
}

/// GET /ws/ip-geo: upgrades to a WebSocket session.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let limit = state.hub.config().max_frame_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(|error| {
            tracing::warn!(%error, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| attach(socket, state))
}

async fn attach(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let inbound = stream.filter_map(|message| future::ready(inbound_frame(message)));

    if let Err(error) = state.hub.accept(inbound, WsTransport { sink }).await {
        tracing::error!(%error, "failed to hand websocket to session hub");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frames_pass_through() {
        let frame = inbound_frame(Ok(Message::Text("{\"type\":1}".into())));
        assert_eq!(frame.unwrap().unwrap(), "{\"type\":1}");
    }

    #[test]
    fn test_binary_frames_must_be_utf8() {
        let ok = inbound_frame(Ok(Message::Binary(b"hello".to_vec().into())));
        assert_eq!(ok.unwrap().unwrap(), "hello");

        let bad = inbound_frame(Ok(Message::Binary(vec![0xff, 0xfe].into())));
        assert!(matches!(bad, Some(Err(SessionError::Decode(_)))));
    }

    #[test]
    fn test_control_frames() {
        assert!(inbound_frame(Ok(Message::Ping(Vec::new().into()))).is_none());
        assert!(inbound_frame(Ok(Message::Pong(Vec::new().into()))).is_none());
        assert!(matches!(
            inbound_frame(Ok(Message::Close(None))),
            Some(Err(SessionError::Closed))
        ));
    }
}
