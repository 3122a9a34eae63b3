//! Outbound transport seam.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionError;

/// Write half of a session's connection.
///
/// The session owns its transport exclusively; every outbound message goes
/// through [`crate::Session::send`], which applies the write deadline.
#[async_trait]
pub trait Transport: Send {
    /// Writes one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), SessionError>;

    /// Closes the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Transport that forwards frames into a bounded channel.
///
/// Used for in-process sessions and tests.
pub struct ChannelTransport {
    sender: mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver observing its frames.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.sender
            .send(text)
            .await
            .map_err(|_| SessionError::Transport("peer receiver dropped".to_string()))
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_forwards_frames() {
        let (mut transport, mut rx) = ChannelTransport::pair(4);
        transport.send_text("hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_channel_transport_fails_when_peer_gone() {
        let (mut transport, rx) = ChannelTransport::pair(4);
        drop(rx);
        let err = transport.send_text("hello".to_string()).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }
}
