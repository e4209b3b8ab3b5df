//! Live client connections.
//!
//! The routers and the reconciler only depend on the [`Connection`] trait;
//! the actix session actor in [`session`] is the production implementation.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod dispatch;
pub mod frames;
pub mod registry;
pub mod session;

pub use dispatch::Dispatcher;
pub use frames::{DeliveryStatus, InboundFrame, OutboundFrame, WireEnvelope};
pub use registry::{ConnectionRegistry, RegisteredConnection};
pub use session::WsSession;

/// Process-unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    /// The peer is not draining its outbound queue.
    #[error("outbound queue full")]
    Backpressure,

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An open, message-framed channel to one client.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    async fn send_text(&self, text: String) -> Result<(), ConnectionError>;

    /// Closing twice is a no-op.
    async fn close(&self);
}

pub type SharedConnection = Arc<dyn Connection>;

/// Encode `frame` and write it, giving up after `timeout`.
pub async fn write_frame(
    connection: &dyn Connection,
    frame: &OutboundFrame,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    let text = frame.to_json()?;
    tokio::time::timeout(timeout, connection.send_text(text))
        .await
        .map_err(|_| ConnectionError::Timeout(timeout))?
}


#[cfg(test)]
mod tests {
    use super::testing::FakeConnection;
    use super::*;

    #[tokio::test]
    async fn test_write_frame_times_out_on_stalled_peer() {
        let conn = FakeConnection::shared();
        conn.set_stall(true);

        let frame = OutboundFrame::error("bad_request", "nope");
        let result = write_frame(conn.as_ref(), &frame, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_write_frame_encodes_json() {
        let conn = FakeConnection::shared();
        let frame = OutboundFrame::error("bad_request", "nope");

        write_frame(conn.as_ref(), &frame, Duration::from_secs(1))
            .await
            .unwrap();

        let frames = conn.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["kind"], "error");
        assert_eq!(frames[0]["code"], "bad_request");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
