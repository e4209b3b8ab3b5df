#![allow(dead_code)]

use async_trait::async_trait;
use delivery_hub::websocket::{Connection, ConnectionError, ConnectionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-process connection that records what the hub writes to it.
#[derive(Default)]
pub struct RecordingConnection {
    id: ConnectionId,
    sent: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl RecordingConnection {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let conn = Self::shared();
        conn.fail_writes.store(true, Ordering::SeqCst);
        conn
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|t| serde_json::from_str(t).unwrap())
            .collect()
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ConnectionError::Backpressure);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
