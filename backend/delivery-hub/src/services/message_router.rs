use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::metrics;
use crate::models::Message;
use crate::storage::MessageStore;
use crate::websocket::{write_frame, ConnectionRegistry, OutboundFrame};

/// Routes chat messages: persist first, then push to the recipient if online.
#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    write_timeout: Duration,
}

impl MessageRouter {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn MessageStore>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            write_timeout,
        }
    }

    /// Deliver `message` to `target`.
    ///
    /// The message is persisted before any delivery attempt, so every
    /// outcome other than `PersistenceFailure` leaves it durable. On success
    /// the stored message comes back with `delivered` set.
    pub async fn send(&self, mut message: Message, target: &str) -> Result<Message, HubError> {
        if target.trim().is_empty() {
            return Err(HubError::BadRequest("empty target".into()));
        }

        let connection = self.registry.find_by_identity(target).await;

        message.recipient = target.to_string();
        let mut stored = match self.store.add_message(&message).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(sender = %message.sender, recipient = %target, error = %e, "couldn't persist message");
                metrics::record_delivery("message", "persistence_failure");
                return Err(e.into());
            }
        };

        let Some(connection) = connection else {
            debug!(message_id = stored.id, recipient = %target, "target offline, message stored");
            metrics::record_delivery("message", "offline");
            return Err(HubError::TargetOffline {
                identity: target.to_string(),
                stored_id: stored.id,
            });
        };

        let frame = OutboundFrame::Message(stored.clone());
        if let Err(e) = write_frame(connection.as_ref(), &frame, self.write_timeout).await {
            warn!(message_id = stored.id, recipient = %target, error = %e, "message write failed");
            self.registry.teardown(connection.as_ref()).await;
            metrics::record_delivery("message", "failed");
            return Err(HubError::DeliveryFailure {
                identity: target.to_string(),
                stored_id: stored.id,
                source: e,
            });
        }

        stored.delivered = true;
        metrics::record_delivery("message", "delivered");
        Ok(stored)
    }

    /// Mark `chat_id` read up to `message_id` on behalf of `reader` and tell
    /// the other participant, if connected.
    pub async fn mark_read(
        &self,
        message_id: i64,
        chat_id: i64,
        target: &str,
        reader: &str,
    ) -> Result<(), HubError> {
        self.store.mark_read(message_id, chat_id).await?;

        let Some(connection) = self.registry.find_by_identity(target).await else {
            return Ok(());
        };

        let frame = OutboundFrame::MarkRead {
            message_id,
            chat_id,
            is_read: true,
            sender: reader.to_string(),
        };
        if let Err(e) = write_frame(connection.as_ref(), &frame, self.write_timeout).await {
            // Read state is already stored; the peer catches up on reconnect.
            info!(chat_id, recipient = %target, error = %e, "mark_read push failed");
            self.registry.teardown(connection.as_ref()).await;
        }
        Ok(())
    }
}
