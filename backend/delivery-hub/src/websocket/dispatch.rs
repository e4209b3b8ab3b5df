use tracing::{debug, warn};

use super::frames::{DeliveryStatus, InboundFrame, OutboundFrame};
use crate::error::HubError;
use crate::models::Message;
use crate::services::{MessageRouter, NotificationRouter};
use crate::storage::StorageError;

/// Turns one inbound text frame into router calls.
///
/// The returned frame, if any, goes back to the sending connection.
#[derive(Clone)]
pub struct Dispatcher {
    messages: MessageRouter,
    notifications: NotificationRouter,
}

impl Dispatcher {
    pub fn new(messages: MessageRouter, notifications: NotificationRouter) -> Self {
        Self {
            messages,
            notifications,
        }
    }

    pub async fn handle_text(&self, identity: &str, text: &str) -> Option<OutboundFrame> {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(identity, error = %e, "rejected inbound frame");
                return Some(OutboundFrame::from_hub_error(&e));
            }
        };

        match frame {
            InboundFrame::Message {
                chat_id,
                content,
                target,
            } => {
                let message = Message::new(chat_id, identity, content);
                let result = self.messages.send(message, &target).await;
                Some(delivery_status(target, result))
            }
            InboundFrame::MarkRead {
                chat_id,
                message_id,
                target,
            } => match self
                .messages
                .mark_read(message_id, chat_id, &target, identity)
                .await
            {
                Ok(()) => None,
                Err(e) => {
                    warn!(identity, chat_id, error = %e, "mark_read failed");
                    Some(OutboundFrame::from_hub_error(&e))
                }
            },
            InboundFrame::DeleteNotification { id } => {
                match self.notifications.delete(id, identity).await {
                    Ok(()) => None,
                    Err(StorageError::NotFound) => Some(OutboundFrame::error(
                        "not_found",
                        format!("notification {id} not found"),
                    )),
                    Err(e) => {
                        warn!(identity, notification_id = id, error = %e, "delete_notification failed");
                        Some(OutboundFrame::from_hub_error(&HubError::from(e)))
                    }
                }
            }
        }
    }
}

fn delivery_status(target: String, result: Result<Message, HubError>) -> OutboundFrame {
    let (message_id, status) = match result {
        Ok(message) => (Some(message.id), DeliveryStatus::Delivered),
        Err(HubError::TargetOffline { stored_id, .. }) => {
            (Some(stored_id), DeliveryStatus::StoredOffline)
        }
        Err(HubError::DeliveryFailure { stored_id, .. }) => (Some(stored_id), DeliveryStatus::Failed),
        Err(e) => return OutboundFrame::from_hub_error(&e),
    };
    OutboundFrame::DeliveryStatus {
        message_id,
        target,
        status,
    }
}
