/// Websocket frame types
///
/// Inbound frames arrive as a loose [`WireEnvelope`] and are narrowed into
/// the closed [`InboundFrame`] enum before dispatch. Every outbound frame is
/// a JSON object tagged with `kind`.
use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::models::{Message, Notification};

pub const KIND_MESSAGE: &str = "message";
pub const KIND_MARK_READ: &str = "mark_read";
pub const KIND_DELETE_NOTIFICATION: &str = "delete_notification";

/// Shape clients actually send. Everything except `description` is optional
/// here; which fields are required depends on the kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub message_id: Option<i64>,
    /// Sender as claimed by the client. Ignored: the session's
    /// authenticated identity is used instead.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub target_username: Option<String>,
    #[serde(default)]
    pub notification_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Message {
        chat_id: i64,
        content: String,
        target: String,
    },
    MarkRead {
        chat_id: i64,
        message_id: i64,
        target: String,
    },
    DeleteNotification {
        id: i64,
    },
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, HubError> {
        let envelope: WireEnvelope = serde_json::from_str(text)
            .map_err(|e| HubError::MalformedEnvelope(e.to_string()))?;
        Self::try_from(envelope)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Message { .. } => KIND_MESSAGE,
            InboundFrame::MarkRead { .. } => KIND_MARK_READ,
            InboundFrame::DeleteNotification { .. } => KIND_DELETE_NOTIFICATION,
        }
    }
}

fn required<T>(value: Option<T>, kind: &str, field: &str) -> Result<T, HubError> {
    value.ok_or_else(|| HubError::MalformedEnvelope(format!("{kind}: missing {field}")))
}

fn required_name(value: Option<String>, kind: &str, field: &str) -> Result<String, HubError> {
    match value {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => Err(HubError::MalformedEnvelope(format!(
            "{kind}: missing {field}"
        ))),
    }
}

impl TryFrom<WireEnvelope> for InboundFrame {
    type Error = HubError;

    fn try_from(env: WireEnvelope) -> Result<Self, Self::Error> {
        let kind = env.description.trim();
        match kind {
            "" => Err(HubError::BadRequest("missing description".into())),
            KIND_MESSAGE => Ok(InboundFrame::Message {
                chat_id: required(env.chat_id, kind, "chat_id")?,
                content: required(env.message, kind, "message")?,
                target: required_name(env.target_username, kind, "target_username")?,
            }),
            KIND_MARK_READ => Ok(InboundFrame::MarkRead {
                chat_id: required(env.chat_id, kind, "chat_id")?,
                message_id: required(env.message_id, kind, "message_id")?,
                target: required_name(env.target_username, kind, "target_username")?,
            }),
            KIND_DELETE_NOTIFICATION => Ok(InboundFrame::DeleteNotification {
                id: required(env.notification_id, kind, "notification_id")?,
            }),
            other => Err(HubError::UnknownMessageType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    StoredOffline,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message(Message),
    Notification(Notification),
    MarkRead {
        message_id: i64,
        chat_id: i64,
        is_read: bool,
        sender: String,
    },
    DeliveryStatus {
        message_id: Option<i64>,
        target: String,
        status: DeliveryStatus,
    },
    Error {
        code: String,
        message: String,
    },
}

impl OutboundFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        OutboundFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn from_hub_error(err: &HubError) -> Self {
        Self::error(err.code(), err.to_string())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
