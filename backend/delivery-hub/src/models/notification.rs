use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `type` of a web envelope whose content is a [`Notification`].
pub const NOTIFICATION_ENVELOPE_TYPE: &str = "notification";

/// Polymorphic container other services use to hand events to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl WebEnvelope {
    pub fn notification(notification: &Notification) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: NOTIFICATION_ENVELOPE_TYPE.to_string(),
            content: serde_json::to_value(notification)?,
        })
    }
}

/// Activity notification (like, comment, follow, ...).
///
/// `additional_data` is opaque to the hub and forwarded as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "sender")]
    pub sender_username: String,
    #[serde(default)]
    pub sender_avatar: String,
    #[serde(skip)]
    pub sender_external_avatar: bool,
    #[serde(rename = "receiver")]
    pub receiver_username: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub additional_data: serde_json::Value,
}

impl Notification {
    /// Copy the fields storage assigns on insert.
    pub fn apply_stored(&mut self, stored: NewNotificationData) {
        self.id = stored.id;
        self.created_at = stored.created_at;
        self.sender_avatar = stored.sender_avatar;
        self.sender_external_avatar = stored.sender_external_avatar;
    }
}

/// What storage knows about a notification only after inserting it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotificationData {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub sender_avatar: String,
    pub sender_external_avatar: bool,
}
