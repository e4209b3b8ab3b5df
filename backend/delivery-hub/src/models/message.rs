use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A direct chat message between two users of one chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Assigned by storage; zero until persisted.
    #[serde(rename = "message_id", default)]
    pub id: i64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    pub chat_id: i64,
    /// Set once a live write succeeded. Never leaves the process.
    #[serde(skip)]
    pub delivered: bool,
}

impl Message {
    pub fn new(chat_id: i64, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            content: content.into(),
            timestamp: Utc::now(),
            is_read: false,
            sender: sender.into(),
            recipient: String::new(),
            chat_id,
            delivered: false,
        }
    }

    pub fn addressed_to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivered_flag_is_not_serialized() {
        let mut message = Message::new(3, "alice", "hi").addressed_to("bob");
        message.delivered = true;

        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("delivered").is_none());
        assert_eq!(json["content"], "hi");
        assert_eq!(json["recipient"], "bob");
        assert_eq!(json["chat_id"], 3);

        let back: Message = serde_json::from_value(json).unwrap();
        assert!(!back.delivered);
    }
}
