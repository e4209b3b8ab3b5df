//! Entities pushed to clients and persisted through the storage layer.

pub mod message;
pub mod notification;

pub use message::Message;
pub use notification::{NewNotificationData, Notification, WebEnvelope, NOTIFICATION_ENVELOPE_TYPE};
