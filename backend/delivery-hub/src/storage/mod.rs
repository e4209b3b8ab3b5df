//! Persistence collaborators of the delivery core.
//!
//! The routers and the reconciler only see the traits below. `postgres`
//! is the production adapter, `memory` backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Message, NewNotificationData, Notification};

pub mod memory;
pub mod migrations;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The write reached storage but violated a constraint (e.g. the
    /// sender and recipient are not the two members of the chat).
    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("not found")]
    NotFound,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `message` and return the stored row (id and authoritative timestamp).
    async fn add_message(&self, message: &Message) -> StorageResult<Message>;

    /// Messages addressed to `recipient` with `timestamp > since`, oldest first.
    async fn get_new_messages(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Message>>;

    /// Mark every message of `chat_id` up to and including `message_id` as read.
    async fn mark_read(&self, message_id: i64, chat_id: i64) -> StorageResult<()>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn add_notification(
        &self,
        notification: &Notification,
    ) -> StorageResult<NewNotificationData>;

    /// All notifications of `receiver`, newest first.
    async fn get_new_notifications(&self, receiver: &str) -> StorageResult<Vec<Notification>>;

    /// Delete notification `id` if it belongs to `receiver`.
    async fn delete_notification(&self, id: i64, receiver: &str) -> StorageResult<()>;
}
