use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use super::{MessageStore, NotificationStore, StorageError, StorageResult};
use crate::models::{Message, NewNotificationData, Notification};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    content: String,
    timestamp: DateTime<Utc>,
    is_read: bool,
    sender: String,
    recipient: String,
    chat_id: i64,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            timestamp: row.timestamp,
            is_read: row.is_read,
            sender: row.sender,
            recipient: row.recipient,
            chat_id: row.chat_id,
            delivered: false,
        }
    }
}

#[derive(FromRow)]
struct StoredNotificationRow {
    id: i64,
    created_at: DateTime<Utc>,
    avatar: Option<String>,
    is_external_avatar: Option<bool>,
}

#[derive(FromRow)]
struct NotificationRow {
    id: i64,
    author_username: Option<String>,
    author_avatar: Option<String>,
    author_is_external: Option<bool>,
    receiver_username: Option<String>,
    notification_type: String,
    is_read: bool,
    created_at: DateTime<Utc>,
    additional: serde_json::Value,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            kind: row.notification_type,
            created_at: row.created_at,
            sender_username: row.author_username.unwrap_or_default(),
            sender_avatar: row.author_avatar.unwrap_or_default(),
            sender_external_avatar: row.author_is_external.unwrap_or(false),
            receiver_username: row.receiver_username.unwrap_or_default(),
            is_read: row.is_read,
            additional_data: row.additional,
        }
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn add_message(&self, message: &Message) -> StorageResult<Message> {
        // The EXISTS guard only accepts messages between the two members of the chat.
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO message (content, sender, recipient, chat_id)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (
                SELECT 1 FROM chat
                WHERE id = $4
                  AND (($2 = user1 AND $3 = user2) OR ($2 = user2 AND $3 = user1))
            )
            RETURNING id, content, timestamp, is_read, sender, recipient, chat_id
            "#,
        )
        .bind(&message.content)
        .bind(&message.sender)
        .bind(&message.recipient)
        .bind(message.chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::from).ok_or_else(|| {
            StorageError::Rejected(format!(
                "{} and {} are not the members of chat {}",
                message.sender, message.recipient, message.chat_id
            ))
        })
    }

    async fn get_new_messages(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, content, timestamp, is_read, sender, recipient, chat_id
            FROM message
            WHERE recipient = $1 AND timestamp > $2
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(recipient)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn mark_read(&self, message_id: i64, chat_id: i64) -> StorageResult<()> {
        sqlx::query("UPDATE message SET is_read = TRUE WHERE chat_id = $1 AND id <= $2")
            .bind(chat_id)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn add_notification(
        &self,
        notification: &Notification,
    ) -> StorageResult<NewNotificationData> {
        let row = sqlx::query_as::<_, StoredNotificationRow>(
            r#"
            WITH author AS (
                SELECT id, avatar, is_external_avatar FROM flow_user WHERE username = $1
            ), receiver AS (
                SELECT id FROM flow_user WHERE username = $2
            )
            INSERT INTO notification (author_id, receiver_id, notification_type, is_read, additional)
            SELECT author.id, receiver.id, $3, $4, $5
            FROM author, receiver
            RETURNING id,
                      created_at,
                      (SELECT avatar FROM author) AS avatar,
                      (SELECT is_external_avatar FROM author) AS is_external_avatar
            "#,
        )
        .bind(&notification.sender_username)
        .bind(&notification.receiver_username)
        .bind(&notification.kind)
        .bind(notification.is_read)
        .bind(&notification.additional_data)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| {
            StorageError::Rejected(format!(
                "unknown notification sender {} or receiver {}",
                notification.sender_username, notification.receiver_username
            ))
        })?;

        Ok(NewNotificationData {
            id: row.id,
            created_at: row.created_at,
            sender_avatar: row.avatar.unwrap_or_default(),
            sender_external_avatar: row.is_external_avatar.unwrap_or(false),
        })
    }

    async fn get_new_notifications(&self, receiver: &str) -> StorageResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT
                n.id,
                fu.username AS author_username,
                fu.avatar AS author_avatar,
                fu.is_external_avatar AS author_is_external,
                ru.username AS receiver_username,
                n.notification_type,
                n.is_read,
                n.created_at,
                n.additional
            FROM notification n
            LEFT JOIN flow_user fu ON n.author_id = fu.id
            JOIN flow_user ru ON n.receiver_id = ru.id
            WHERE ru.username = $1
            ORDER BY n.created_at DESC
            "#,
        )
        .bind(receiver)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Notification::from).collect())
    }

    async fn delete_notification(&self, id: i64, receiver: &str) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM notification n
            USING flow_user u
            WHERE n.id = $1 AND n.receiver_id = u.id AND u.username = $2
            "#,
        )
        .bind(id)
        .bind(receiver)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
