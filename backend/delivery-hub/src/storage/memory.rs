use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{MessageStore, NotificationStore, StorageError, StorageResult};
use crate::models::{Message, NewNotificationData, Notification};

#[derive(Default)]
struct Tables {
    messages: Vec<Message>,
    notifications: Vec<Notification>,
    next_message_id: i64,
    next_notification_id: i64,
    avatars: HashMap<String, String>,
}

/// Process-local storage with the same contract as [`super::PgStore`].
///
/// Keeps the timestamp a message arrives with instead of stamping its own,
/// and can be switched into a failing mode to exercise persistence errors.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    write_attempts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`StorageError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of write calls, successful or not.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub async fn set_avatar(&self, username: &str, avatar: &str) {
        self.tables
            .lock()
            .await
            .avatars
            .insert(username.to_string(), avatar.to_string());
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.tables.lock().await.messages.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.tables.lock().await.notifications.clone()
    }

    fn begin_write(&self) -> StorageResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn add_message(&self, message: &Message) -> StorageResult<Message> {
        self.begin_write()?;
        let mut tables = self.tables.lock().await;
        tables.next_message_id += 1;

        let mut stored = message.clone();
        stored.id = tables.next_message_id;
        stored.delivered = false;
        tables.messages.push(stored.clone());
        Ok(stored)
    }

    async fn get_new_messages(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Message>> {
        let tables = self.tables.lock().await;
        let mut found: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.recipient == recipient && m.timestamp > since)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn mark_read(&self, message_id: i64, chat_id: i64) -> StorageResult<()> {
        self.begin_write()?;
        let mut tables = self.tables.lock().await;
        for m in tables
            .messages
            .iter_mut()
            .filter(|m| m.chat_id == chat_id && m.id <= message_id)
        {
            m.is_read = true;
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn add_notification(
        &self,
        notification: &Notification,
    ) -> StorageResult<NewNotificationData> {
        self.begin_write()?;
        let mut tables = self.tables.lock().await;
        tables.next_notification_id += 1;

        let stored = NewNotificationData {
            id: tables.next_notification_id,
            created_at: Utc::now(),
            sender_avatar: tables
                .avatars
                .get(&notification.sender_username)
                .cloned()
                .unwrap_or_default(),
            sender_external_avatar: false,
        };

        let mut row = notification.clone();
        row.apply_stored(stored.clone());
        tables.notifications.push(row);
        Ok(stored)
    }

    async fn get_new_notifications(&self, receiver: &str) -> StorageResult<Vec<Notification>> {
        let tables = self.tables.lock().await;
        let mut found: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|n| n.receiver_username == receiver)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn delete_notification(&self, id: i64, receiver: &str) -> StorageResult<()> {
        self.begin_write()?;
        let mut tables = self.tables.lock().await;
        let before = tables.notifications.len();
        tables
            .notifications
            .retain(|n| !(n.id == id && n.receiver_username == receiver));
        if tables.notifications.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_get_new_messages_is_strictly_after_cursor() {
        let store = InMemoryStore::new();
        let t0 = Utc::now();

        let mut first = Message::new(1, "alice", "one").addressed_to("bob");
        first.timestamp = t0;
        let mut second = Message::new(1, "alice", "two").addressed_to("bob");
        second.timestamp = t0 + Duration::seconds(1);

        store.add_message(&first).await.unwrap();
        store.add_message(&second).await.unwrap();

        let fresh = store.get_new_messages("bob", t0).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].content, "two");

        assert!(store.get_new_messages("alice", t0 - Duration::seconds(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_writes_persist_nothing() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);

        let result = store
            .add_message(&Message::new(1, "alice", "lost").addressed_to("bob"))
            .await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(store.write_attempts(), 1);
        assert!(store.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_covers_earlier_messages_of_chat() {
        let store = InMemoryStore::new();
        for text in ["a", "b", "c"] {
            store
                .add_message(&Message::new(4, "alice", text).addressed_to("bob"))
                .await
                .unwrap();
        }
        store
            .add_message(&Message::new(5, "carol", "other chat").addressed_to("bob"))
            .await
            .unwrap();

        store.mark_read(2, 4).await.unwrap();

        let read: Vec<bool> = store.messages().await.iter().map(|m| m.is_read).collect();
        assert_eq!(read, vec![true, true, false, false]);
    }

    #[tokio::test]
    async fn test_delete_notification_checks_owner() {
        let store = InMemoryStore::new();
        let n: Notification = serde_json::from_value(serde_json::json!({
            "type": "like", "sender": "alice", "receiver": "bob"
        }))
        .unwrap();
        let stored = store.add_notification(&n).await.unwrap();

        assert!(matches!(
            store.delete_notification(stored.id, "mallory").await,
            Err(StorageError::NotFound)
        ));
        store.delete_notification(stored.id, "bob").await.unwrap();
        assert!(store.get_new_notifications("bob").await.unwrap().is_empty());
    }
}
