use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::HubError;
use crate::metrics;
use crate::models::{Notification, WebEnvelope, NOTIFICATION_ENVELOPE_TYPE};
use crate::storage::{NotificationStore, StorageResult};
use crate::websocket::{write_frame, ConnectionRegistry, OutboundFrame};

/// Routes activity notifications handed over by other services.
#[derive(Clone)]
pub struct NotificationRouter {
    registry: ConnectionRegistry,
    store: Arc<dyn NotificationStore>,
    write_timeout: Duration,
}

impl NotificationRouter {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn NotificationStore>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            write_timeout,
        }
    }

    fn decode(envelope: WebEnvelope) -> Result<Notification, HubError> {
        if !envelope.kind.is_empty() && envelope.kind != NOTIFICATION_ENVELOPE_TYPE {
            return Err(HubError::UnknownMessageType(envelope.kind));
        }
        let notification: Notification = serde_json::from_value(envelope.content)
            .map_err(|e| HubError::MalformedEnvelope(e.to_string()))?;
        if notification.receiver_username.trim().is_empty() {
            return Err(HubError::MalformedEnvelope("empty receiver".into()));
        }
        Ok(notification)
    }

    /// Persist the notification carried by `envelope` and push it to the
    /// receiver if connected. Returns the notification as stored.
    pub async fn send_notification(&self, envelope: WebEnvelope) -> Result<Notification, HubError> {
        let mut notification = Self::decode(envelope)?;
        let receiver = notification.receiver_username.clone();

        let connection = self.registry.find_by_identity(&receiver).await;

        match self.store.add_notification(&notification).await {
            Ok(stored) => notification.apply_stored(stored),
            Err(e) => {
                warn!(receiver = %receiver, error = %e, "couldn't persist notification");
                metrics::record_delivery("notification", "persistence_failure");
                return Err(e.into());
            }
        }

        let Some(connection) = connection else {
            debug!(notification_id = notification.id, receiver = %receiver, "receiver offline");
            metrics::record_delivery("notification", "offline");
            return Err(HubError::TargetOffline {
                identity: receiver,
                stored_id: notification.id,
            });
        };

        let frame = OutboundFrame::Notification(notification.clone());
        if let Err(e) = write_frame(connection.as_ref(), &frame, self.write_timeout).await {
            warn!(notification_id = notification.id, receiver = %receiver, error = %e, "notification write failed");
            self.registry.teardown(connection.as_ref()).await;
            metrics::record_delivery("notification", "failed");
            return Err(HubError::DeliveryFailure {
                identity: receiver,
                stored_id: notification.id,
                source: e,
            });
        }

        metrics::record_delivery("notification", "delivered");
        Ok(notification)
    }

    /// Delete notification `id` owned by `identity`.
    pub async fn delete(&self, id: i64, identity: &str) -> StorageResult<()> {
        self.store.delete_notification(id, identity).await
    }

    pub async fn pending_for(&self, identity: &str) -> StorageResult<Vec<Notification>> {
        self.store.get_new_notifications(identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::websocket::testing::FakeConnection;
    use serde_json::json;

    fn envelope(content: serde_json::Value) -> WebEnvelope {
        WebEnvelope {
            kind: NOTIFICATION_ENVELOPE_TYPE.into(),
            content,
        }
    }

    fn router(store: Arc<InMemoryStore>) -> (NotificationRouter, ConnectionRegistry) {
        let registry = ConnectionRegistry::new();
        let router =
            NotificationRouter::new(registry.clone(), store, Duration::from_millis(100));
        (router, registry)
    }

    #[tokio::test]
    async fn test_online_receiver_gets_stored_fields() {
        let store = Arc::new(InMemoryStore::new());
        store.set_avatar("alice", "alice.png").await;
        let (router, registry) = router(store.clone());
        let bob = FakeConnection::shared();
        registry.register(bob.clone(), "bob").await;

        let n = router
            .send_notification(envelope(json!({
                "type": "like", "sender": "alice", "receiver": "bob",
                "additional_data": {"pin_id": 3}
            })))
            .await
            .unwrap();

        assert_eq!(n.id, 1);
        let frames = bob.frames();
        assert_eq!(frames[0]["kind"], "notification");
        assert_eq!(frames[0]["id"], 1);
        assert_eq!(frames[0]["sender_avatar"], "alice.png");
        assert_eq!(frames[0]["additional_data"]["pin_id"], 3);
    }

    #[tokio::test]
    async fn test_offline_receiver_is_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let (router, _) = router(store.clone());

        let err = router
            .send_notification(envelope(json!({
                "type": "follow", "sender": "alice", "receiver": "bob"
            })))
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::TargetOffline { stored_id: 1, .. }));
        assert_eq!(store.notifications().await.len(), 1);
        assert_eq!(router.pending_for("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_envelope_persists_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let (router, _) = router(store.clone());

        let err = router
            .send_notification(envelope(json!({"type": "like", "sender": "alice"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedEnvelope(_)));

        let err = router
            .send_notification(envelope(json!({
                "type": "like", "sender": "alice", "receiver": ""
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedEnvelope(_)));

        let err = router
            .send_notification(WebEnvelope {
                kind: "poke".into(),
                content: json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::UnknownMessageType(_)));

        assert_eq!(store.write_attempts(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_tears_down() {
        let store = Arc::new(InMemoryStore::new());
        let (router, registry) = router(store);
        let bob = FakeConnection::shared();
        bob.set_fail_writes(true);
        registry.register(bob.clone(), "bob").await;

        let err = router
            .send_notification(envelope(json!({
                "type": "comment", "sender": "alice", "receiver": "bob"
            })))
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::DeliveryFailure { .. }));
        assert!(bob.is_closed());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_only_own_notification() {
        let store = Arc::new(InMemoryStore::new());
        let (router, _) = router(store);
        let _ = router
            .send_notification(envelope(json!({
                "type": "like", "sender": "alice", "receiver": "bob"
            })))
            .await;

        assert!(router.delete(1, "alice").await.is_err());
        router.delete(1, "bob").await.unwrap();
        assert!(router.pending_for("bob").await.unwrap().is_empty());
    }
}
