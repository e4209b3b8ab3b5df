/// Connection registry
///
/// Bidirectional index of live connections: by connection id and by identity.
/// An identity owns at most one connection; registering a second one evicts
/// the first, which the caller is expected to close.
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Connection, ConnectionId, SharedConnection};
use crate::metrics;

#[derive(Clone)]
pub struct RegisteredConnection {
    pub id: ConnectionId,
    pub identity: String,
    pub connection: SharedConnection,
    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for RegisteredConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredConnection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

#[derive(Default)]
struct Tables {
    by_connection: HashMap<ConnectionId, RegisteredConnection>,
    by_identity: HashMap<String, ConnectionId>,
}

impl Tables {
    fn remove(&mut self, id: ConnectionId) -> Option<RegisteredConnection> {
        let entry = self.by_connection.remove(&id)?;
        // Only clear the identity slot if it still points at us.
        if self.by_identity.get(&entry.identity) == Some(&id) {
            self.by_identity.remove(&entry.identity);
        }
        Some(entry)
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    tables: Arc<RwLock<Tables>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` for `identity`.
    ///
    /// Returns the entry this registration displaced, if the identity was
    /// already bound to a different connection. Re-registering the same
    /// connection id replaces its entry.
    pub async fn register(
        &self,
        connection: SharedConnection,
        identity: impl Into<String>,
    ) -> Option<RegisteredConnection> {
        let identity = identity.into();
        let id = connection.id();
        let entry = RegisteredConnection {
            id,
            identity: identity.clone(),
            connection,
            registered_at: Utc::now(),
        };

        let mut tables = self.tables.write().await;
        tables.remove(id);

        let evicted = match tables.by_identity.get(&identity).copied() {
            Some(previous) if previous != id => tables.remove(previous),
            _ => None,
        };

        tables.by_identity.insert(identity, id);
        tables.by_connection.insert(id, entry);
        metrics::set_live_connections(tables.by_connection.len());

        evicted
    }

    /// Remove `id`. Safe to call any number of times; returns whether an
    /// entry was actually removed by this call.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut tables = self.tables.write().await;
        let removed = tables.remove(id).is_some();
        if removed {
            metrics::set_live_connections(tables.by_connection.len());
        }
        removed
    }

    pub async fn find_by_identity(&self, identity: &str) -> Option<SharedConnection> {
        let tables = self.tables.read().await;
        let id = tables.by_identity.get(identity)?;
        tables.by_connection.get(id).map(|e| e.connection.clone())
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.tables.read().await.by_identity.contains_key(identity)
    }

    /// Point-in-time copy of every entry.
    pub async fn snapshot(&self) -> Vec<RegisteredConnection> {
        let tables = self.tables.read().await;
        tables.by_connection.values().cloned().collect()
    }

    /// Visit a snapshot. The lock is released before the visitor runs, so it
    /// may call back into the registry.
    pub async fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&RegisteredConnection),
    {
        for entry in self.snapshot().await {
            visitor(&entry);
        }
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.by_connection.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn connected_identities(&self) -> Vec<String> {
        let tables = self.tables.read().await;
        let mut identities: Vec<String> = tables.by_identity.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Close a connection whose write failed and forget it.
    pub async fn teardown(&self, connection: &dyn Connection) {
        connection.close().await;
        if self.unregister(connection.id()).await {
            tracing::info!(connection_id = %connection.id(), "connection torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::testing::FakeConnection;

    #[tokio::test]
    async fn test_register_and_find() {
        let registry = ConnectionRegistry::new();
        let conn = FakeConnection::shared();

        assert!(registry.register(conn.clone(), "alice").await.is_none());

        let found = registry.find_by_identity("alice").await.unwrap();
        assert_eq!(found.id(), conn.id());
        assert!(registry.find_by_identity("bob").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_connection_evicts_first() {
        let registry = ConnectionRegistry::new();
        let first = FakeConnection::shared();
        let second = FakeConnection::shared();

        registry.register(first.clone(), "alice").await;
        let evicted = registry.register(second.clone(), "alice").await.unwrap();

        assert_eq!(evicted.id, first.id());
        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry.find_by_identity("alice").await.unwrap().id(),
            second.id()
        );

        // Late close hook of the evicted session.
        assert!(!registry.unregister(first.id()).await);
        assert!(registry.contains("alice").await);
    }

    #[tokio::test]
    async fn test_reregister_same_connection_moves_identity() {
        let registry = ConnectionRegistry::new();
        let conn = FakeConnection::shared();

        registry.register(conn.clone(), "alice").await;
        assert!(registry.register(conn.clone(), "alicia").await.is_none());

        assert!(!registry.contains("alice").await);
        assert!(registry.contains("alicia").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = FakeConnection::shared();
        registry.register(conn.clone(), "bob").await;

        assert!(registry.unregister(conn.id()).await);
        assert!(!registry.unregister(conn.id()).await);
        assert!(registry.is_empty().await);
        assert!(registry.find_by_identity("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_for_each_can_reenter_registry() {
        let registry = ConnectionRegistry::new();
        registry.register(FakeConnection::shared(), "alice").await;
        registry.register(FakeConnection::shared(), "bob").await;

        let mut seen = Vec::new();
        registry.for_each(|e| seen.push(e.identity.clone())).await;
        seen.sort();
        assert_eq!(seen, vec!["alice", "bob"]);

        // The snapshot does not hold the lock.
        for entry in registry.snapshot().await {
            registry.unregister(entry.id).await;
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_teardown_closes_and_unregisters() {
        let registry = ConnectionRegistry::new();
        let conn = FakeConnection::shared();
        registry.register(conn.clone(), "carol").await;

        registry.teardown(conn.as_ref()).await;
        assert!(conn.is_closed());
        assert!(!registry.contains("carol").await);

        registry.teardown(conn.as_ref()).await;
    }

    #[tokio::test]
    async fn test_connected_identities_sorted() {
        let registry = ConnectionRegistry::new();
        for name in ["dave", "alice", "carol"] {
            registry.register(FakeConnection::shared(), name).await;
        }
        assert_eq!(
            registry.connected_identities().await,
            vec!["alice", "carol", "dave"]
        );
    }
}
