use std::sync::Arc;

use crate::config::Config;
use crate::services::{MessageRouter, NotificationRouter};
use crate::storage::{MessageStore, NotificationStore};
use crate::websocket::{ConnectionRegistry, Dispatcher};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub messages: MessageRouter,
    pub notifications: NotificationRouter,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new<S>(config: Config, store: Arc<S>) -> Self
    where
        S: MessageStore + NotificationStore + 'static,
    {
        let registry = ConnectionRegistry::new();
        let write_timeout = config.websocket.write_timeout;
        let messages = MessageRouter::new(registry.clone(), store.clone(), write_timeout);
        let notifications = NotificationRouter::new(registry.clone(), store, write_timeout);
        let dispatcher = Dispatcher::new(messages.clone(), notifications.clone());

        Self {
            config: Arc::new(config),
            registry,
            messages,
            notifications,
            dispatcher,
        }
    }
}
