/// Reconciliation loop
///
/// Periodically re-pushes stored messages to every registered connection, so
/// a client that missed a live push (it connected after the send, or a write
/// raced its registration) still receives the message.
///
/// Two cursor policies are supported:
/// - `shared`: one watermark for everybody, starting at loop start and
///   advanced by exactly one interval after each pass.
/// - `per_connection`: one cursor per connection, starting `lookback` before
///   its registration. It trails the newest fetched message by up to
///   `lookback`, so rows committed late with an older timestamp are still
///   seen; ids already pushed inside that overlap are remembered and skipped.
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval_at;
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::metrics;
use crate::models::Message;
use crate::storage::MessageStore;
use crate::websocket::{write_frame, ConnectionId, ConnectionRegistry, OutboundFrame, RegisteredConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPolicy {
    Shared,
    PerConnection,
}

impl fmt::Display for WatermarkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkPolicy::Shared => f.write_str("shared"),
            WatermarkPolicy::PerConnection => f.write_str("per_connection"),
        }
    }
}

impl FromStr for WatermarkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(WatermarkPolicy::Shared),
            "per_connection" | "per-connection" => Ok(WatermarkPolicy::PerConnection),
            other => Err(format!(
                "unknown watermark policy '{other}' (expected shared or per_connection)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub connections: usize,
    pub pushed: usize,
    pub failed_writes: usize,
    pub failed_fetches: usize,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Per-connection read position.
#[derive(Debug, Clone)]
struct ConnectionCursor {
    since: DateTime<Utc>,
    /// Messages newer than `since` that were already attempted.
    pushed: HashMap<i64, DateTime<Utc>>,
}

impl ConnectionCursor {
    fn new(since: DateTime<Utc>) -> Self {
        Self {
            since,
            pushed: HashMap::new(),
        }
    }

    /// Move forward to `min(newest, horizon)` and forget ids at or before it.
    fn advance(&mut self, newest: Option<DateTime<Utc>>, horizon: DateTime<Utc>) {
        if let Some(newest) = newest {
            let target = newest.min(horizon);
            if target > self.since {
                self.since = target;
            }
        }
        let since = self.since;
        self.pushed.retain(|_, at| *at > since);
    }
}

pub struct Reconciler {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    interval: Duration,
    policy: WatermarkPolicy,
    lookback: chrono::Duration,
    write_timeout: Duration,
    watermark: DateTime<Utc>,
    cursors: HashMap<ConnectionId, ConnectionCursor>,
}

impl Reconciler {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn MessageStore>,
        config: &ReconcileConfig,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            interval: config.interval,
            policy: config.watermark,
            lookback: chrono_duration(config.lookback),
            write_timeout,
            watermark: Utc::now(),
            cursors: HashMap::new(),
        }
    }

    /// Start the shared watermark at `start` instead of now.
    pub fn with_watermark(mut self, start: DateTime<Utc>) -> Self {
        self.watermark = start;
        self
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn cursor(&self, id: ConnectionId) -> Option<DateTime<Utc>> {
        self.cursors.get(&id).map(|c| c.since)
    }

    /// Run the loop on its own task until the returned sender fires or is dropped.
    pub fn spawn(mut self) -> (watch::Sender<()>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            info!(
                interval_ms = self.interval.as_millis() as u64,
                policy = %self.policy,
                "reconciler started"
            );

            let mut timer = interval_at(tokio::time::Instant::now() + self.interval, self.interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("reconciler received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        self.run_pass().await;
                    }
                }
            }

            info!("reconciler stopped");
        });

        (shutdown_tx, handle)
    }

    /// One full pass over a registry snapshot.
    pub async fn run_pass(&mut self) -> PassReport {
        let start = Instant::now();
        let horizon = Utc::now() - self.lookback;
        let snapshot = self.registry.snapshot().await;
        let mut report = PassReport {
            connections: snapshot.len(),
            ..PassReport::default()
        };

        for entry in &snapshot {
            match self.policy {
                WatermarkPolicy::Shared => {
                    if let Some(messages) = self.fetch(entry, self.watermark, &mut report).await {
                        for message in messages {
                            self.push(entry, message, &mut report).await;
                        }
                    }
                }
                WatermarkPolicy::PerConnection => {
                    let mut cursor = self
                        .cursors
                        .remove(&entry.id)
                        .unwrap_or_else(|| ConnectionCursor::new(entry.registered_at - self.lookback));

                    // A failed fetch leaves the cursor where it was.
                    if let Some(messages) = self.fetch(entry, cursor.since, &mut report).await {
                        let newest = messages.iter().map(|m| m.timestamp).max();
                        for message in messages {
                            if cursor.pushed.contains_key(&message.id) {
                                continue;
                            }
                            // Failed writes are recorded too; they are not retried.
                            cursor.pushed.insert(message.id, message.timestamp);
                            self.push(entry, message, &mut report).await;
                        }
                        cursor.advance(newest, horizon);
                    }
                    self.cursors.insert(entry.id, cursor);
                }
            }
        }

        match self.policy {
            WatermarkPolicy::Shared => self.watermark += chrono_duration(self.interval),
            WatermarkPolicy::PerConnection => {
                self.cursors
                    .retain(|id, _| snapshot.iter().any(|e| e.id == *id));
            }
        }

        let elapsed = start.elapsed();
        metrics::observe_reconcile_pass(elapsed, report.pushed, report.failed_writes);
        debug!(
            connections = report.connections,
            pushed = report.pushed,
            failed_writes = report.failed_writes,
            failed_fetches = report.failed_fetches,
            elapsed_ms = elapsed.as_millis() as u64,
            "reconcile pass completed"
        );
        report
    }

    async fn fetch(
        &self,
        entry: &RegisteredConnection,
        since: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Option<Vec<Message>> {
        match self.store.get_new_messages(&entry.identity, since).await {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!(identity = %entry.identity, error = %e, "couldn't fetch new messages");
                report.failed_fetches += 1;
                None
            }
        }
    }

    async fn push(&self, entry: &RegisteredConnection, message: Message, report: &mut PassReport) {
        let message_id = message.id;
        let frame = OutboundFrame::Message(message);
        match write_frame(entry.connection.as_ref(), &frame, self.write_timeout).await {
            Ok(()) => report.pushed += 1,
            Err(e) => {
                debug!(identity = %entry.identity, message_id, error = %e, "reconcile push failed");
                report.failed_writes += 1;
            }
        }
    }
}
