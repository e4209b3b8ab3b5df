use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::AppError;
use crate::services::reconciler::WatermarkPolicy;

pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-name";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub interval: Duration,
    pub watermark: WatermarkPolicy,
    /// How far before a connection's registration its first cursor starts.
    pub lookback: Duration,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Upper bound for a single frame write, live or during reconciliation.
    pub write_timeout: Duration,
    /// Frames a session may have queued before writes to it count as failed.
    pub mailbox_capacity: usize,
    /// Request header carrying the username authenticated by the gateway.
    pub identity_header: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `None` runs on the in-memory store (local development only).
    pub database: Option<DatabaseConfig>,
    pub reconcile: ReconcileConfig,
    pub websocket: WebSocketConfig,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name}: {e}"))),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = parse_var("PORT", 8013u16)?;

        let database = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10u32)?,
                run_migrations: parse_var("RUN_MIGRATIONS", false)?,
            }),
            _ => None,
        };

        let interval_secs = parse_var("RECONCILE_INTERVAL_SECS", 5u64)?;
        if interval_secs == 0 {
            return Err(AppError::Config(
                "RECONCILE_INTERVAL_SECS must be greater than zero".into(),
            ));
        }
        let reconcile = ReconcileConfig {
            interval: Duration::from_secs(interval_secs),
            watermark: parse_var("RECONCILE_WATERMARK", WatermarkPolicy::PerConnection)?,
            lookback: Duration::from_secs(parse_var("RECONCILE_LOOKBACK_SECS", interval_secs)?),
        };

        let mailbox_capacity = parse_var("WS_MAILBOX_CAPACITY", 256usize)?;
        if mailbox_capacity == 0 {
            return Err(AppError::Config(
                "WS_MAILBOX_CAPACITY must be greater than zero".into(),
            ));
        }
        let websocket = WebSocketConfig {
            write_timeout: Duration::from_millis(parse_var("WS_WRITE_TIMEOUT_MS", 2_000u64)?),
            mailbox_capacity,
            identity_header: env::var("IDENTITY_HEADER")
                .ok()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_IDENTITY_HEADER.to_string()),
        };

        Ok(Self {
            port,
            database,
            reconcile,
            websocket,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            port: 8013,
            database: None,
            reconcile: ReconcileConfig {
                interval: Duration::from_secs(5),
                watermark: WatermarkPolicy::PerConnection,
                lookback: Duration::from_secs(5),
            },
            websocket: WebSocketConfig {
                write_timeout: Duration::from_millis(200),
                mailbox_capacity: 16,
                identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_falls_back_on_missing() {
        let value: u64 = parse_var("DELIVERY_HUB_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("DELIVERY_HUB_TEST_GARBAGE_VAR", "five");
        let result: Result<u64, _> = parse_var("DELIVERY_HUB_TEST_GARBAGE_VAR", 5);
        env::remove_var("DELIVERY_HUB_TEST_GARBAGE_VAR");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_defaults_are_usable() {
        let cfg = Config::test_defaults();
        assert!(cfg.database.is_none());
        assert_eq!(cfg.reconcile.interval, Duration::from_secs(5));
        assert_eq!(cfg.websocket.identity_header, DEFAULT_IDENTITY_HEADER);
    }
}
