use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;
use crate::websocket::ConnectionError;

pub type Result<T> = std::result::Result<T, AppError>;

/// Outcome taxonomy of the delivery core.
///
/// Every variant after persistence carries the id the event was stored under,
/// so callers can still reference it when live delivery did not happen.
#[derive(Debug, Error)]
pub enum HubError {
    /// Recipient has no live connection; the event is already stored.
    #[error("target user {identity} is offline")]
    TargetOffline { identity: String, stored_id: i64 },

    /// Write to the recipient's live connection failed; the connection was torn down.
    #[error("couldn't deliver to {identity}: {source}")]
    DeliveryFailure {
        identity: String,
        stored_id: i64,
        #[source]
        source: ConnectionError,
    },

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl HubError {
    /// `TargetOffline` is a status, not a failure: the event is durable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HubError::TargetOffline { .. })
    }

    /// Stable machine-readable code used in error frames and JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::TargetOffline { .. } => "target_offline",
            HubError::DeliveryFailure { .. } => "delivery_failure",
            HubError::PersistenceFailure(_) => "persistence_failure",
            HubError::MalformedEnvelope(_) => "malformed_envelope",
            HubError::UnknownMessageType(_) => "unknown_message_type",
            HubError::BadRequest(_) => "bad_request",
        }
    }

    /// Id of the stored event, when persistence already happened.
    pub fn stored_id(&self) -> Option<i64> {
        match self {
            HubError::TargetOffline { stored_id, .. }
            | HubError::DeliveryFailure { stored_id, .. } => Some(*stored_id),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => AppError::NotFound,
            other => AppError::Storage(other),
        }
    }
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound => "not_found",
            AppError::Hub(e) => e.code(),
            AppError::Storage(_) => "storage_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Hub(e) => match e {
                HubError::TargetOffline { .. } => StatusCode::ACCEPTED,
                HubError::DeliveryFailure { .. } => StatusCode::BAD_GATEWAY,
                HubError::MalformedEnvelope(_)
                | HubError::UnknownMessageType(_)
                | HubError::BadRequest(_) => StatusCode::BAD_REQUEST,
                HubError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Config(_) | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }))
    }
}
