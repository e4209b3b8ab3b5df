/// HTTP handlers of the delivery hub
pub mod messages;
pub mod notifications;
pub mod websocket;

use actix_web::HttpResponse;
use serde::Serialize;

use crate::error::{AppError, HubError};
use crate::websocket::DeliveryStatus;

pub use messages::register_routes as register_messages;
pub use notifications::register_routes as register_notifications;
pub use websocket::register_routes as register_websocket;

/// Success envelope; failures are rendered by [`AppError`] instead.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

/// Body of a routed send: where the event ended up.
#[derive(Debug, Serialize)]
pub struct DeliveryOutcome<T> {
    pub status: DeliveryStatus,
    pub stored_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<T>,
}

/// 200 when pushed live, 202 when only stored; every other outcome is an error.
pub(crate) fn delivery_response<T, F>(
    result: Result<T, HubError>,
    stored_id: F,
) -> Result<HttpResponse, AppError>
where
    T: Serialize,
    F: FnOnce(&T) -> i64,
{
    match result {
        Ok(entity) => Ok(HttpResponse::Ok().json(ApiResponse::ok(DeliveryOutcome {
            status: DeliveryStatus::Delivered,
            stored_id: stored_id(&entity),
            entity: Some(entity),
        }))),
        Err(HubError::TargetOffline { stored_id, .. }) => {
            Ok(HttpResponse::Accepted().json(ApiResponse::ok(DeliveryOutcome::<T> {
                status: DeliveryStatus::StoredOffline,
                stored_id,
                entity: None,
            })))
        }
        Err(e) => Err(e.into()),
    }
}
