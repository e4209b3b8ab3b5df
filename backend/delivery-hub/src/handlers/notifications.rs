use actix_web::{web, HttpResponse};

use super::{delivery_response, ApiResponse};
use crate::error::Result;
use crate::middleware::AuthenticatedUser;
use crate::models::{Notification, WebEnvelope};
use crate::state::AppState;

/// Route a notification produced by another platform service
///
/// POST /internal/v1/notifications
pub async fn push_notification(
    state: web::Data<AppState>,
    envelope: web::Json<WebEnvelope>,
) -> Result<HttpResponse> {
    let result = state
        .notifications
        .send_notification(envelope.into_inner())
        .await;
    delivery_response(result, |n: &Notification| n.id)
}

/// Notifications of the authenticated caller, newest first
///
/// GET /api/v1/notifications
pub async fn list_notifications(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    let notifications = state.notifications.pending_for(user.username()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notifications)))
}

/// DELETE /api/v1/notifications/{id}
pub async fn delete_notification(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    state
        .notifications
        .delete(path.into_inner(), user.username())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/internal/v1/notifications",
        web::post().to(push_notification),
    )
    .service(
        web::scope("/api/v1/notifications")
            .route("", web::get().to(list_notifications))
            .route("/{id}", web::delete().to(delete_notification)),
    );
}
