/// Websocket ingress and registry introspection
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;
use crate::websocket::WsSession;

/// Upgrade an authenticated request to a websocket session
///
/// Endpoint: GET /ws
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    tracing::debug!(identity = %user.username(), "websocket upgrade requested");

    let session = WsSession::new(
        user.0,
        state.registry.clone(),
        state.dispatcher.clone(),
        state.config.websocket.mailbox_capacity,
    );

    ws::start(session, &req, stream)
        .map_err(|e| AppError::BadRequest(format!("websocket handshake failed: {e}")))
}

/// Endpoint: GET /api/v1/ws/status/{username}
pub async fn ws_status(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let username = path.into_inner();
    let connected = state.registry.contains(&username).await;

    Ok(HttpResponse::Ok().json(json!({
        "username": username,
        "connected": connected,
    })))
}

/// Endpoint: GET /api/v1/ws/users
pub async fn list_connected_users(state: web::Data<AppState>) -> Result<HttpResponse> {
    let users = state.registry.connected_identities().await;

    Ok(HttpResponse::Ok().json(json!({
        "count": users.len(),
        "users": users,
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_connect)).service(
        web::scope("/api/v1/ws")
            .route("/status/{username}", web::get().to(ws_status))
            .route("/users", web::get().to(list_connected_users)),
    );
}
