use actix_web::{web, HttpResponse};
use serde::Deserialize;

use super::delivery_response;
use crate::error::{AppError, Result};
use crate::middleware::AuthenticatedUser;
use crate::models::Message;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub chat_id: i64,
    pub target_username: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadPayload {
    pub chat_id: i64,
    pub message_id: i64,
    pub target_username: String,
}

/// Send a chat message as the authenticated caller
///
/// POST /api/v1/messages
pub async fn send_message(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<SendMessagePayload>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    if body.target_username.trim().is_empty() {
        return Err(AppError::BadRequest("target_username is required".into()));
    }

    let message = Message::new(body.chat_id, user.username(), body.message);
    let result = state.messages.send(message, &body.target_username).await;
    delivery_response(result, |m: &Message| m.id)
}

/// POST /api/v1/messages/read
pub async fn mark_read(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<MarkReadPayload>,
) -> Result<HttpResponse> {
    state
        .messages
        .mark_read(
            body.message_id,
            body.chat_id,
            &body.target_username,
            user.username(),
        )
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/messages")
            .route("", web::post().to(send_message))
            .route("/read", web::post().to(mark_read)),
    );
}
