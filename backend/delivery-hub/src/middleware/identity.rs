use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};

use crate::config::DEFAULT_IDENTITY_HEADER;
use crate::error::AppError;
use crate::state::AppState;

/// Username the platform gateway authenticated for this request.
///
/// Taken verbatim from the configured identity header; requests without it
/// are rejected with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn username(&self) -> &str {
        &self.0
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let header = req
            .app_data::<web::Data<AppState>>()
            .map(|state| state.config.websocket.identity_header.as_str())
            .unwrap_or(DEFAULT_IDENTITY_HEADER);

        let user = req
            .headers()
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AuthenticatedUser(v.to_string()))
            .ok_or(AppError::Unauthorized);

        ready(user)
    }
}
