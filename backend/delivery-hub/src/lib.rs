pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod websocket;

use actix_web::{web, HttpResponse};

pub use config::Config;
pub use error::{AppError, HubError, Result};
pub use services::{MessageRouter, NotificationRouter, Reconciler};
pub use state::AppState;
pub use websocket::{ConnectionRegistry, WsSession};

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "delivery-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.len().await,
    }))
}

/// Every route the service exposes. Expects `web::Data<AppState>` to be registered.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .configure(handlers::register_websocket)
        .configure(handlers::register_messages)
        .configure(handlers::register_notifications);
}
