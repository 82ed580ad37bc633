pub mod account;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use manda_worker::MandaWorker;

pub use auth::{Claims, JwtManager};
pub use config::Config;
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<MandaWorker>,
    pub jwt: JwtManager,
    /// Lifetime of tokens issued at login and registration.
    pub token_ttl_secs: i64,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(ws::ws_handler))
        .route("/auth/register", post(account::register))
        .route("/auth/login", post(account::login))
        .route("/users/profile", get(account::profile))
        .route(
            "/whatsapp/instances",
            post(routes::create_instance).get(routes::list_instances),
        )
        .route(
            "/whatsapp/instances/{id}",
            get(routes::get_instance).delete(routes::delete_instance),
        )
        .route("/whatsapp/instances/{id}/connect", post(routes::connect_instance))
        .route("/whatsapp/instances/{id}/disconnect", post(routes::disconnect_instance))
        .route("/whatsapp/instances/{id}/messages", get(routes::get_messages))
        .route("/whatsapp/instances/{id}/send-message", post(routes::send_message))
        .route("/whatsapp/instances/{id}/contacts", get(routes::get_contacts))
        .route("/whatsapp/instances/{id}/auth-stats", get(routes::auth_stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
