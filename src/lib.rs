// Public API for integration tests and the client binary

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod notifier;
pub mod protocol;
pub mod reaper;
pub mod state;
pub mod types;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the server's router over shared room state
pub fn router(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/rooms/{room_id}", get(api::get_room))
        .route("/api/health", get(api::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
