//! Library crate for pixel-canvas-back, exposing modules for binaries and integration tests.

/// WebSocket client keeping a local replica of the canvas.
pub mod client;
/// Runtime configuration.
pub mod config;
/// Storage backends and persisted models.
pub mod dao;
/// Wire payloads.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP and WebSocket routes.
pub mod routes;
/// Canvas, presence and admin behaviour.
pub mod services;
/// Shared in-memory state.
pub mod state;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the top-level router and attach cross-cutting middleware layers.
pub fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
