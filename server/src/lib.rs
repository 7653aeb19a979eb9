//! Dashboard sync server.
//!
//! Hosts a [`SyncEngine`] against a REST upstream and exposes it to local
//! dashboards: HTTP routes for reads, writes and manual refreshes, and a
//! WebSocket stream carrying every engine event.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod upstream;
pub mod websocket;

use crate::config::Config;
use crate::websocket::ConnectionManager;
use axum::Router;
use dashsync_engine::SyncEngine;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

/// Build the router with tracing and permissive CORS.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
