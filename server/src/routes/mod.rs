//! HTTP route definitions.

mod entities;
mod health;
mod sync;

use crate::handlers::ws_handler;
use crate::AppState;
use axum::{routing::get, Router};

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(sync::routes())
        .merge(entities::routes())
        .route("/ws", get(ws_handler))
}
