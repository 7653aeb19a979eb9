//! Entity collection routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use dashsync_engine::EntityCollection;
use serde_json::Value;

use crate::error::Result;
use crate::handlers::{
    handle_collection, handle_create, handle_delete, handle_update, MutationResponse,
};
use crate::AppState;

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/entities/{entity}", get(list_handler).post(create_handler))
        .route(
            "/entities/{entity}/{id}",
            patch(update_handler).delete(delete_handler),
        )
}

/// GET /entities/{entity} - Cached collection.
async fn list_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<EntityCollection>> {
    Ok(Json(handle_collection(&state.engine, &entity)?))
}

/// POST /entities/{entity}
async fn create_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<MutationResponse>)> {
    let response = handle_create(&state.engine, &entity, body).await?;
    let status = match response {
        MutationResponse::Applied { .. } => StatusCode::CREATED,
        MutationResponse::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(response)))
}

/// PATCH /entities/{entity}/{id}
async fn update_handler(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<MutationResponse>)> {
    let response = handle_update(&state.engine, &entity, id, body).await?;
    Ok((response.status_code(), Json(response)))
}

/// DELETE /entities/{entity}/{id}
async fn delete_handler(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<MutationResponse>)> {
    let response = handle_delete(&state.engine, &entity, id).await?;
    Ok((response.status_code(), Json(response)))
}
