//! Sync endpoint routes.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dashsync_engine::{CacheSnapshot, ConnectivityState, DashboardStats, DataSource, PendingMutation};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::handlers::{
    handle_flush, handle_retry, handle_sync_all, handle_sync_module, DrainSummary,
    OutcomeSummary, SyncSummary,
};
use crate::AppState;

/// Engine status at a glance.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connectivity: ConnectivityState,
    pub refresh_in_progress: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_mutations: usize,
    pub background_tasks: bool,
    /// Where each cached collection came from
    pub sources: BTreeMap<String, DataSource>,
}

/// Query parameters for `POST /sync/{entity_type}`.
#[derive(Debug, Default, Deserialize)]
pub struct ModuleParams {
    /// Narrow owner-scoped types to this user's records
    pub user_id: Option<String>,
}

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status_handler))
        .route("/stats", get(stats_handler))
        .route("/cache", get(cache_handler))
        .route("/pending", get(pending_handler))
        .route("/sync", post(sync_all_handler))
        .route("/sync/{entity_type}", post(sync_module_handler))
        .route("/retry", post(retry_handler))
        .route("/flush", post(flush_handler))
}

/// GET /status
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let engine = &state.engine;
    let cache = engine.cache();

    Json(StatusResponse {
        connectivity: engine.connectivity(),
        refresh_in_progress: engine.is_refreshing(),
        last_sync: cache.last_sync,
        pending_mutations: engine.pending_count(),
        background_tasks: engine.is_started(),
        sources: cache.provenance.clone(),
    })
}

/// GET /stats - Dashboard figures derived from the cache.
async fn stats_handler(State(state): State<AppState>) -> Json<DashboardStats> {
    Json(state.engine.get_stats())
}

/// GET /cache - The full cache snapshot.
async fn cache_handler(State(state): State<AppState>) -> Json<CacheSnapshot> {
    Json(CacheSnapshot::clone(&state.engine.cache()))
}

/// GET /pending - Writes waiting for the upstream.
async fn pending_handler(State(state): State<AppState>) -> Json<Vec<PendingMutation>> {
    Json(state.engine.pending_mutations())
}

/// POST /sync - Run (or join) a full refresh.
async fn sync_all_handler(State(state): State<AppState>) -> Json<SyncSummary> {
    Json(handle_sync_all(&state.engine).await)
}

/// POST /sync/{entity_type}?user_id= - Refresh one entity type.
async fn sync_module_handler(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    Query(params): Query<ModuleParams>,
) -> Result<Json<OutcomeSummary>> {
    let outcome =
        handle_sync_module(&state.engine, &entity_type, params.user_id.as_deref()).await?;
    Ok(Json(outcome))
}

/// POST /retry - Skip the reconnect backoff.
async fn retry_handler(State(state): State<AppState>) -> Json<SyncSummary> {
    Json(handle_retry(&state.engine).await)
}

/// POST /flush - Replay queued writes.
async fn flush_handler(State(state): State<AppState>) -> Result<Json<DrainSummary>> {
    let drained = handle_flush(&state.engine).await?;
    Ok(Json(drained))
}
