//! Entity read and write handlers.

use axum::http::StatusCode;
use dashsync_engine::{EntityCollection, MutationOutcome, PendingMutation, Record, SyncEngine};
use serde::Serialize;
use serde_json::{Map, Value};

use super::OutcomeSummary;
use crate::error::{AppError, Result};

/// Result of a write request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationResponse {
    /// The upstream accepted the write.
    Applied {
        #[serde(skip_serializing_if = "Option::is_none")]
        record: Option<Record>,
        refresh: OutcomeSummary,
    },
    /// The upstream was unreachable; the write waits in the offline queue.
    Queued {
        mutation: PendingMutation,
        pending: usize,
    },
}

impl MutationResponse {
    /// `202 Accepted` for queued writes, `200 OK` otherwise.
    pub fn status_code(&self) -> StatusCode {
        match self {
            MutationResponse::Applied { .. } => StatusCode::OK,
            MutationResponse::Queued { .. } => StatusCode::ACCEPTED,
        }
    }
}

impl From<MutationOutcome> for MutationResponse {
    fn from(outcome: MutationOutcome) -> Self {
        match outcome {
            MutationOutcome::Applied { record, refresh } => MutationResponse::Applied {
                record,
                refresh: OutcomeSummary::from(&refresh),
            },
            MutationOutcome::Queued { mutation, pending } => {
                MutationResponse::Queued { mutation, pending }
            }
        }
    }
}

/// Cached collection for an entity type (singular names resolve too).
pub fn handle_collection(engine: &SyncEngine, entity: &str) -> Result<EntityCollection> {
    let entity_type = engine
        .config()
        .resolve_entity(entity)
        .ok_or_else(|| AppError::NotFound(format!("unknown entity type: {entity}")))?;

    Ok(engine
        .cache()
        .collection(entity_type)
        .cloned()
        .unwrap_or_default())
}

pub async fn handle_create(engine: &SyncEngine, entity: &str, body: Value) -> Result<MutationResponse> {
    let payload = into_object(body)?;
    Ok(engine.create_entity(entity, payload).await?.into())
}

pub async fn handle_update(
    engine: &SyncEngine,
    entity: &str,
    id: String,
    body: Value,
) -> Result<MutationResponse> {
    let patch = into_object(body)?;
    Ok(engine.update_entity(entity, id, patch).await?.into())
}

pub async fn handle_delete(engine: &SyncEngine, entity: &str, id: String) -> Result<MutationResponse> {
    Ok(engine.delete_entity(entity, id).await?.into())
}

fn into_object(body: Value) -> Result<Map<String, Value>> {
    match body {
        Value::Object(fields) => Ok(fields),
        other => Err(AppError::BadRequest(format!(
            "request body must be a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
