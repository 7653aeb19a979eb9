//! Mutation types for writes to the upstream.
//!
//! A write is first attempted directly. Only when the upstream cannot be
//! reached does it become a [`PendingMutation`] in the offline queue.

use crate::{EntityName, MutationId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A write request handed to the upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityWrite {
    /// Registered entity type (collection name) the write targets
    pub entity_type: EntityName,
    /// Kind of write
    pub operation: MutationOp,
    /// Target record; `None` for creates that let the upstream assign an id
    pub record_id: Option<RecordId>,
    /// Fields to write (the patch for updates, the full record for creates)
    pub payload: Map<String, Value>,
}

impl EntityWrite {
    /// Create a new write.
    pub fn new(
        entity_type: impl Into<EntityName>,
        operation: MutationOp,
        record_id: Option<RecordId>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation,
            record_id,
            payload,
        }
    }
}

/// A mutation waiting in the offline queue, before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMutation {
    /// Entity name as given by the caller (e.g. `routine`)
    pub entity_type: EntityName,
    /// Kind of write
    pub operation: MutationOp,
    /// Target record, if any
    pub record_id: Option<RecordId>,
    /// Fields to write
    pub payload: Map<String, Value>,
}

impl NewMutation {
    /// Create a new mutation.
    pub fn new(
        entity_type: impl Into<EntityName>,
        operation: MutationOp,
        record_id: Option<RecordId>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation,
            record_id,
            payload,
        }
    }
}

/// A queued write that failed because the upstream was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    /// Monotonic queue id
    pub id: MutationId,
    /// Entity name as given by the caller
    pub entity_type: EntityName,
    /// Kind of write
    pub operation: MutationOp,
    /// Target record, if any
    pub record_id: Option<RecordId>,
    /// Fields to write
    pub payload: Map<String, Value>,
    /// When the mutation was queued
    pub enqueued_at: DateTime<Utc>,
}

impl PendingMutation {
    /// Assign an id and timestamp to a new mutation.
    pub fn from_new(id: MutationId, mutation: NewMutation, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            entity_type: mutation.entity_type,
            operation: mutation.operation,
            record_id: mutation.record_id,
            payload: mutation.payload,
            enqueued_at,
        }
    }

    /// The upstream write this mutation replays as, against the resolved
    /// entity type.
    pub fn to_write(&self, entity_type: impl Into<EntityName>) -> EntityWrite {
        EntityWrite::new(
            entity_type,
            self.operation,
            self.record_id.clone(),
            self.payload.clone(),
        )
    }

    /// Payload as a JSON value.
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}
