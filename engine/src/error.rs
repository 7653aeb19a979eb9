//! Error types for the sync engine.

use crate::{EntityName, MutationId};
use thiserror::Error;

/// All possible errors from the sync engine.
///
/// None of these are fatal to the host process. Fetch failures degrade a
/// type to its last known good collection, replay failures leave the queue
/// intact, and listener panics are isolated by the bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Connectivity errors
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("fetch failed for '{entity_type}': {reason}")]
    PartialFetchFailure { entity_type: EntityName, reason: String },

    #[error("replay of pending mutation {mutation_id} failed: {reason}")]
    MutationReplayFailure {
        mutation_id: MutationId,
        reason: String,
    },

    #[error("listener for topic '{topic}' panicked: {message}")]
    ListenerException { topic: String, message: String },

    // Request errors
    #[error("unknown entity type: {0}")]
    UnknownEntityType(EntityName),

    #[error("upstream rejected the write: {0}")]
    Rejected(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    // State errors
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
