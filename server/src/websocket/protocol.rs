//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handlers::{DrainSummary, OutcomeSummary, SyncSummary};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Run (or join) a full refresh.
    Sync {
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Refresh one entity type, optionally for one user.
    SyncModule {
        entity_type: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Skip the reconnect backoff and refresh now.
    Retry {
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Replay queued writes.
    Flush {
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// An engine event, forwarded as published.
    Event {
        /// Topic wire name (`data_refresh`, `agents_updated`, ...)
        topic: String,
        payload: Value,
    },

    /// Response to `sync` or `retry`.
    SyncResult {
        report: SyncSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to `sync_module`.
    ModuleResult {
        outcome: OutcomeSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to `flush`.
    FlushResult {
        drained: DrainSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID of the message being answered, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Wrap an engine event for the wire.
    pub fn event(topic: impl Into<String>, payload: Value) -> Self {
        ServerMessage::Event {
            topic: topic.into(),
            payload,
        }
    }
}
