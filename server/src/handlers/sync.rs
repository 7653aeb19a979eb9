//! Sync handlers shared by the HTTP routes and the WebSocket protocol.

use dashsync_engine::{DrainReport, SyncEngine, SyncOutcome, SyncReport};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wire form of one entity type's refresh result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeSummary {
    Updated { entity_type: String, count: usize },
    Failed { entity_type: String, error: String },
    Stale { entity_type: String },
}

impl From<&SyncOutcome> for OutcomeSummary {
    fn from(outcome: &SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Updated { entity_type, count } => OutcomeSummary::Updated {
                entity_type: entity_type.clone(),
                count: *count,
            },
            SyncOutcome::Failed { entity_type, error } => OutcomeSummary::Failed {
                entity_type: entity_type.clone(),
                error: error.to_string(),
            },
            SyncOutcome::Stale { entity_type } => OutcomeSummary::Stale {
                entity_type: entity_type.clone(),
            },
        }
    }
}

/// Wire form of a queue drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainSummary {
    pub applied: usize,
    pub remaining: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_on: Option<String>,
}

impl From<&DrainReport> for DrainSummary {
    fn from(report: &DrainReport) -> Self {
        Self {
            applied: report.applied,
            remaining: report.remaining,
            halted_on: report.halted_on.as_ref().map(ToString::to_string),
        }
    }
}

/// Wire form of a full refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub cycle: u64,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drained: Option<DrainSummary>,
    pub outcomes: Vec<OutcomeSummary>,
    /// Single-record types such as `platform_config`
    pub singletons: Vec<OutcomeSummary>,
    pub fallback_installed: bool,
    pub aborted: bool,
}

impl From<&SyncReport> for SyncSummary {
    fn from(report: &SyncReport) -> Self {
        Self {
            cycle: report.cycle,
            reachable: report.reachability.is_reachable(),
            drained: report.drained.as_ref().map(DrainSummary::from),
            outcomes: report.outcomes.iter().map(OutcomeSummary::from).collect(),
            singletons: report.singletons.iter().map(OutcomeSummary::from).collect(),
            fallback_installed: report.fallback_installed,
            aborted: report.aborted,
        }
    }
}

/// Run (or join) a full refresh.
pub async fn handle_sync_all(engine: &SyncEngine) -> SyncSummary {
    let report = engine.sync_all().await;
    tracing::info!(
        cycle = report.cycle,
        updated = report.updated(),
        aborted = report.aborted,
        "Sync requested"
    );
    SyncSummary::from(&report)
}

/// Refresh a single entity type, narrowed to one user's records when
/// `user_id` is given.
pub async fn handle_sync_module(
    engine: &SyncEngine,
    entity_type: &str,
    user_id: Option<&str>,
) -> Result<OutcomeSummary> {
    let outcome = match user_id {
        Some(user_id) => engine.sync_module_for(entity_type, user_id).await?,
        None => engine.sync_module(entity_type).await?,
    };
    Ok(OutcomeSummary::from(&outcome))
}

/// Skip any remaining reconnect backoff and refresh now.
pub async fn handle_retry(engine: &SyncEngine) -> SyncSummary {
    SyncSummary::from(&engine.retry_now().await)
}

/// Replay queued writes without a full refresh.
pub async fn handle_flush(engine: &SyncEngine) -> Result<DrainSummary> {
    let report = engine.flush_pending().await?;
    Ok(DrainSummary::from(&report))
}
