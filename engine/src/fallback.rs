//! Placeholder data for a cold start without connectivity.
//!
//! The engine only installs this when the upstream is confirmed unreachable
//! and nothing real has been cached yet. See [`CacheSnapshot::install_fallback`]
//! for the precedence rule.
//!
//! [`CacheSnapshot::install_fallback`]: crate::CacheSnapshot::install_fallback

use crate::{EntityCollection, EntityName, Record};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Supplies a deterministic placeholder dataset.
pub trait FallbackDataProvider: Send + Sync {
    /// Placeholder collections for every requested entity type. Each
    /// collection is non-empty.
    fn snapshot(&self, entity_types: &[EntityName]) -> BTreeMap<EntityName, EntityCollection>;
}

/// Built-in dashboard placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFallback;

impl FallbackDataProvider for StaticFallback {
    fn snapshot(&self, entity_types: &[EntityName]) -> BTreeMap<EntityName, EntityCollection> {
        entity_types
            .iter()
            .map(|entity_type| (entity_type.clone(), placeholder_collection(entity_type)))
            .collect()
    }
}

fn placeholder_collection(entity_type: &str) -> EntityCollection {
    placeholder_rows(entity_type)
        .into_iter()
        .filter_map(|row| Record::from_value(row).ok())
        .collect()
}

fn placeholder_rows(entity_type: &str) -> Vec<Value> {
    match entity_type {
        "agents" => vec![
            json!({"id": 1, "name": "Vision Alpha", "status": "active", "type": "assistant", "interactions": 1250}),
            json!({"id": 2, "name": "Vision Beta", "status": "active", "type": "automation", "interactions": 890}),
            json!({"id": 3, "name": "Vision Gamma", "status": "inactive", "type": "analysis", "interactions": 456}),
            json!({"id": 4, "name": "Vision Delta", "status": "active", "type": "support", "interactions": 2100}),
            json!({"id": 5, "name": "Vision Echo", "status": "active", "type": "monitoring", "interactions": 678}),
        ],
        "visions" => vec![
            json!({"id": 1, "name": "Questao", "status": "active", "total_interactions": 530, "personality": "analytical"}),
            json!({"id": 2, "name": "Echo", "status": "active", "total_interactions": 230, "personality": "friendly"}),
            json!({"id": 3, "name": "Social", "status": "active", "total_interactions": 220, "personality": "social"}),
            json!({"id": 4, "name": "Nova", "status": "active", "total_interactions": 180, "personality": "creative"}),
            json!({"id": 5, "name": "Auto", "status": "inactive", "total_interactions": 100, "personality": "efficient"}),
        ],
        "users" => vec![
            json!({"id": 1, "name": "Admin", "role": "administrator", "plan_id": "3", "last_active": "2024-01-15T10:30:00Z"}),
            json!({"id": 2, "name": "User1", "role": "user", "plan_id": "1", "last_active": "2024-01-15T09:15:00Z"}),
            json!({"id": 3, "name": "User2", "role": "user", "plan_id": "2", "last_active": "2024-01-14T16:45:00Z"}),
        ],
        "routines" => vec![
            json!({"id": 1, "name": "Morning briefing", "is_active": true, "schedule": "0 8 * * *"}),
            json!({"id": 2, "name": "Weekly report", "is_active": true, "schedule": "0 18 * * 5"}),
            json!({"id": 3, "name": "Inbox cleanup", "is_active": false, "schedule": "0 22 * * *"}),
        ],
        "plans" => vec![
            json!({"id": 1, "name": "Free", "price": 0}),
            json!({"id": 2, "name": "Pro", "price": 49.9}),
            json!({"id": 3, "name": "Enterprise", "price": 199.9}),
        ],
        "integrations" => vec![
            json!({"id": 1, "name": "WhatsApp", "status": "connected"}),
            json!({"id": 2, "name": "Google Calendar", "status": "disconnected"}),
        ],
        "affiliates" => vec![
            json!({"id": 1, "name": "Partner One", "commission_rate": 0.2, "status": "active"}),
        ],
        "llms" => vec![
            json!({"id": 1, "name": "default", "provider": "openrouter", "is_active": true}),
        ],
        other => vec![json!({"id": "placeholder-1", "name": format!("{other} (offline)")})],
    }
}
