//! Dashboard figures derived from a cache snapshot.

use crate::CacheSnapshot;
use serde::{Deserialize, Serialize};

/// Headline numbers shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: usize,
    pub active_visions: usize,
    pub total_agents: usize,
    pub active_routines: usize,
    pub total_revenue: f64,
    pub total_affiliates: usize,
    pub total_interactions: f64,
}

/// Compute dashboard stats. Pure; no I/O.
///
/// Every figure is zero unless users, visions, agents, routines, plans and
/// affiliates are all cached.
pub fn compute(cache: &CacheSnapshot) -> DashboardStats {
    let (Some(users), Some(visions), Some(agents), Some(routines), Some(plans), Some(affiliates)) = (
        cache.collection("users"),
        cache.collection("visions"),
        cache.collection("agents"),
        cache.collection("routines"),
        cache.collection("plans"),
        cache.collection("affiliates"),
    ) else {
        return DashboardStats::default();
    };

    let total_revenue = users
        .iter()
        .filter_map(|user| {
            let plan_id = match user.get("plan_id")? {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            plans.get(&plan_id)?.number_field("price")
        })
        .sum();

    DashboardStats {
        total_users: users.len(),
        active_visions: visions
            .iter()
            .filter(|v| v.str_field("status") == Some("active"))
            .count(),
        total_agents: agents.len(),
        active_routines: routines.iter().filter(|r| r.is_truthy("is_active")).count(),
        total_revenue,
        total_affiliates: affiliates.len(),
        total_interactions: visions
            .iter()
            .filter_map(|v| v.number_field("total_interactions"))
            .sum(),
    }
}
