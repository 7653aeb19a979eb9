//! Engine configuration.

use crate::EntityName;
use std::time::Duration;

/// Entity types a dashboard syncs when none are configured.
pub const DEFAULT_ENTITY_TYPES: &[&str] = &[
    "users",
    "visions",
    "agents",
    "routines",
    "integrations",
    "plans",
    "affiliates",
    "llms",
];

/// Single-record entity types fetched by every full refresh.
pub const DEFAULT_SINGLETON_TYPES: &[&str] = &["platform_config"];

/// Entity types a per-user module sync narrows to the user's own records.
pub const DEFAULT_OWNER_SCOPED_TYPES: &[&str] = &["visions", "agents", "routines"];

/// Exponential backoff for reconnect attempts.
///
/// Attempt `n` (zero-based) waits `base * 2^n`, capped at `max_delay`.
/// After `max_attempts` failed attempts automatic retries stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given attempt, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(
            self.base
                .checked_mul(factor)
                .unwrap_or(self.max_delay)
                .min(self.max_delay),
        )
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Entity types synced by a full refresh
    pub entity_types: Vec<EntityName>,
    /// Types holding one record (the first row) rather than a collection
    pub singleton_types: Vec<EntityName>,
    /// Types a per-user sync filters by `created_by`
    pub owner_scoped_types: Vec<EntityName>,
    /// Bound on one entity type's fetch
    pub fetch_timeout: Duration,
    /// Bound on one upstream write
    pub write_timeout: Duration,
    /// Bound on one reachability check
    pub probe_timeout: Duration,
    /// Minimum spacing between real reachability checks
    pub probe_cooldown: Duration,
    /// Interval of the periodic refresh task
    pub refresh_interval: Duration,
    /// Reconnect backoff
    pub backoff: BackoffPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_types: DEFAULT_ENTITY_TYPES.iter().map(|s| s.to_string()).collect(),
            singleton_types: DEFAULT_SINGLETON_TYPES.iter().map(|s| s.to_string()).collect(),
            owner_scoped_types: DEFAULT_OWNER_SCOPED_TYPES.iter().map(|s| s.to_string()).collect(),
            fetch_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            probe_cooldown: Duration::from_secs(2),
            refresh_interval: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Replace the synced entity types.
    pub fn with_entity_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityName>,
    {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the single-record types.
    pub fn with_singleton_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityName>,
    {
        self.singleton_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_owner_scoped_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityName>,
    {
        self.owner_scoped_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_probe_cooldown(mut self, cooldown: Duration) -> Self {
        self.probe_cooldown = cooldown;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Resolve a caller-supplied entity name to a registered type.
    ///
    /// Exact matches win; otherwise the singular form used by mutation
    /// callers (`routine`) maps to the registered plural (`routines`).
    pub fn resolve_entity(&self, name: &str) -> Option<&EntityName> {
        self.entity_types
            .iter()
            .find(|t| t.as_str() == name)
            .or_else(|| {
                let plural = format!("{name}s");
                self.entity_types.iter().find(|t| **t == plural)
            })
    }

    /// The registered single-record type called `name`, if any.
    pub fn singleton(&self, name: &str) -> Option<&EntityName> {
        self.singleton_types.iter().find(|t| t.as_str() == name)
    }

    pub fn is_owner_scoped(&self, entity_type: &str) -> bool {
        self.owner_scoped_types.iter().any(|t| t == entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.entity_types.len(), 8);
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.backoff.max_attempts, 5);
        assert_eq!(config.singleton("platform_config").unwrap(), "platform_config");
        assert!(config.is_owner_scoped("routines"));
        assert!(!config.is_owner_scoped("users"));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
            max_attempts: 6,
        };

        let delays: Vec<_> = (0..6)
            .map(|n| policy.delay_for(n).unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 20, 20]);
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn backoff_survives_huge_attempts() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: u32::MAX,
        };
        assert_eq!(policy.delay_for(200), Some(Duration::from_secs(60)));
    }

    #[test]
    fn resolves_singular_names() {
        let config = EngineConfig::default();
        assert_eq!(config.resolve_entity("routines").unwrap(), "routines");
        assert_eq!(config.resolve_entity("routine").unwrap(), "routines");
        assert_eq!(config.resolve_entity("llm").unwrap(), "llms");
        assert!(config.resolve_entity("widget").is_none());
        assert!(config.resolve_entity("platform_config").is_none());
    }

    #[test]
    fn builder_setters() {
        let config = EngineConfig::default()
            .with_entity_types(["users", "plans"])
            .with_fetch_timeout(Duration::from_millis(50))
            .with_probe_cooldown(Duration::ZERO);

        assert_eq!(config.entity_types, vec!["users", "plans"]);
        assert_eq!(config.fetch_timeout, Duration::from_millis(50));
        assert_eq!(config.probe_cooldown, Duration::ZERO);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_backoff_monotonic_and_capped(
                base_ms in 1u64..5_000,
                max_ms in 1u64..120_000,
                attempts in 1u32..64,
            ) {
                let policy = BackoffPolicy {
                    base: Duration::from_millis(base_ms),
                    max_delay: Duration::from_millis(max_ms),
                    max_attempts: attempts,
                };
                let mut previous = Duration::ZERO;
                for n in 0..attempts {
                    let delay = policy.delay_for(n).unwrap();
                    prop_assert!(delay >= previous);
                    prop_assert!(delay <= policy.max_delay);
                    previous = delay;
                }
                prop_assert_eq!(policy.delay_for(attempts), None);
            }
        }
    }
}
