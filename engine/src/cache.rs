//! The entity cache observed by every UI subscriber.
//!
//! A [`CacheSnapshot`] is an immutable, point-in-time view. The engine keeps
//! the current snapshot behind an `Arc` and swaps or patches it copy-on-write,
//! so observers holding an older snapshot are never affected by later syncs.

use crate::{EntityCollection, EntityName, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Connectivity as last observed by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// No probe has completed yet
    #[default]
    Unknown,
    /// A reachability check is in flight
    Probing,
    /// Last probe reached the upstream
    Online,
    /// Last probe could not reach the upstream
    Offline,
}

impl ConnectivityState {
    /// Whether this is a settled state (online or offline).
    pub fn is_settled(self) -> bool {
        matches!(self, ConnectivityState::Online | ConnectivityState::Offline)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::Unknown => "unknown",
            ConnectivityState::Probing => "probing",
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Where a cached collection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Fetched from the upstream
    Remote,
    /// Synthetic placeholder data installed while offline on a cold start
    Fallback,
}

/// A point-in-time view of every cached entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Collections keyed by entity type
    pub collections: BTreeMap<EntityName, EntityCollection>,
    /// Provenance of each collection
    pub provenance: BTreeMap<EntityName, DataSource>,
    /// Single-record types; absent until fetched, or when the upstream has
    /// no row
    #[serde(default)]
    pub singletons: BTreeMap<EntityName, Record>,
    /// When the last full refresh finished
    pub last_sync: Option<DateTime<Utc>>,
    /// Connectivity as of the last probe
    pub connectivity: ConnectivityState,
    /// Whether a full refresh is running
    pub refresh_in_progress: bool,
}

impl CacheSnapshot {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a collection by entity type.
    pub fn collection(&self, entity_type: &str) -> Option<&EntityCollection> {
        self.collections.get(entity_type)
    }

    /// Get a record by entity type and ID.
    pub fn record(&self, entity_type: &str, id: &str) -> Option<&Record> {
        self.collection(entity_type)?.get(id)
    }

    /// The record of a single-record type such as `platform_config`.
    pub fn singleton(&self, name: &str) -> Option<&Record> {
        self.singletons.get(name)
    }

    /// Replace a single-record type. `None` clears it.
    pub fn set_singleton(&mut self, name: impl Into<EntityName>, record: Option<Record>) {
        let name = name.into();
        match record {
            Some(record) => {
                self.singletons.insert(name, record);
            }
            None => {
                self.singletons.remove(&name);
            }
        }
    }

    /// Provenance of a collection, if cached.
    pub fn source_of(&self, entity_type: &str) -> Option<DataSource> {
        self.provenance.get(entity_type).copied()
    }

    /// True once any collection has been fetched from the upstream.
    pub fn has_real_data(&self) -> bool {
        self.provenance.values().any(|s| *s == DataSource::Remote)
    }

    /// True if any cached collection is placeholder data.
    pub fn has_fallback_data(&self) -> bool {
        self.provenance.values().any(|s| *s == DataSource::Fallback)
    }

    /// Replace one collection, recording where it came from.
    pub fn set_collection(
        &mut self,
        entity_type: impl Into<EntityName>,
        collection: EntityCollection,
        source: DataSource,
    ) {
        let entity_type = entity_type.into();
        self.provenance.insert(entity_type.clone(), source);
        self.collections.insert(entity_type, collection);
    }

    /// Install placeholder collections for every type that has no real data.
    ///
    /// Returns the number of collections installed.
    pub fn install_fallback(
        &mut self,
        fallback: BTreeMap<EntityName, EntityCollection>,
    ) -> usize {
        let mut installed = 0;
        for (entity_type, collection) in fallback {
            if self.source_of(&entity_type) == Some(DataSource::Remote) {
                continue;
            }
            self.set_collection(entity_type, collection, DataSource::Fallback);
            installed += 1;
        }
        installed
    }

    /// Total number of cached records.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(EntityCollection::len).sum()
    }
}

/// The engine's current snapshot, swapped copy-on-write.
///
/// The lock is only ever held for the duration of a synchronous closure,
/// never across an `.await`.
#[derive(Debug, Default)]
pub(crate) struct CacheCell {
    current: RwLock<Arc<CacheSnapshot>>,
}

impl CacheCell {
    /// The current snapshot.
    pub(crate) fn snapshot(&self) -> Arc<CacheSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Mutate the cache. Readers holding an older snapshot keep it unchanged.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut CacheSnapshot) -> R) -> R {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(ids: &[&str]) -> EntityCollection {
        ids.iter()
            .map(|id| Record::from_value(json!({"id": id})).unwrap())
            .collect()
    }

    #[test]
    fn empty_cache() {
        let cache = CacheSnapshot::new();
        assert_eq!(cache.connectivity, ConnectivityState::Unknown);
        assert!(cache.last_sync.is_none());
        assert!(!cache.refresh_in_progress);
        assert!(!cache.has_real_data());
        assert_eq!(cache.record_count(), 0);
    }

    #[test]
    fn fallback_never_replaces_remote() {
        let mut cache = CacheSnapshot::new();
        cache.set_collection("users", collection(&["u1"]), DataSource::Remote);

        let mut fallback = BTreeMap::new();
        fallback.insert("users".to_string(), collection(&["f1", "f2"]));
        fallback.insert("agents".to_string(), collection(&["f3"]));

        let installed = cache.install_fallback(fallback);

        assert_eq!(installed, 1);
        assert!(cache.record("users", "u1").is_some());
        assert!(cache.record("users", "f1").is_none());
        assert_eq!(cache.source_of("agents"), Some(DataSource::Fallback));
        assert!(cache.has_real_data());
        assert!(cache.has_fallback_data());
    }

    #[test]
    fn remote_replaces_fallback() {
        let mut cache = CacheSnapshot::new();
        let mut fallback = BTreeMap::new();
        fallback.insert("plans".to_string(), collection(&["f1"]));
        cache.install_fallback(fallback);

        cache.set_collection("plans", collection(&["p1"]), DataSource::Remote);

        assert_eq!(cache.source_of("plans"), Some(DataSource::Remote));
        assert!(cache.record("plans", "p1").is_some());
        assert!(!cache.has_fallback_data());
    }

    #[test]
    fn serialization_format() {
        let mut cache = CacheSnapshot::new();
        cache.connectivity = ConnectivityState::Online;
        cache.set_collection("users", collection(&["u1"]), DataSource::Remote);

        let json = serde_json::to_value(&cache).unwrap();
        assert_eq!(json["connectivity"], "online");
        assert_eq!(json["refreshInProgress"], false);
        assert_eq!(json["collections"]["users"][0]["id"], "u1");
        assert_eq!(json["provenance"]["users"], "remote");
    }

    #[test]
    fn singletons_sit_beside_collections() {
        let mut cache = CacheSnapshot::new();
        let config = Record::from_value(json!({"id": 1, "maintenance": false})).unwrap();
        cache.set_singleton("platform_config", Some(config));

        assert_eq!(cache.singleton("platform_config").unwrap().id, "1");
        assert!(cache.collection("platform_config").is_none());
        assert_eq!(cache.record_count(), 0);
        let json = serde_json::to_value(&cache).unwrap();
        assert_eq!(json["singletons"]["platform_config"]["maintenance"], false);

        cache.set_singleton("platform_config", None);
        assert!(cache.singleton("platform_config").is_none());
    }

    #[test]
    fn cell_updates_are_copy_on_write() {
        let cell = CacheCell::default();
        let before = cell.snapshot();

        cell.update(|c| {
            c.set_collection("users", collection(&["u1"]), DataSource::Remote);
            c.connectivity = ConnectivityState::Online;
        });

        assert_eq!(before.record_count(), 0);
        assert_eq!(before.connectivity, ConnectivityState::Unknown);
        assert_eq!(cell.snapshot().record_count(), 1);
    }

    #[test]
    fn settled_states() {
        assert!(ConnectivityState::Online.is_settled());
        assert!(ConnectivityState::Offline.is_settled());
        assert!(!ConnectivityState::Probing.is_settled());
        assert!(!ConnectivityState::Unknown.is_settled());
        assert_eq!(ConnectivityState::Offline.to_string(), "offline");
    }
}
