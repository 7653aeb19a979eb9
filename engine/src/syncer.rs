//! Fetches one entity type and applies it to the cache.

use crate::bus::{CollectionUpdated, EventBus};
use crate::cache::{CacheCell, CacheSnapshot, DataSource};
use crate::remote::RemoteSource;
use crate::{EntityCollection, EntityName, Error, Record};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Result of syncing one entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The collection was replaced with `count` fetched records.
    Updated { entity_type: EntityName, count: usize },
    /// The fetch failed; the cached collection was left as it was.
    Failed { entity_type: EntityName, error: Error },
    /// The fetch finished after a newer fetch of the same type had already
    /// been applied, so its result was discarded.
    Stale { entity_type: EntityName },
}

impl SyncOutcome {
    /// Entity type this outcome is for.
    pub fn entity_type(&self) -> &EntityName {
        match self {
            SyncOutcome::Updated { entity_type, .. }
            | SyncOutcome::Failed { entity_type, .. }
            | SyncOutcome::Stale { entity_type } => entity_type,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, SyncOutcome::Updated { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Syncs single entity types.
///
/// Every fetch takes a ticket from a shared counter. A result is applied only
/// if no fetch with a later ticket has been applied for the same type, so a
/// slow response can never overwrite a fresher one.
pub(crate) struct ModuleSyncer {
    remote: Arc<dyn RemoteSource>,
    cache: Arc<CacheCell>,
    bus: EventBus,
    fetch_timeout: Duration,
    next_ticket: AtomicU64,
    /// Ticket of the last applied fetch, per type
    applied: Mutex<HashMap<EntityName, u64>>,
}

impl ModuleSyncer {
    pub(crate) fn new(
        remote: Arc<dyn RemoteSource>,
        cache: Arc<CacheCell>,
        bus: EventBus,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            cache,
            bus,
            fetch_timeout,
            next_ticket: AtomicU64::new(1),
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch one entity type and, on success, replace its cached collection
    /// and publish `<type>_updated`. Failures are logged and leave the cache
    /// untouched.
    pub(crate) async fn sync_one(&self, entity_type: &EntityName) -> SyncOutcome {
        self.sync_collection(entity_type, None).await
    }

    /// [`sync_one`](Self::sync_one) narrowed to the records `user_id` created.
    /// The narrowed result replaces the cached collection.
    pub(crate) async fn sync_owned(&self, entity_type: &EntityName, user_id: &str) -> SyncOutcome {
        self.sync_collection(entity_type, Some(user_id)).await
    }

    async fn sync_collection(&self, entity_type: &EntityName, owner: Option<&str>) -> SyncOutcome {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let records = match self.fetch(entity_type, owner).await {
            Ok(records) => records,
            Err(failed) => return failed,
        };

        let collection = EntityCollection::from_records(records);
        let count = collection.len();

        let fresh = self.apply(entity_type, ticket, |cache| {
            cache.set_collection(entity_type.clone(), collection.clone(), DataSource::Remote)
        });
        if !fresh {
            return SyncOutcome::Stale {
                entity_type: entity_type.clone(),
            };
        }

        tracing::debug!(entity_type = %entity_type, count, owner = ?owner, "Synced entity type");
        self.bus
            .publish(&CollectionUpdated(entity_type.clone()), &collection);

        SyncOutcome::Updated {
            entity_type: entity_type.clone(),
            count,
        }
    }

    /// Fetch a single-record type and keep its first row. An empty answer
    /// clears the cached record.
    pub(crate) async fn sync_singleton(&self, name: &EntityName) -> SyncOutcome {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let record = match self.fetch(name, None).await {
            Ok(records) => records.into_iter().next(),
            Err(failed) => return failed,
        };
        let count = usize::from(record.is_some());

        if !self.apply(name, ticket, |cache| cache.set_singleton(name.clone(), record)) {
            return SyncOutcome::Stale {
                entity_type: name.clone(),
            };
        }

        tracing::debug!(entity_type = %name, found = count == 1, "Synced single-record type");
        SyncOutcome::Updated {
            entity_type: name.clone(),
            count,
        }
    }

    async fn fetch(
        &self,
        entity_type: &EntityName,
        owner: Option<&str>,
    ) -> Result<Vec<Record>, SyncOutcome> {
        let request = async {
            match owner {
                Some(user_id) => self.remote.fetch_created_by(entity_type, user_id).await,
                None => self.remote.fetch(entity_type).await,
            }
        };
        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(e)) => Err(self.failed(entity_type, e.to_string())),
            Err(_) => Err(self.failed(
                entity_type,
                format!("timed out after {}ms", self.fetch_timeout.as_millis()),
            )),
        }
    }

    /// Run `f` on the cache unless a fetch with a later ticket has already
    /// been applied for `entity_type`.
    fn apply(&self, entity_type: &EntityName, ticket: u64, f: impl FnOnce(&mut CacheSnapshot)) -> bool {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        let last = applied.entry(entity_type.clone()).or_insert(0);
        if ticket < *last {
            tracing::debug!(entity_type = %entity_type, ticket, "Discarding stale fetch result");
            return false;
        }
        *last = ticket;
        self.cache.update(f);
        true
    }

    fn failed(&self, entity_type: &EntityName, reason: String) -> SyncOutcome {
        let error = Error::PartialFetchFailure {
            entity_type: entity_type.clone(),
            reason,
        };
        tracing::warn!("{}", error);
        SyncOutcome::Failed {
            entity_type: entity_type.clone(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::EntityWrite;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Serves `agents`; the first call is slow and returns old data.
    struct SlowThenFast {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteSource for SlowThenFast {
        async fn fetch(&self, entity_type: &EntityName) -> Result<Vec<Record>, RemoteError> {
            match entity_type.as_str() {
                "agents" => {
                    let call = self.calls.fetch_add(1, Ordering::SeqCst);
                    let (delay, name) = if call == 0 {
                        (Duration::from_secs(3), "old")
                    } else {
                        (Duration::from_millis(10), "new")
                    };
                    tokio::time::sleep(delay).await;
                    Ok(vec![Record::from_value(json!({"id": "a1", "name": name})).unwrap()])
                }
                "visions" => Ok(vec![
                    Record::from_value(json!({"id": "v1", "created_by": "u1"})).unwrap(),
                    Record::from_value(json!({"id": "v2", "created_by": "u2"})).unwrap(),
                ]),
                "platform_config" => Ok(vec![
                    Record::from_value(json!({"id": 1, "maintenance": false})).unwrap(),
                    Record::from_value(json!({"id": 2, "maintenance": true})).unwrap(),
                ]),
                "empty_config" => Ok(vec![]),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(vec![])
                }
                other => Err(RemoteError::Unreachable(format!("no route to {other}"))),
            }
        }

        async fn write(&self, _write: &EntityWrite) -> Result<Option<Record>, RemoteError> {
            Ok(None)
        }
    }

    fn syncer(bus: EventBus) -> (ModuleSyncer, Arc<CacheCell>) {
        let cache = Arc::new(CacheCell::default());
        let remote = Arc::new(SlowThenFast {
            calls: AtomicUsize::new(0),
        });
        let syncer = ModuleSyncer::new(remote, cache.clone(), bus, Duration::from_secs(10));
        (syncer, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn updates_cache_and_publishes() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.subscribe(CollectionUpdated("agents".into()), move |c: &EntityCollection| {
            counter.fetch_add(c.len(), Ordering::SeqCst);
        });
        let (syncer, cache) = syncer(bus);

        let outcome = syncer.sync_one(&"agents".to_string()).await;

        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                entity_type: "agents".into(),
                count: 1
            }
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(cache.snapshot().source_of("agents"), Some(DataSource::Remote));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_leaves_cache_untouched() {
        let bus = EventBus::new();
        let published = Arc::new(AtomicUsize::new(0));
        let counter = published.clone();
        bus.subscribe(CollectionUpdated("visions".into()), move |_: &EntityCollection| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (syncer, cache) = syncer(bus);
        cache.update(|c| {
            c.set_collection(
                "visions",
                EntityCollection::from_records(vec![Record::from_value(json!({"id": "v1"})).unwrap()]),
                DataSource::Remote,
            )
        });
        let before = cache.snapshot();

        let outcome = syncer.sync_one(&"visions".to_string()).await;

        assert!(outcome.is_failed());
        assert!(matches!(
            outcome,
            SyncOutcome::Failed { error: Error::PartialFetchFailure { .. }, .. }
        ));
        assert_eq!(*cache.snapshot(), *before);
        assert_eq!(published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_failure() {
        let (syncer, cache) = syncer(EventBus::new());

        let outcome = syncer.sync_one(&"hang".to_string()).await;

        assert!(outcome.is_failed());
        assert!(cache.snapshot().collection("hang").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_is_discarded() {
        let (syncer, cache) = syncer(EventBus::new());
        let agents = "agents".to_string();

        let (slow, fast) = tokio::join!(syncer.sync_one(&agents), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            syncer.sync_one(&agents).await
        });

        assert!(fast.is_updated());
        assert_eq!(slow, SyncOutcome::Stale { entity_type: agents.clone() });
        let snapshot = cache.snapshot();
        let record = snapshot.record("agents", "a1").unwrap();
        assert_eq!(record.str_field("name"), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn owned_sync_keeps_only_the_users_records() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.subscribe(CollectionUpdated("visions".into()), move |c: &EntityCollection| {
            counter.store(c.len(), Ordering::SeqCst);
        });
        let (syncer, cache) = syncer(bus);

        let outcome = syncer.sync_owned(&"visions".to_string(), "u2").await;

        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                entity_type: "visions".into(),
                count: 1
            }
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let snapshot = cache.snapshot();
        assert!(snapshot.record("visions", "v2").is_some());
        assert!(snapshot.record("visions", "v1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn singleton_keeps_the_first_row() {
        let bus = EventBus::new();
        let published = Arc::new(AtomicUsize::new(0));
        let counter = published.clone();
        bus.subscribe(
            CollectionUpdated("platform_config".into()),
            move |_: &EntityCollection| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        let (syncer, cache) = syncer(bus);

        let outcome = syncer.sync_singleton(&"platform_config".to_string()).await;

        assert!(outcome.is_updated());
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.singleton("platform_config").unwrap().id, "1");
        assert!(snapshot.collection("platform_config").is_none());
        assert_eq!(published.load(Ordering::SeqCst), 0);

        let outcome = syncer.sync_singleton(&"empty_config".to_string()).await;
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                entity_type: "empty_config".into(),
                count: 0
            }
        );
        assert!(cache.snapshot().singleton("empty_config").is_none());

        let outcome = syncer.sync_singleton(&"missing".to_string()).await;
        assert!(outcome.is_failed());
        assert!(cache.snapshot().singleton("platform_config").is_some());
    }
}
