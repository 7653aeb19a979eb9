//! The sync engine: owner of the cache and orchestrator of every sync path.

use crate::bus::{ConnectivityChanged, DataRefresh, EventBus, MutationQueued, RecordUpdated};
use crate::cache::{CacheCell, CacheSnapshot, ConnectivityState};
use crate::config::EngineConfig;
use crate::fallback::{FallbackDataProvider, StaticFallback};
use crate::mutation::{EntityWrite, MutationOp, NewMutation, PendingMutation};
use crate::persist::{KeyValueStore, MemoryStore};
use crate::probe::{ConnectivityProbe, DebouncedProbe, Reachability};
use crate::queue::{DrainReport, OfflineMutationQueue};
use crate::remote::{RemoteError, RemoteSource};
use crate::stats::{self, DashboardStats};
use crate::supervisor::BackgroundTasks;
use crate::syncer::{ModuleSyncer, SyncOutcome};
use crate::{error::Result, EntityName, Error, Record, RecordId};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;

/// Summary of one full refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Cycle number, unique per engine
    pub cycle: u64,
    /// What the probe said at the start of the cycle
    pub reachability: Reachability,
    /// Queue drain that ran before the fetches, if anything was pending
    pub drained: Option<DrainReport>,
    /// One outcome per configured entity type (empty when unreachable)
    pub outcomes: Vec<SyncOutcome>,
    /// One outcome per single-record type (empty when unreachable)
    pub singletons: Vec<SyncOutcome>,
    /// Whether placeholder data was installed
    pub fallback_installed: bool,
    /// Whether the cycle was cut short by a loss of connectivity
    pub aborted: bool,
}

impl SyncReport {
    fn unreachable(cycle: u64, fallback_installed: bool) -> Self {
        Self {
            cycle,
            reachability: Reachability::Unreachable,
            drained: None,
            outcomes: Vec::new(),
            singletons: Vec::new(),
            fallback_installed,
            aborted: false,
        }
    }

    fn aborted(cycle: u64) -> Self {
        Self {
            aborted: true,
            ..Self::unreachable(cycle, false)
        }
    }

    /// Number of entity types that were refreshed.
    pub fn updated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_updated()).count()
    }

    /// Outcomes for entity types whose fetch failed.
    pub fn failures(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }
}

/// Result of a create, update or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The upstream accepted the write and the entity type was re-synced.
    Applied {
        /// The written record, when known
        record: Option<Record>,
        /// The follow-up sync of the entity type
        refresh: SyncOutcome,
    },
    /// The upstream was unreachable; the write was queued for replay.
    Queued {
        mutation: PendingMutation,
        /// Pending mutations including this one
        pending: usize,
    },
}

impl MutationOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::Queued { .. })
    }
}

type SharedReport = Shared<BoxFuture<'static, SyncReport>>;

struct InFlight {
    cycle: u64,
    report: SharedReport,
    abort: AbortHandle,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    cache: Arc<CacheCell>,
    bus: EventBus,
    remote: Arc<dyn RemoteSource>,
    probe: DebouncedProbe,
    fallback: Arc<dyn FallbackDataProvider>,
    queue: OfflineMutationQueue,
    syncer: ModuleSyncer,
    refresh: Mutex<Option<InFlight>>,
    next_cycle: AtomicU64,
    /// Connectivity including the transient `probing` state
    pub(crate) state: watch::Sender<ConnectivityState>,
    pub(crate) retry: Arc<Notify>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl EngineInner {
    fn refresh_slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the in-flight slot and flag if `cycle` still owns them.
    fn finish_cycle(&self, cycle: u64) -> bool {
        let mut slot = self.refresh_slot();
        if slot.as_ref().map(|f| f.cycle) != Some(cycle) {
            return false;
        }
        *slot = None;
        self.cache.update(|c| c.refresh_in_progress = false);
        true
    }
}

/// Releases a cycle's hold on the refresh flag however the cycle ends.
struct CycleGuard {
    inner: Arc<EngineInner>,
    cycle: u64,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner.finish_cycle(self.cycle);
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    remote: Arc<dyn RemoteSource>,
    probe: Arc<dyn ConnectivityProbe>,
    store: Option<Arc<dyn KeyValueStore>>,
    fallback: Option<Arc<dyn FallbackDataProvider>>,
    bus: Option<EventBus>,
    config: EngineConfig,
}

impl SyncEngineBuilder {
    /// Key-value store for the offline queue. Defaults to in-memory.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Placeholder data for offline cold starts. Defaults to [`StaticFallback`].
    pub fn fallback(mut self, fallback: Arc<dyn FallbackDataProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Use an existing bus, e.g. one observers have already subscribed to.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine, restoring any persisted offline queue.
    pub async fn build(self) -> Result<SyncEngine> {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let queue = OfflineMutationQueue::open(store).await?;

        let cache = Arc::new(CacheCell::default());
        let bus = self.bus.unwrap_or_default();
        let syncer = ModuleSyncer::new(
            Arc::clone(&self.remote),
            Arc::clone(&cache),
            bus.clone(),
            self.config.fetch_timeout,
        );
        let probe = DebouncedProbe::new(
            self.probe,
            self.config.probe_timeout,
            self.config.probe_cooldown,
        );
        let (state, _) = watch::channel(ConnectivityState::Unknown);

        tracing::debug!(
            entity_types = self.config.entity_types.len(),
            pending = queue.peek_all(),
            "Sync engine built"
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                cache,
                bus,
                remote: self.remote,
                probe,
                fallback: self
                    .fallback
                    .unwrap_or_else(|| Arc::new(StaticFallback)),
                queue,
                syncer,
                refresh: Mutex::new(None),
                next_cycle: AtomicU64::new(1),
                state,
                retry: Arc::new(Notify::new()),
                tasks: Mutex::new(None),
            }),
        })
    }
}

/// Client-side sync engine.
///
/// Owns the entity cache, decides when to fetch, falls back to placeholder
/// data on an offline cold start and queues writes made while offline.
/// Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("connectivity", &self.connectivity())
            .field("refreshing", &self.is_refreshing())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl SyncEngine {
    /// Start building an engine around an upstream and a probe.
    pub fn builder(
        remote: Arc<dyn RemoteSource>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            remote,
            probe,
            store: None,
            fallback: None,
            bus: None,
            config: EngineConfig::default(),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The current cache snapshot.
    pub fn cache(&self) -> Arc<CacheSnapshot> {
        self.inner.cache.snapshot()
    }

    /// The bus this engine publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current connectivity, including the transient `probing` state.
    pub fn connectivity(&self) -> ConnectivityState {
        *self.inner.state.borrow()
    }

    /// Whether a full refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh_slot().is_some()
    }

    /// Number of queued mutations.
    pub fn pending_count(&self) -> usize {
        self.inner.queue.peek_all()
    }

    /// Queued mutations, oldest first.
    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.inner.queue.entries()
    }

    /// Dashboard figures for the current cache.
    pub fn get_stats(&self) -> DashboardStats {
        stats::compute(&self.cache())
    }

    // ========================================================================
    // Full refresh
    // ========================================================================

    /// Run a full refresh.
    ///
    /// Only one refresh runs at a time: a call made while one is in flight
    /// waits for it and returns its report. The refresh runs on its own task,
    /// so dropping the returned future does not cancel it.
    pub async fn sync_all(&self) -> SyncReport {
        let report = {
            let mut slot = self.inner.refresh_slot();
            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!(cycle = in_flight.cycle, "Joining in-flight refresh");
                    in_flight.report.clone()
                }
                None => {
                    let cycle = self.inner.next_cycle.fetch_add(1, Ordering::SeqCst);
                    self.inner.cache.update(|c| c.refresh_in_progress = true);

                    let engine = self.clone();
                    let handle = tokio::spawn(async move { engine.run_cycle(cycle).await });
                    let abort = handle.abort_handle();

                    let inner = self.downgrade();
                    let report = async move {
                        match handle.await {
                            Ok(report) => report,
                            Err(_) => {
                                if let Some(inner) = inner.upgrade() {
                                    inner.finish_cycle(cycle);
                                }
                                SyncReport::aborted(cycle)
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    *slot = Some(InFlight {
                        cycle,
                        report: report.clone(),
                        abort,
                    });
                    report
                }
            }
        };
        report.await
    }

    async fn run_cycle(&self, cycle: u64) -> SyncReport {
        let _guard = CycleGuard {
            inner: Arc::clone(&self.inner),
            cycle,
        };
        tracing::info!(cycle, "Starting full refresh");

        let reachability = self.probe_now(Some(cycle)).await;
        if !reachability.is_reachable() {
            return self.refresh_offline(cycle);
        }

        // Writes before reads, so a fetch can't undo a write still queued.
        let drained = if self.inner.queue.is_empty() {
            None
        } else {
            Some(self.drain_queue().await)
        };

        let config = &self.inner.config;
        let (outcomes, singletons) = futures::future::join(
            futures::future::join_all(
                config
                    .entity_types
                    .iter()
                    .map(|entity_type| self.inner.syncer.sync_one(entity_type)),
            ),
            futures::future::join_all(
                config
                    .singleton_types
                    .iter()
                    .map(|name| self.inner.syncer.sync_singleton(name)),
            ),
        )
        .await;

        self.inner
            .cache
            .update(|c| c.last_sync = Some(chrono::Utc::now()));
        self.inner.finish_cycle(cycle);
        let snapshot = self.cache();
        self.inner.bus.publish(&DataRefresh, &*snapshot);

        let report = SyncReport {
            cycle,
            reachability,
            drained,
            outcomes,
            singletons,
            fallback_installed: false,
            aborted: false,
        };
        tracing::info!(
            cycle,
            updated = report.updated(),
            failed = report.failures().count(),
            "Full refresh finished"
        );
        report
    }

    /// The unreachable branch of a cycle: placeholder data on a cold start,
    /// otherwise keep what is cached.
    fn refresh_offline(&self, cycle: u64) -> SyncReport {
        if self.cache().has_real_data() {
            tracing::info!(cycle, "Upstream unreachable; keeping cached data");
            return SyncReport::unreachable(cycle, false);
        }

        let fallback = self.inner.fallback.snapshot(&self.inner.config.entity_types);
        let installed = self.inner.cache.update(|c| {
            if c.has_real_data() {
                0
            } else {
                c.install_fallback(fallback)
            }
        });
        self.inner.finish_cycle(cycle);
        let snapshot = self.cache();
        self.inner.bus.publish(&DataRefresh, &*snapshot);

        tracing::warn!(cycle, installed, "Upstream unreachable on cold start; serving placeholder data");
        SyncReport::unreachable(cycle, installed > 0)
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Probe the upstream and record the settled result. `own_cycle` is the
    /// refresh (if any) doing the probing; it is never aborted by its own
    /// result.
    pub(crate) async fn probe_now(&self, own_cycle: Option<u64>) -> Reachability {
        self.inner.state.send_replace(ConnectivityState::Probing);
        let reachability = self.inner.probe.check().await;
        let settled = if reachability.is_reachable() {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };
        self.record_connectivity(settled, own_cycle);
        reachability
    }

    fn record_connectivity(&self, state: ConnectivityState, own_cycle: Option<u64>) {
        self.inner.state.send_replace(state);
        let previous = self
            .inner
            .cache
            .update(|c| std::mem::replace(&mut c.connectivity, state));
        if previous == state {
            return;
        }

        tracing::info!(from = %previous, to = %state, "Connectivity changed");
        if state == ConnectivityState::Offline {
            self.abort_refresh(own_cycle);
        }
        self.inner.bus.publish(&ConnectivityChanged, &state);
    }

    /// Abort a running refresh unless it is `except`, and clear the flag.
    fn abort_refresh(&self, except: Option<u64>) {
        let mut slot = self.inner.refresh_slot();
        let Some(in_flight) = slot.as_ref() else {
            return;
        };
        if Some(in_flight.cycle) == except {
            return;
        }
        in_flight.abort.abort();
        tracing::warn!(cycle = in_flight.cycle, "Aborted in-flight refresh");
        *slot = None;
        self.inner.cache.update(|c| c.refresh_in_progress = false);
    }

    /// User-triggered retry.
    ///
    /// Forgets the last probe result, wakes the reconnect supervisor (also
    /// after it has given up) and runs a full refresh.
    pub async fn retry_now(&self) -> SyncReport {
        tracing::info!("Manual retry requested");
        self.inner.probe.invalidate().await;
        // Only a supervisor already waiting is woken; no permit is stored
        // for a later offline episode.
        self.inner.retry.notify_waiters();
        self.sync_all().await
    }

    // ========================================================================
    // Single-type sync
    // ========================================================================

    /// Refresh one entity type. Accepts the singular form (`routine`) and
    /// single-record types (`platform_config`).
    pub async fn sync_module(&self, entity_type: &str) -> Result<SyncOutcome> {
        if let Some(name) = self.inner.config.singleton(entity_type) {
            return Ok(self.inner.syncer.sync_singleton(name).await);
        }
        let entity_type = self.resolve(entity_type)?;
        Ok(self.inner.syncer.sync_one(&entity_type).await)
    }

    /// Refresh one entity type for a single user.
    ///
    /// Owner-scoped types (visions, agents and routines by default) are
    /// narrowed to the records `user_id` created, and that narrowed set
    /// becomes the cached collection. Other types sync in full.
    pub async fn sync_module_for(&self, entity_type: &str, user_id: &str) -> Result<SyncOutcome> {
        if self.inner.config.singleton(entity_type).is_some() {
            return self.sync_module(entity_type).await;
        }
        let entity_type = self.resolve(entity_type)?;
        if self.inner.config.is_owner_scoped(&entity_type) {
            Ok(self.inner.syncer.sync_owned(&entity_type, user_id).await)
        } else {
            Ok(self.inner.syncer.sync_one(&entity_type).await)
        }
    }

    fn resolve(&self, name: &str) -> Result<EntityName> {
        self.inner
            .config
            .resolve_entity(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEntityType(name.to_string()))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Patch a record.
    ///
    /// An unreachable upstream is not an error: the write is queued and
    /// [`MutationOutcome::Queued`] returned.
    pub async fn update_entity(
        &self,
        entity: &str,
        id: impl Into<RecordId>,
        patch: Map<String, Value>,
    ) -> Result<MutationOutcome> {
        self.mutate(NewMutation::new(entity, MutationOp::Update, Some(id.into()), patch))
            .await
    }

    /// Create a record. The id, if any, is taken from the payload's `id`.
    pub async fn create_entity(
        &self,
        entity: &str,
        payload: Map<String, Value>,
    ) -> Result<MutationOutcome> {
        let record_id = match payload.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        self.mutate(NewMutation::new(entity, MutationOp::Create, record_id, payload))
            .await
    }

    /// Delete a record.
    pub async fn delete_entity(&self, entity: &str, id: impl Into<RecordId>) -> Result<MutationOutcome> {
        self.mutate(NewMutation::new(
            entity,
            MutationOp::Delete,
            Some(id.into()),
            Map::new(),
        ))
        .await
    }

    async fn mutate(&self, mutation: NewMutation) -> Result<MutationOutcome> {
        let entity_type = self.resolve(&mutation.entity_type)?;

        // Older queued writes go out first, or their replay would land on
        // top of this one.
        if !self.inner.queue.is_empty() {
            let drained = self.drain_queue().await;
            if drained.remaining > 0 {
                tracing::info!(
                    entity_type = %mutation.entity_type,
                    pending = drained.remaining,
                    "Mutations still pending; queueing behind them"
                );
                return Ok(self.enqueue(mutation).await);
            }
        }
        let write = EntityWrite::new(
            entity_type.clone(),
            mutation.operation,
            mutation.record_id.clone(),
            mutation.payload.clone(),
        );

        match self.send_write(&write).await {
            Ok(echoed) => {
                let refresh = self.inner.syncer.sync_one(&entity_type).await;
                let record = echoed.or_else(|| {
                    let id = mutation.record_id.as_deref()?;
                    self.cache().record(&entity_type, id).cloned()
                });
                if let Some(record) = &record {
                    self.inner
                        .bus
                        .publish(&RecordUpdated(mutation.entity_type.clone()), record);
                }
                Ok(MutationOutcome::Applied { record, refresh })
            }
            Err(RemoteError::Unreachable(reason)) => {
                tracing::warn!(
                    entity_type = %mutation.entity_type,
                    operation = %mutation.operation,
                    %reason,
                    "Upstream unreachable; queueing mutation"
                );
                Ok(self.enqueue(mutation).await)
            }
            Err(RemoteError::Rejected(reason)) => {
                tracing::warn!(entity_type = %entity_type, %reason, "Upstream rejected write");
                Err(Error::Rejected(reason))
            }
        }
    }

    async fn enqueue(&self, mutation: NewMutation) -> MutationOutcome {
        let queued = self.inner.queue.enqueue(mutation).await;
        let pending = self.inner.queue.peek_all();
        self.inner.bus.publish(&MutationQueued, &pending);
        MutationOutcome::Queued {
            mutation: queued,
            pending,
        }
    }

    async fn send_write(&self, write: &EntityWrite) -> std::result::Result<Option<Record>, RemoteError> {
        let timeout = self.inner.config.write_timeout;
        match tokio::time::timeout(timeout, self.inner.remote.write(write)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Unreachable(format!(
                "write timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    // ========================================================================
    // Offline queue
    // ========================================================================

    /// Replay queued mutations now, oldest first.
    pub async fn flush_pending(&self) -> Result<DrainReport> {
        Ok(self.drain_queue().await)
    }

    async fn drain_queue(&self) -> DrainReport {
        let report = self
            .inner
            .queue
            .drain(|mutation| self.replay(mutation))
            .await;
        if report.applied > 0 {
            self.inner.bus.publish(&MutationQueued, &report.remaining);
        }
        report
    }

    async fn replay(&self, mutation: PendingMutation) -> Result<()> {
        let entity_type = self.resolve(&mutation.entity_type)?;
        self.send_write(&mutation.to_write(entity_type))
            .await
            .map(|_| ())
            .map_err(Error::from)
    }

    // ========================================================================
    // Background tasks
    // ========================================================================

    /// Spawn the reconnect supervisor and the periodic refresh task.
    ///
    /// Returns `false` if they are already running.
    pub fn start(&self) -> bool {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.as_ref().is_some_and(BackgroundTasks::is_running) {
            return false;
        }
        *tasks = Some(BackgroundTasks::spawn(self));
        true
    }

    /// Stop background tasks and abort a running refresh.
    pub async fn shutdown(&self) {
        let tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.stop().await;
        }
        self.abort_refresh(None);
        tracing::info!("Sync engine stopped");
    }

    /// Whether background tasks are running.
    pub fn is_started(&self) -> bool {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(BackgroundTasks::is_running)
    }
}
