//! Durable, ordered log of writes made while the upstream was unreachable.
//!
//! Entries are replayed strictly in enqueue order, one at a time, and only
//! removed once the replay has been confirmed. A failed replay halts the
//! drain; nothing is reordered or skipped.

use crate::mutation::{NewMutation, PendingMutation};
use crate::persist::KeyValueStore;
use crate::{error::Result, Error, MutationId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Key the queue is persisted under.
pub const QUEUE_KEY: &str = "offline_mutation_queue";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueState {
    /// Next id to hand out; persisted so ids stay monotonic across restarts
    next_id: MutationId,
    entries: VecDeque<PendingMutation>,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    /// Entries replayed and removed
    pub applied: usize,
    /// Entries still queued
    pub remaining: usize,
    /// Why the drain stopped early, if it did
    pub halted_on: Option<Error>,
}

impl DrainReport {
    /// True if every entry was replayed.
    pub fn is_complete(&self) -> bool {
        self.halted_on.is_none() && self.remaining == 0
    }
}

/// The offline mutation queue.
pub struct OfflineMutationQueue {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<QueueState>,
    /// Serializes drains so two passes never interleave.
    drain_lock: tokio::sync::Mutex<()>,
    /// Serializes writes so an older state never lands after a newer one.
    persist_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for OfflineMutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineMutationQueue")
            .field("pending", &self.peek_all())
            .finish()
    }
}

impl OfflineMutationQueue {
    /// Open the queue, restoring whatever was persisted before.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let state = match store.get(QUEUE_KEY).await? {
            Some(raw) => serde_json::from_str::<QueueState>(&raw)?,
            None => QueueState::default(),
        };

        if !state.entries.is_empty() {
            tracing::info!(
                pending = state.entries.len(),
                "Restored pending mutations from previous session"
            );
        }

        Ok(Self {
            store,
            state: Mutex::new(state),
            drain_lock: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a mutation and persist the queue.
    ///
    /// The entry is queued in memory even if persisting fails; the failure
    /// is logged and the full queue is written again on the next change.
    pub async fn enqueue(&self, mutation: NewMutation) -> PendingMutation {
        let pending = {
            let mut state = self.state();
            let id = state.next_id;
            state.next_id += 1;
            let pending = PendingMutation::from_new(id, mutation, Utc::now());
            state.entries.push_back(pending.clone());
            pending
        };

        tracing::debug!(
            mutation_id = pending.id,
            entity_type = %pending.entity_type,
            operation = %pending.operation,
            "Queued mutation for replay"
        );

        self.persist_logged().await;
        pending
    }

    /// Replay queued mutations in order through `apply`.
    ///
    /// Each entry is removed only after `apply` returns `Ok`. The first
    /// error halts the drain and leaves that entry (and everything after it)
    /// queued.
    pub async fn drain<F, Fut>(&self, mut apply: F) -> DrainReport
    where
        F: FnMut(PendingMutation) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _drain = self.drain_lock.lock().await;
        let mut applied = 0;
        let mut halted_on = None;

        loop {
            let next = self.state().entries.front().cloned();
            let Some(mutation) = next else {
                break;
            };
            let mutation_id = mutation.id;

            match apply(mutation).await {
                Ok(()) => {
                    self.remove(mutation_id);
                    applied += 1;
                    self.persist_logged().await;
                }
                Err(e) => {
                    let err = Error::MutationReplayFailure {
                        mutation_id,
                        reason: e.to_string(),
                    };
                    tracing::warn!(mutation_id, "{}", err);
                    halted_on = Some(err);
                    break;
                }
            }
        }

        let remaining = self.peek_all();
        if applied > 0 || halted_on.is_some() {
            tracing::info!(applied, remaining, "Drained offline mutation queue");
        }

        DrainReport {
            applied,
            remaining,
            halted_on,
        }
    }

    fn remove(&self, mutation_id: MutationId) {
        let mut state = self.state();
        if state.entries.front().map(|m| m.id) == Some(mutation_id) {
            state.entries.pop_front();
        } else {
            state.entries.retain(|m| m.id != mutation_id);
        }
    }

    /// Number of pending mutations.
    pub fn peek_all(&self) -> usize {
        self.state().entries.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.peek_all() == 0
    }

    /// Copy of the pending mutations, oldest first.
    pub fn entries(&self) -> Vec<PendingMutation> {
        self.state().entries.iter().cloned().collect()
    }

    /// Write the current queue to the store.
    pub async fn persist(&self) -> Result<()> {
        let _write = self.persist_lock.lock().await;
        let raw = serde_json::to_string(&*self.state())?;
        self.store.set(QUEUE_KEY, raw).await
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            tracing::error!(pending = self.peek_all(), "Failed to persist offline queue: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationOp;
    use crate::persist::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn update(entity: &str, id: &str, patch: Value) -> NewMutation {
        NewMutation::new(
            entity,
            MutationOp::Update,
            Some(id.to_string()),
            patch.as_object().cloned().unwrap_or_default(),
        )
    }

    async fn open_memory() -> (Arc<MemoryStore>, OfflineMutationQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineMutationQueue::open(store.clone()).await.unwrap();
        (store, queue)
    }

    #[tokio::test]
    async fn enqueue_assigns_monotonic_ids() {
        let (_, queue) = open_memory().await;

        let a = queue.enqueue(update("routine", "r1", json!({"a": 1}))).await;
        let b = queue.enqueue(update("routine", "r1", json!({"a": 2}))).await;

        assert!(b.id > a.id);
        assert_eq!(queue.peek_all(), 2);
    }

    #[tokio::test]
    async fn drain_replays_in_order_and_empties() {
        let (_, queue) = open_memory().await;
        queue.enqueue(update("routine", "r1", json!({"step": 1}))).await;
        queue.enqueue(update("agent", "a1", json!({"step": 2}))).await;
        queue.enqueue(update("routine", "r1", json!({"step": 3}))).await;

        let mut seen = Vec::new();
        let report = queue
            .drain(|m| {
                seen.push(m.payload["step"].clone());
                async { Ok(()) }
            })
            .await;

        assert_eq!(seen, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(report.applied, 3);
        assert!(report.is_complete());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failure_halts_drain_without_skipping() {
        let (_, queue) = open_memory().await;
        for step in 1..=4 {
            queue.enqueue(update("plan", "p1", json!({"step": step}))).await;
        }

        let mut attempts = Vec::new();
        let report = queue
            .drain(|m| {
                let step = m.payload["step"].as_i64().unwrap();
                attempts.push(step);
                async move {
                    if step == 2 {
                        Err(Error::Unreachable("connection reset".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(report.applied, 1);
        assert_eq!(report.remaining, 3);
        assert!(matches!(
            report.halted_on,
            Some(Error::MutationReplayFailure { .. })
        ));

        let left: Vec<_> = queue
            .entries()
            .iter()
            .map(|m| m.payload["step"].as_i64().unwrap())
            .collect();
        assert_eq!(left, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn draining_empty_queue_twice_is_noop() {
        let (_, queue) = open_memory().await;

        for _ in 0..2 {
            let mut calls = 0;
            let report = queue
                .drain(|_| {
                    calls += 1;
                    async { Ok(()) }
                })
                .await;
            assert_eq!(calls, 0);
            assert_eq!(
                report,
                DrainReport {
                    applied: 0,
                    remaining: 0,
                    halted_on: None
                }
            );
        }
    }

    #[tokio::test]
    async fn survives_restart() {
        let (store, queue) = open_memory().await;
        queue.enqueue(update("routine", "r1", json!({"is_active": false}))).await;
        let second = queue.enqueue(update("routine", "r2", json!({"is_active": true}))).await;
        drop(queue);

        let reopened = OfflineMutationQueue::open(store).await.unwrap();
        assert_eq!(reopened.peek_all(), 2);
        assert_eq!(reopened.entries()[1].record_id.as_deref(), Some("r2"));

        let third = reopened.enqueue(update("routine", "r3", json!({}))).await;
        assert!(third.id > second.id);
    }

    #[tokio::test]
    async fn corrupt_state_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUEUE_KEY, "{not json".into()).await.unwrap();

        let result = OfflineMutationQueue::open(store).await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    struct FlakyStore {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Persistence("disk full".into()));
            }
            self.inner.set(key, value).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_keeps_entry_in_memory() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail: AtomicBool::new(true),
        });
        let queue = OfflineMutationQueue::open(store.clone()).await.unwrap();

        queue.enqueue(update("user", "u1", json!({"name": "x"}))).await;
        assert_eq!(queue.peek_all(), 1);
        assert_eq!(store.get(QUEUE_KEY).await.unwrap(), None);

        store.fail.store(false, Ordering::SeqCst);
        queue.enqueue(update("user", "u2", json!({"name": "y"}))).await;

        let persisted: Value =
            serde_json::from_str(&store.get(QUEUE_KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(persisted["entries"].as_array().unwrap().len(), 2);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_entity() -> impl Strategy<Value = String> {
            prop_oneof![
                Just("user".to_string()),
                Just("routine".to_string()),
                Just("agent".to_string()),
            ]
        }

        proptest! {
            #[test]
            fn prop_replay_preserves_enqueue_order(
                entities in proptest::collection::vec(arb_entity(), 0..40),
                fail_at in proptest::option::of(0usize..40),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    let queue = OfflineMutationQueue::open(Arc::new(MemoryStore::new()))
                        .await
                        .unwrap();
                    for (i, entity) in entities.iter().enumerate() {
                        let mut payload = Map::new();
                        payload.insert("seq".into(), json!(i));
                        queue
                            .enqueue(NewMutation::new(entity.clone(), MutationOp::Update, Some(format!("id-{i}")), payload))
                            .await;
                    }

                    // First pass may fail part way; second pass finishes.
                    let mut replayed = Vec::new();
                    let mut calls = 0usize;
                    queue
                        .drain(|m| {
                            let attempt = calls;
                            calls += 1;
                            let fail = Some(attempt) == fail_at;
                            if !fail {
                                replayed.push(m.payload["seq"].as_u64().unwrap() as usize);
                            }
                            async move {
                                if fail {
                                    Err(Error::Unreachable("flap".into()))
                                } else {
                                    Ok(())
                                }
                            }
                        })
                        .await;
                    queue
                        .drain(|m| {
                            replayed.push(m.payload["seq"].as_u64().unwrap() as usize);
                            async { Ok(()) }
                        })
                        .await;

                    let expected: Vec<usize> = (0..entities.len()).collect();
                    prop_assert_eq!(replayed, expected);
                    prop_assert!(queue.is_empty());
                    Ok(())
                })?;
            }
        }
    }
}
