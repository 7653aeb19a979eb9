//! Fakes shared by the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dashsync_engine::{
    ConnectivityProbe, EngineConfig, EntityName, EntityWrite, EventBus, MutationOp,
    Reachability, Record, RemoteError, RemoteSource, SyncEngine, Topic,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory upstream with switchable failures.
#[derive(Default)]
pub struct FakeRemote {
    data: Mutex<BTreeMap<EntityName, Vec<Record>>>,
    unreachable: AtomicBool,
    reject_writes: AtomicBool,
    failing: Mutex<HashSet<EntityName>>,
    fetch_delay_ms: AtomicU64,
    fetches: AtomicUsize,
    next_id: AtomicUsize,
    /// `fetch:<type>` / `write:<type>` in the order they were served
    log: Mutex<Vec<String>>,
    writes: Mutex<Vec<EntityWrite>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, entity_type: &str, rows: Vec<Value>) {
        let records = rows
            .into_iter()
            .map(|row| Record::from_value(row).unwrap())
            .collect();
        self.data
            .lock()
            .unwrap()
            .insert(entity_type.to_string(), records);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn fail_type(&self, entity_type: &str) {
        self.failing.lock().unwrap().insert(entity_type.to_string());
    }

    pub fn heal_type(&self, entity_type: &str) {
        self.failing.lock().unwrap().remove(entity_type);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<EntityWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn row(&self, entity_type: &str, id: &str) -> Option<Record> {
        self.data
            .lock()
            .unwrap()
            .get(entity_type)?
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn fetch(&self, entity_type: &EntityName) -> Result<Vec<Record>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.is_reachable() {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        if self.failing.lock().unwrap().contains(entity_type) {
            return Err(RemoteError::Unreachable("503 Service Unavailable".into()));
        }

        self.log.lock().unwrap().push(format!("fetch:{entity_type}"));
        let rows = self.data.lock().unwrap().get(entity_type).cloned();
        Ok(rows.unwrap_or_default())
    }

    async fn write(&self, write: &EntityWrite) -> Result<Option<Record>, RemoteError> {
        if !self.is_reachable() {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("409 Conflict".into()));
        }

        self.writes.lock().unwrap().push(write.clone());
        self.log
            .lock()
            .unwrap()
            .push(format!("write:{}", write.entity_type));

        let mut data = self.data.lock().unwrap();
        let rows = data.entry(write.entity_type.clone()).or_default();
        match write.operation {
            MutationOp::Create => {
                let id = write.record_id.clone().unwrap_or_else(|| {
                    format!("new-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
                });
                let mut fields = write.payload.clone();
                fields.remove("id");
                let record = Record::new(id, fields);
                rows.push(record.clone());
                Ok(Some(record))
            }
            MutationOp::Update => {
                let id = write.record_id.clone().unwrap_or_default();
                match rows.iter_mut().find(|r| r.id == id) {
                    Some(record) => {
                        record.apply_patch(&write.payload);
                        Ok(Some(record.clone()))
                    }
                    None => Err(RemoteError::Rejected(format!("no {} row {id}", write.entity_type))),
                }
            }
            MutationOp::Delete => {
                rows.retain(|r| Some(r.id.as_str()) != write.record_id.as_deref());
                Ok(None)
            }
        }
    }
}

/// Probe that answers with the fake upstream's reachability.
pub struct FakeProbe {
    remote: Arc<FakeRemote>,
    checks: AtomicUsize,
}

impl FakeProbe {
    pub fn new(remote: &Arc<FakeRemote>) -> Arc<Self> {
        Arc::new(Self {
            remote: Arc::clone(remote),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for FakeProbe {
    async fn check(&self, _timeout: Duration) -> Reachability {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.remote.is_reachable().into()
    }
}

pub const TEST_TYPES: [&str; 6] = ["users", "visions", "agents", "routines", "plans", "affiliates"];

/// Six dashboard types, no probe debounce and a periodic refresh far enough
/// out that it only fires once (at start).
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_entity_types(TEST_TYPES)
        .with_probe_cooldown(Duration::ZERO)
        .with_refresh_interval(Duration::from_secs(3600))
}

pub async fn build_engine(remote: &Arc<FakeRemote>, probe: &Arc<FakeProbe>) -> SyncEngine {
    SyncEngine::builder(remote.clone(), probe.clone())
        .config(test_config())
        .build()
        .await
        .unwrap()
}

pub fn seed_dashboard(remote: &FakeRemote) {
    remote.seed(
        "users",
        vec![
            json!({"id": "u1", "name": "Ada", "plan_id": "p1"}),
            json!({"id": "u2", "name": "Linus", "plan_id": "p2"}),
        ],
    );
    remote.seed(
        "visions",
        vec![
            json!({"id": "v1", "status": "active", "total_interactions": 120}),
            json!({"id": "v2", "status": "draft", "total_interactions": 30}),
        ],
    );
    remote.seed("agents", vec![json!({"id": "a1", "name": "Scout"})]);
    remote.seed(
        "routines",
        vec![
            json!({"id": "r1", "name": "Morning", "is_active": true}),
            json!({"id": "r2", "name": "Evening", "is_active": false}),
        ],
    );
    remote.seed(
        "plans",
        vec![
            json!({"id": "p1", "name": "Pro", "price": 29}),
            json!({"id": "p2", "name": "Team", "price": 99}),
        ],
    );
    remote.seed("affiliates", vec![json!({"id": "af1"})]);
}

pub fn patch(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("patch must be an object, got {other}"),
    }
}

/// Count deliveries on a topic.
pub fn count_events<T: Topic>(bus: &EventBus, topic: T) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    bus.subscribe(topic, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// Record every payload delivered on a topic.
pub fn record_events<T>(bus: &EventBus, topic: T) -> Arc<Mutex<Vec<T::Payload>>>
where
    T: Topic,
    T::Payload: Clone,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(topic, move |payload: &T::Payload| {
        sink.lock().unwrap().push(payload.clone());
    });
    seen
}
