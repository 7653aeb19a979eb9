//! # Dashsync Engine
//!
//! A client-side sync engine for dashboards backed by a remote data service.
//!
//! The engine keeps a local cache of entity collections consistent with an
//! upstream that may be slow, unreachable or missing data, and lets the UI
//! keep working through connectivity loss.
//!
//! ## Design Principles
//!
//! - **Last known good**: a failed fetch never clears what is cached
//! - **Writes before reads**: queued offline writes are replayed before any
//!   fresh fetch, so a stale read can't undo a write
//! - **Single flight**: at most one full refresh runs at a time
//! - **Injected I/O**: the upstream, the probe and the key-value store are
//!   traits, so the engine runs against fakes in tests
//!
//! ## Core Concepts
//!
//! ### Cache
//!
//! A [`CacheSnapshot`] maps each entity type to an [`EntityCollection`] of
//! [`Record`]s, and tracks whether each collection came from the upstream or
//! from placeholder data ([`DataSource`]). Single-record types such as
//! `platform_config` are kept apart, see [`CacheSnapshot::singleton`].
//! Snapshots are immutable; observers hold an `Arc` and never see a
//! half-applied sync.
//!
//! ### Topics
//!
//! The [`EventBus`] delivers typed events: [`DataRefresh`] after a full
//! refresh, [`CollectionUpdated`] and [`RecordUpdated`] per entity type,
//! [`MutationQueued`] with the pending count and [`ConnectivityChanged`].
//! A panicking listener is isolated from the others.
//!
//! ### Offline writes
//!
//! Writes made while the upstream is unreachable go to the
//! [`OfflineMutationQueue`], which is persisted through a [`KeyValueStore`]
//! and replayed strictly in order once connectivity returns.
//!
//! ### Reconnect
//!
//! [`SyncEngine::start`] spawns a reconnect supervisor with exponential
//! backoff ([`BackoffPolicy`]) and a periodic refresh.
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use dashsync_engine::{
//!     ConnectivityProbe, EngineConfig, EntityName, EntityWrite, Reachability, Record,
//!     RemoteError, RemoteSource, SyncEngine,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Upstream;
//!
//! #[async_trait]
//! impl RemoteSource for Upstream {
//!     async fn fetch(&self, _entity_type: &EntityName) -> Result<Vec<Record>, RemoteError> {
//!         Ok(vec![Record::from_value(json!({"id": "u1", "name": "Alice"})).unwrap()])
//!     }
//!
//!     async fn write(&self, _write: &EntityWrite) -> Result<Option<Record>, RemoteError> {
//!         Ok(None)
//!     }
//! }
//!
//! struct AlwaysUp;
//!
//! #[async_trait]
//! impl ConnectivityProbe for AlwaysUp {
//!     async fn check(&self, _timeout: Duration) -> Reachability {
//!         Reachability::Reachable
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = SyncEngine::builder(Arc::new(Upstream), Arc::new(AlwaysUp))
//!     .config(EngineConfig::default().with_entity_types(["users"]))
//!     .build()
//!     .await
//!     .unwrap();
//!
//! let report = engine.sync_all().await;
//! assert_eq!(report.updated(), 1);
//! assert!(engine.cache().record("users", "u1").is_some());
//! # });
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod mutation;
pub mod persist;
pub mod probe;
pub mod queue;
pub mod record;
pub mod remote;
pub mod stats;
pub mod supervisor;
pub mod syncer;

// Re-export main types at crate root
pub use bus::{
    CollectionUpdated, ConnectivityChanged, DataRefresh, EventBus, MutationQueued,
    RecordUpdated, Subscription, Topic, TopicKey,
};
pub use cache::{CacheSnapshot, ConnectivityState, DataSource};
pub use config::{
    BackoffPolicy, EngineConfig, DEFAULT_ENTITY_TYPES, DEFAULT_OWNER_SCOPED_TYPES,
    DEFAULT_SINGLETON_TYPES,
};
pub use engine::{MutationOutcome, SyncEngine, SyncEngineBuilder, SyncReport};
pub use error::Error;
pub use fallback::{FallbackDataProvider, StaticFallback};
pub use mutation::{EntityWrite, MutationOp, NewMutation, PendingMutation};
pub use persist::{JsonFileStore, KeyValueStore, MemoryStore};
pub use probe::{ConnectivityProbe, DebouncedProbe, Reachability};
pub use queue::{DrainReport, OfflineMutationQueue};
pub use record::{EntityCollection, Record};
pub use remote::{RemoteError, RemoteSource, CREATED_BY};
pub use stats::DashboardStats;
pub use supervisor::BackgroundTasks;
pub use syncer::SyncOutcome;

/// Type aliases for clarity
pub type RecordId = String;
pub type EntityName = String;
pub type MutationId = u64;
