//! Topic-based publish/subscribe for engine observers.
//!
//! Every topic is a type implementing [`Topic`], whose associated `Payload`
//! fixes what subscribers of that topic receive. A subscriber to
//! [`DataRefresh`] can only ever be handed a [`CacheSnapshot`], checked at
//! compile time.
//!
//! Delivery is synchronous and in subscription order. A listener that panics
//! is isolated: the panic is caught and logged, and the remaining listeners
//! still receive the event.

use crate::cache::{CacheSnapshot, ConnectivityState};
use crate::{EntityCollection, EntityName, Error, Record};
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Runtime key a topic is registered under; also its wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey(String);

impl TopicKey {
    /// Wire name of the topic (e.g. `data_refresh`, `agents_updated`).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named channel with a fixed payload type.
pub trait Topic {
    /// What subscribers of this topic receive.
    type Payload: Any + Send + Sync;

    /// Runtime key and wire name.
    fn key(&self) -> TopicKey;
}

/// Full cache refresh (`data_refresh`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DataRefresh;

impl Topic for DataRefresh {
    type Payload = CacheSnapshot;

    fn key(&self) -> TopicKey {
        TopicKey("data_refresh".to_string())
    }
}

/// One entity type's collection was refreshed (`${entity_type}_updated`).
#[derive(Debug, Clone)]
pub struct CollectionUpdated(pub EntityName);

impl Topic for CollectionUpdated {
    type Payload = EntityCollection;

    fn key(&self) -> TopicKey {
        TopicKey(format!("{}_updated", self.0))
    }
}

/// A single record was written (`${entity}_updated`), keyed by the entity
/// name the mutation caller used.
#[derive(Debug, Clone)]
pub struct RecordUpdated(pub EntityName);

impl Topic for RecordUpdated {
    type Payload = Record;

    fn key(&self) -> TopicKey {
        TopicKey(format!("{}_updated", self.0))
    }
}

/// A write was queued for later replay (`mutation_queued`); payload is the
/// pending count.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationQueued;

impl Topic for MutationQueued {
    type Payload = usize;

    fn key(&self) -> TopicKey {
        TopicKey("mutation_queued".to_string())
    }
}

/// Settled connectivity changed (`connectivity_changed`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectivityChanged;

impl Topic for ConnectivityChanged {
    type Payload = ConnectivityState;

    fn key(&self) -> TopicKey {
        TopicKey("connectivity_changed".to_string())
    }
}

/// Identifier of one subscription.
pub type SubscriptionId = String;

type Listener = Arc<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    /// Listeners per topic, in subscription order.
    topics: DashMap<TopicKey, Vec<(SubscriptionId, Listener)>>,
}

impl BusInner {
    fn remove(&self, key: &TopicKey, id: &str) -> bool {
        let mut removed = false;
        if let Some(mut listeners) = self.topics.get_mut(key) {
            let before = listeners.len();
            listeners.retain(|(sub_id, _)| sub_id != id);
            removed = listeners.len() != before;
            if listeners.is_empty() {
                drop(listeners);
                self.topics.remove_if(key, |_, l| l.is_empty());
            }
        }
        removed
    }
}

/// Publish/subscribe hub shared by the engine and its observers.
///
/// Cheap to clone; clones share the same subscriptions.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.inner.topics.len())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic.
    ///
    /// The subscription lives until [`Subscription::unsubscribe`] is called;
    /// dropping the handle does not remove the listener.
    pub fn subscribe<T, F>(&self, topic: T, callback: F) -> Subscription
    where
        T: Topic,
        F: Fn(&T::Payload) + Send + Sync + 'static,
    {
        let key = topic.key();
        let id = uuid::Uuid::new_v4().to_string();

        let listener: Listener = Arc::new(move |payload: &dyn Any| {
            if let Some(payload) = payload.downcast_ref::<T::Payload>() {
                callback(payload);
            }
        });

        self.inner
            .topics
            .entry(key.clone())
            .or_default()
            .push((id.clone(), listener));

        tracing::trace!(topic = %key, subscription = %id, "Listener subscribed");

        Subscription {
            id,
            key,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a payload to every current subscriber of a topic.
    ///
    /// Returns the number of listeners that were invoked, including ones
    /// that panicked.
    pub fn publish<T: Topic>(&self, topic: &T, payload: &T::Payload) -> usize {
        let key = topic.key();

        // Snapshot so listeners can (un)subscribe without deadlocking.
        let listeners: Vec<Listener> = match self.inner.topics.get(&key) {
            Some(entry) => entry.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return 0,
        };

        for listener in &listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener(payload as &dyn Any)));
            if let Err(panic) = delivered {
                let err = Error::ListenerException {
                    topic: key.to_string(),
                    message: panic_message(panic.as_ref()),
                };
                tracing::error!(topic = %key, "{}", err);
            }
        }

        tracing::trace!(topic = %key, listeners = listeners.len(), "Published event");

        listeners.len()
    }

    /// Number of listeners currently subscribed to a topic.
    pub fn subscriber_count<T: Topic>(&self, topic: &T) -> usize {
        self.inner
            .topics
            .get(&topic.key())
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Number of topics with at least one listener.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    key: TopicKey,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// The subscription's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The topic this subscription listens on.
    pub fn topic(&self) -> &TopicKey {
        &self.key
    }

    /// Remove the listener. Returns false if it was already gone (or the bus
    /// has been dropped).
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let removed = bus.remove(&self.key, &self.id);
        if removed {
            tracing::trace!(topic = %self.key, subscription = %self.id, "Listener unsubscribed");
        }
        removed
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
