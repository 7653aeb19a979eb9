//! Bridge from the engine's event bus to connected dashboards.

use std::sync::Arc;

use dashsync_engine::{
    CollectionUpdated, ConnectivityChanged, DataRefresh, EngineConfig, EventBus, MutationQueued,
    RecordUpdated, Subscription, Topic,
};
use serde::Serialize;

use super::{ConnectionManager, ServerMessage};

/// Forward every engine topic to all WebSocket connections.
///
/// Record writes are published under the entity name the caller used, so
/// both `routines_updated` and `routine_updated` are covered. Returns the
/// subscriptions so the caller can detach the bridge.
pub fn forward_engine_events(
    bus: &EventBus,
    config: &EngineConfig,
    manager: &Arc<ConnectionManager>,
) -> Vec<Subscription> {
    let mut subscriptions = vec![
        forward(bus, manager, DataRefresh),
        forward(bus, manager, MutationQueued),
        forward(bus, manager, ConnectivityChanged),
    ];

    for entity_type in &config.entity_types {
        subscriptions.push(forward(bus, manager, CollectionUpdated(entity_type.clone())));
        subscriptions.push(forward(bus, manager, RecordUpdated(entity_type.clone())));

        if let Some(singular) = entity_type.strip_suffix('s').filter(|s| !s.is_empty()) {
            subscriptions.push(forward(bus, manager, RecordUpdated(singular.to_string())));
        }
    }

    tracing::debug!(topics = subscriptions.len(), "Forwarding engine events to WebSocket clients");

    subscriptions
}

fn forward<T>(bus: &EventBus, manager: &Arc<ConnectionManager>, topic: T) -> Subscription
where
    T: Topic,
    T::Payload: Serialize,
{
    let name = topic.key().to_string();
    let manager = Arc::clone(manager);

    bus.subscribe(topic, move |payload| {
        if manager.connection_count() == 0 {
            return;
        }
        match serde_json::to_value(payload) {
            Ok(value) => {
                let sent = manager.broadcast_all(ServerMessage::event(name.clone(), value));
                tracing::trace!(topic = %name, recipients = sent, "Forwarded event");
            }
            Err(e) => tracing::error!(topic = %name, "Failed to serialize event: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashsync_engine::{ConnectivityState, Record};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connected() -> (Arc<ConnectionManager>, mpsc::UnboundedReceiver<ServerMessage>) {
        let manager = ConnectionManager::new_shared();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register(None, tx);
        (manager, rx)
    }

    fn event(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> serde_json::Value {
        serde_json::to_value(rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn forwards_topics_with_wire_names() {
        let bus = EventBus::new();
        let config = EngineConfig::default().with_entity_types(["routines"]);
        let (manager, mut rx) = connected();
        forward_engine_events(&bus, &config, &manager);

        bus.publish(&MutationQueued, &2);
        bus.publish(&ConnectivityChanged, &ConnectivityState::Offline);

        assert_eq!(
            event(&mut rx),
            json!({"type": "event", "topic": "mutation_queued", "payload": 2})
        );
        assert_eq!(
            event(&mut rx),
            json!({"type": "event", "topic": "connectivity_changed", "payload": "offline"})
        );
    }

    #[test]
    fn singular_record_topics_are_covered() {
        let bus = EventBus::new();
        let config = EngineConfig::default().with_entity_types(["routines"]);
        let (manager, mut rx) = connected();
        forward_engine_events(&bus, &config, &manager);

        let record = Record::from_value(json!({"id": "r1", "is_active": false})).unwrap();
        bus.publish(&RecordUpdated("routine".into()), &record);

        let message = event(&mut rx);
        assert_eq!(message["topic"], "routine_updated");
        assert_eq!(message["payload"]["id"], "r1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribing_detaches_the_bridge() {
        let bus = EventBus::new();
        let config = EngineConfig::default().with_entity_types(Vec::<String>::new());
        let (manager, mut rx) = connected();

        for subscription in forward_engine_events(&bus, &config, &manager) {
            subscription.unsubscribe();
        }
        bus.publish(&MutationQueued, &1);

        assert!(rx.try_recv().is_err());
        assert_eq!(bus.topic_count(), 0);
    }
}
