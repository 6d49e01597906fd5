//! Routing of inbound COV notifications to subscriptions and handlers.

use crate::local::LocalDevice;
use crate::negotiator::SubscriptionMechanism;
use crate::registry::WireRoute;
use crate::subscription::SubscriptionId;
use covnet_core::codec::{decode_value, Decoded};
use covnet_core::types::PropertyValue;
use covnet_core::PropertyRef;
use covnet_engine::{CovEvent, EngineEvent, EventListener, ProtocolEngine};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// The values one notification (or one poll) delivered for a subscription.
/// Refs carry the priority the device reported with a value, if any.
pub type CovUpdates = HashMap<PropertyRef, PropertyValue>;

/// Flattens `updates` into numbers, bits and text. Values with no plain form
/// (null, an unspecified date) are left out.
pub fn decode_updates(updates: &CovUpdates) -> HashMap<PropertyRef, Decoded> {
    updates
        .iter()
        .filter_map(|(r, value)| decode_value(value).map(|d| (*r, d)))
        .collect()
}

/// Receives decoded COV updates for every subscription.
///
/// Each call carries the complete map for one notification. Handlers run on
/// the network's dispatcher task and should return quickly.
pub trait CovHandler: Send + Sync {
    fn on_cov(&self, subscription: SubscriptionId, updates: &CovUpdates);
}

impl<F> CovHandler for F
where
    F: Fn(SubscriptionId, &CovUpdates) + Send + Sync,
{
    fn on_cov(&self, subscription: SubscriptionId, updates: &CovUpdates) {
        self(subscription, updates)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

#[derive(Default)]
pub(crate) struct HandlerSet {
    handlers: DashMap<HandlerId, Arc<dyn CovHandler>>,
    next: AtomicU64,
}

impl HandlerSet {
    pub fn add(&self, handler: Arc<dyn CovHandler>) -> HandlerId {
        let id = HandlerId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.handlers.insert(id, handler);
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn notify(&self, subscription: SubscriptionId, updates: &CovUpdates) {
        // Snapshot first so handlers may add or remove handlers.
        let handlers: Vec<_> = self.handlers.iter().map(|h| h.value().clone()).collect();
        for handler in handlers {
            handler.on_cov(subscription, updates);
        }
    }
}

/// The listener registered with each engine: hands events to the
/// dispatcher task without doing any work on the engine's thread.
pub(crate) struct EventForwarder {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventForwarder {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventListener for EventForwarder {
    fn on_event(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Drains engine events until the engine drops its listener or the local
/// device goes away.
pub(crate) async fn run_dispatcher<E: ProtocolEngine>(
    local: Weak<LocalDevice<E>>,
    mut rx: mpsc::UnboundedReceiver<EngineEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(local) = local.upgrade() else {
            break;
        };
        match event {
            EngineEvent::Cov(event) => handle_notification(&local, &event),
            EngineEvent::ListenerError(message) => {
                log::error!("protocol engine reported an error: {message}");
            }
        }
    }
    log::debug!("notification dispatcher stopped");
}

pub(crate) fn handle_notification<E: ProtocolEngine>(local: &LocalDevice<E>, event: &CovEvent) {
    let Some(route) = local.registry.route(event.wire_id) else {
        log::debug!(
            "dropping notification from device {} for unknown or stale wire id {}",
            event.device_id,
            event.wire_id
        );
        return;
    };
    log::trace!(
        "notification {} for {} from device {} object {} ({:?} remaining)",
        event.wire_id,
        route.subscription,
        event.device_id,
        event.object_id,
        event.time_remaining
    );
    let Some(updates) = translate(&route, event) else {
        log::debug!(
            "dropping notification {} from device {} object {}: does not match its subscription",
            event.wire_id,
            event.device_id,
            event.object_id
        );
        return;
    };
    if !updates.is_empty() {
        deliver(local, route.subscription, &updates);
    }
}

/// Maps a notification's values to refs. `None` when the notification
/// cannot belong to the route's subscription.
pub(crate) fn translate(route: &WireRoute, event: &CovEvent) -> Option<CovUpdates> {
    if event.device_id != route.device_id {
        return None;
    }
    if route.object_id.is_some_and(|o| o != event.object_id) {
        return None;
    }
    let object_type = event.object_id.object_type();
    let instance = event.object_id.instance();
    let mut updates = CovUpdates::with_capacity(event.values.len());
    for value in &event.values {
        let array_index = match (route.mechanism, route.property) {
            (SubscriptionMechanism::SinglePropertyWithIncrement, Some((property_id, index)))
                if property_id == value.property_id =>
            {
                index
            }
            _ => value.array_index,
        };
        let mut r = PropertyRef::new(route.device_id, object_type, instance, value.property_id);
        r.array_index = array_index;
        if let Some(priority) = value.priority {
            r = r.with_priority(priority);
        }
        updates.insert(r, value.value.clone());
    }
    Some(updates)
}

/// Refreshes the cache and hands one complete map to every handler.
pub(crate) fn deliver<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    subscription: SubscriptionId,
    updates: &CovUpdates,
) {
    for (r, value) in updates {
        local.cache.store(r, value);
    }
    local.handlers.notify(subscription, updates);
}

#[cfg(test)]
mod tests {
    use super::*;
    use covnet_core::codec::Number;
    use covnet_core::types::{ObjectId, ObjectType, PropertyId};
    use covnet_engine::{CovValue, WireSubscriptionId};
    use std::sync::Mutex;
    use std::time::Duration;

    const AO2: ObjectId = ObjectId::new(ObjectType::AnalogOutput, 2);

    fn event(values: Vec<CovValue>) -> CovEvent {
        CovEvent {
            wire_id: WireSubscriptionId(4),
            device_id: 5,
            object_id: AO2,
            time_remaining: Duration::from_secs(60),
            values,
        }
    }

    fn value(property_id: PropertyId, array_index: Option<u32>, v: f32) -> CovValue {
        CovValue {
            property_id,
            array_index,
            value: PropertyValue::Real(v),
            priority: None,
        }
    }

    #[test]
    fn single_property_route_supplies_array_index() {
        let route = WireRoute {
            subscription: SubscriptionId(1),
            device_id: 5,
            object_id: Some(AO2),
            mechanism: SubscriptionMechanism::SinglePropertyWithIncrement,
            property: Some((PropertyId::PriorityArray, Some(8))),
        };
        let updates = translate(
            &route,
            &event(vec![
                value(PropertyId::PriorityArray, None, 1.0),
                value(PropertyId::PresentValue, None, 2.0),
            ]),
        )
        .unwrap();
        let indexed = PropertyRef::new(5, ObjectType::AnalogOutput, 2, PropertyId::PriorityArray)
            .with_array_index(8);
        assert_eq!(updates.get(&indexed), Some(&PropertyValue::Real(1.0)));
        assert_eq!(
            updates.get(&PropertyRef::present_value(5, ObjectType::AnalogOutput, 2)),
            Some(&PropertyValue::Real(2.0))
        );
    }

    #[test]
    fn mismatched_source_is_rejected() {
        let route = WireRoute {
            subscription: SubscriptionId(1),
            device_id: 5,
            object_id: Some(ObjectId::new(ObjectType::AnalogOutput, 3)),
            mechanism: SubscriptionMechanism::WholeObject,
            property: None,
        };
        assert!(translate(&route, &event(vec![])).is_none());

        let multiple = WireRoute {
            object_id: None,
            mechanism: SubscriptionMechanism::PropertiesMultiple,
            device_id: 6,
            ..route
        };
        assert!(translate(&multiple, &event(vec![])).is_none());
    }

    #[test]
    fn whole_object_values_are_taken_as_is() {
        let route = WireRoute {
            subscription: SubscriptionId(1),
            device_id: 5,
            object_id: Some(AO2),
            mechanism: SubscriptionMechanism::WholeObject,
            property: None,
        };
        let payload = event(vec![value(PropertyId::PriorityArray, Some(3), 9.0)]);
        let updates = translate(&route, &payload).unwrap();
        let r = PropertyRef::new(5, ObjectType::AnalogOutput, 2, PropertyId::PriorityArray)
            .with_array_index(3);
        assert_eq!(updates.get(&r), Some(&PropertyValue::Real(9.0)));
    }

    #[test]
    fn reported_priority_is_kept_on_the_ref() {
        let route = WireRoute {
            subscription: SubscriptionId(1),
            device_id: 5,
            object_id: Some(AO2),
            mechanism: SubscriptionMechanism::WholeObject,
            property: None,
        };
        let mut commanded = value(PropertyId::PresentValue, None, 7.0);
        commanded.priority = Some(8);
        let updates = translate(&route, &event(vec![commanded])).unwrap();
        let r = PropertyRef::present_value(5, ObjectType::AnalogOutput, 2);
        assert_eq!(
            updates.get(&r.with_priority(8)),
            Some(&PropertyValue::Real(7.0))
        );
        assert!(!updates.contains_key(&r));
    }

    #[test]
    fn updates_decode_to_plain_values() {
        let analog = PropertyRef::present_value(1, ObjectType::AnalogInput, 1);
        let binary = PropertyRef::present_value(1, ObjectType::BinaryInput, 1);
        let unset = PropertyRef::new(1, ObjectType::AnalogInput, 1, PropertyId::ObjectName);
        let mut updates = CovUpdates::new();
        updates.insert(analog, PropertyValue::Real(21.5));
        updates.insert(binary, PropertyValue::Enumerated(1));
        updates.insert(unset, PropertyValue::Null);

        let decoded = decode_updates(&updates);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[&analog], Decoded::Number(Number::Float(21.5)));
        assert_eq!(decoded[&binary], Decoded::Number(Number::Integer(1)));
    }

    #[test]
    fn handlers_see_each_map_once() {
        let set = HandlerSet::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = set.add(Arc::new(move |sub: SubscriptionId, updates: &CovUpdates| {
            sink.lock().unwrap().push((sub, updates.len()));
        }));
        let mut updates = CovUpdates::new();
        updates.insert(
            PropertyRef::present_value(1, ObjectType::AnalogInput, 1),
            PropertyValue::Real(1.0),
        );
        set.notify(SubscriptionId(3), &updates);
        assert!(set.remove(id));
        set.notify(SubscriptionId(3), &updates);
        assert_eq!(*seen.lock().unwrap(), vec![(SubscriptionId(3), 1)]);
    }
}
