//! In-memory BACnet network.
//!
//! [`SimulatedNetwork`] holds a set of devices with objects and properties,
//! and acts as an [`EngineFactory`] whose [`SimulatedEngine`]s answer reads,
//! writes and COV subscriptions against that shared state. Property changes
//! produce COV notifications for matching subscriptions. Every engine call is
//! recorded so callers can assert on request counts.

use crate::error::{codes, EngineError};
use crate::event::{CovEvent, CovValue, EngineEvent, EventListener};
use crate::request::{ReadAccess, SubscribeRequest, WireSubscriptionId, WriteAccess};
use crate::traits::{EngineFactory, EngineSettings, ProtocolEngine};
use covnet_core::types::{ObjectId, ObjectType, PropertyId, PropertyValue, ServicesSupported};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Engine operations, for call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    ReadServicesSupported,
    Subscribe,
    Unsubscribe,
    ReadProperty,
    ReadPropertyMultiple,
    WriteProperty,
    WritePropertyMultiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub device_id: u32,
}

/// A write a device accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub device_id: u32,
    pub access: WriteAccess,
}

/// A subscription a simulated device currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSubscription {
    pub wire_id: WireSubscriptionId,
    pub device_id: u32,
    pub request: SubscribeRequest,
    engine: u64,
}

type PropertyKey = (PropertyId, Option<u32>);

#[derive(Default)]
struct SimDevice {
    services: ServicesSupported,
    objects: HashMap<ObjectId, HashMap<PropertyKey, PropertyValue>>,
    reachable: bool,
    hanging: bool,
    write_denied: HashSet<ObjectId>,
    subscribe_denied: HashSet<ObjectId>,
    subscribe_stalled: HashSet<ObjectId>,
}

impl SimDevice {
    fn lookup(&self, access: &ReadAccess) -> Result<PropertyValue, EngineError> {
        let props = self.objects.get(&access.object_id).ok_or(EngineError::Remote {
            error_class: codes::CLASS_OBJECT,
            error_code: codes::CODE_UNKNOWN_OBJECT,
        })?;
        if let Some(value) = props.get(&(access.property_id, access.array_index)) {
            return Ok(value.clone());
        }
        let whole_array = props.contains_key(&(access.property_id, None));
        let error_code = if access.array_index.is_some() && whole_array {
            codes::CODE_INVALID_ARRAY_INDEX
        } else {
            codes::CODE_UNKNOWN_PROPERTY
        };
        Err(EngineError::Remote {
            error_class: codes::CLASS_PROPERTY,
            error_code,
        })
    }

    fn check_write(&self, access: &WriteAccess) -> Result<(), EngineError> {
        if !self.objects.contains_key(&access.object_id) {
            return Err(EngineError::Remote {
                error_class: codes::CLASS_OBJECT,
                error_code: codes::CODE_UNKNOWN_OBJECT,
            });
        }
        if self.write_denied.contains(&access.object_id) {
            return Err(EngineError::Remote {
                error_class: codes::CLASS_PROPERTY,
                error_code: codes::CODE_WRITE_ACCESS_DENIED,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct NetworkState {
    devices: HashMap<u32, SimDevice>,
    subscriptions: BTreeMap<WireSubscriptionId, ActiveSubscription>,
    listeners: HashMap<u64, Vec<Arc<dyn EventListener>>>,
    live_engines: HashSet<u64>,
    next_wire_id: u32,
    next_engine: u64,
    calls: Vec<RecordedCall>,
    writes: Vec<RecordedWrite>,
    settings: Vec<EngineSettings>,
    create_error: Option<EngineError>,
}

type Dispatch = Vec<(Arc<dyn EventListener>, EngineEvent)>;

impl NetworkState {
    /// Stores a value and collects the notifications it triggers.
    fn store(
        &mut self,
        device_id: u32,
        object_id: ObjectId,
        key: PropertyKey,
        value: PropertyValue,
    ) -> Dispatch {
        let Some(device) = self.devices.get_mut(&device_id) else {
            return Vec::new();
        };
        let props = device.objects.entry(object_id).or_default();
        let previous = props.insert(key, value.clone());
        let device = &self.devices[&device_id];

        let mut out = Vec::new();
        for sub in self.subscriptions.values() {
            if sub.device_id != device_id || !self.live_engines.contains(&sub.engine) {
                continue;
            }
            let values =
                notification_values(device, sub, object_id, key, previous.as_ref(), &value);
            if values.is_empty() {
                continue;
            }
            let event = EngineEvent::Cov(CovEvent {
                wire_id: sub.wire_id,
                device_id,
                object_id,
                time_remaining: sub.request.lifetime(),
                values,
            });
            for listener in self.listeners.get(&sub.engine).into_iter().flatten() {
                out.push((listener.clone(), event.clone()));
            }
        }
        out
    }

    fn broadcast(&self, event: &EngineEvent) -> Dispatch {
        self.listeners
            .values()
            .flatten()
            .map(|l| (l.clone(), event.clone()))
            .collect()
    }
}

fn notification_values(
    device: &SimDevice,
    sub: &ActiveSubscription,
    object_id: ObjectId,
    (property_id, array_index): PropertyKey,
    previous: Option<&PropertyValue>,
    value: &PropertyValue,
) -> Vec<CovValue> {
    match &sub.request {
        SubscribeRequest::Object { object_id: o, .. } => {
            if *o != object_id
                || array_index.is_some()
                || !matches!(property_id, PropertyId::PresentValue | PropertyId::StatusFlags)
            {
                return Vec::new();
            }
            let Some(props) = device.objects.get(&object_id) else {
                return Vec::new();
            };
            [PropertyId::PresentValue, PropertyId::StatusFlags]
                .into_iter()
                .filter_map(|p| {
                    props.get(&(p, None)).map(|v| CovValue {
                        property_id: p,
                        array_index: None,
                        value: v.clone(),
                        priority: None,
                    })
                })
                .collect()
        }
        SubscribeRequest::Property {
            object_id: o,
            property_id: p,
            array_index: i,
            cov_increment,
            ..
        } => {
            if *o != object_id || *p != property_id || *i != array_index {
                return Vec::new();
            }
            if !exceeds_increment(previous, value, *cov_increment) {
                return Vec::new();
            }
            // Single-property notifications do not echo the array index.
            vec![CovValue {
                property_id,
                array_index: None,
                value: value.clone(),
                priority: None,
            }]
        }
        SubscribeRequest::PropertiesMultiple { specifications, .. } => specifications
            .iter()
            .filter(|spec| spec.object_id == object_id)
            .flat_map(|spec| spec.references.iter())
            .filter(|r| {
                r.property_id == property_id
                    && r.array_index == array_index
                    && exceeds_increment(previous, value, r.cov_increment)
            })
            .map(|r| CovValue {
                property_id,
                array_index: r.array_index,
                value: value.clone(),
                priority: None,
            })
            .collect(),
    }
}

fn exceeds_increment(
    previous: Option<&PropertyValue>,
    value: &PropertyValue,
    increment: Option<f32>,
) -> bool {
    let (Some(increment), Some(previous)) = (increment, previous) else {
        return true;
    };
    match (as_f64(previous), as_f64(value)) {
        (Some(a), Some(b)) => (b - a).abs() >= f64::from(increment),
        _ => true,
    }
}

fn as_f64(value: &PropertyValue) -> Option<f64> {
    match value {
        PropertyValue::Real(v) => Some(f64::from(*v)),
        PropertyValue::Double(v) => Some(*v),
        PropertyValue::Unsigned(v) => Some(*v as f64),
        PropertyValue::Signed(v) => Some(*v as f64),
        _ => None,
    }
}

fn dispatch(events: Dispatch) {
    for (listener, event) in events {
        listener.on_event(event);
    }
}

/// Shared state of every simulated device. Cloning yields another handle to
/// the same network.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a reachable device with a device object advertising `services`.
    pub fn add_device(&self, device_id: u32, services: ServicesSupported) {
        let mut state = self.lock();
        let device = state.devices.entry(device_id).or_default();
        device.services = services;
        device.reachable = true;
        let device_object = ObjectId::new(ObjectType::Device, device_id);
        device.objects.entry(device_object).or_default().insert(
            (PropertyId::ProtocolServicesSupported, None),
            PropertyValue::BitString(services.to_bit_string()),
        );
    }

    pub fn set_services(&self, device_id: u32, services: ServicesSupported) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.services = services;
        }
    }

    /// Adds (or replaces) an object with its scalar properties.
    pub fn add_object(
        &self,
        device_id: u32,
        object_id: ObjectId,
        properties: impl IntoIterator<Item = (PropertyId, PropertyValue)>,
    ) {
        let mut state = self.lock();
        if let Some(device) = state.devices.get_mut(&device_id) {
            device.objects.insert(
                object_id,
                properties.into_iter().map(|(p, v)| ((p, None), v)).collect(),
            );
        }
    }

    /// Changes a property as if the device's own logic did, notifying
    /// matching subscribers.
    pub fn set_property(
        &self,
        device_id: u32,
        object_id: ObjectId,
        property_id: PropertyId,
        value: PropertyValue,
    ) {
        self.set_property_at(device_id, object_id, property_id, None, value);
    }

    pub fn set_property_at(
        &self,
        device_id: u32,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
        value: PropertyValue,
    ) {
        let events = self
            .lock()
            .store(device_id, object_id, (property_id, array_index), value);
        dispatch(events);
    }

    pub fn property(
        &self,
        device_id: u32,
        object_id: ObjectId,
        property_id: PropertyId,
    ) -> Option<PropertyValue> {
        self.lock()
            .devices
            .get(&device_id)?
            .objects
            .get(&object_id)?
            .get(&(property_id, None))
            .cloned()
    }

    /// Unreachable devices time out every request.
    pub fn set_reachable(&self, device_id: u32, reachable: bool) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.reachable = reachable;
        }
    }

    /// Hanging devices never answer; the caller's own timeout has to fire.
    pub fn set_hanging(&self, device_id: u32, hanging: bool) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.hanging = hanging;
        }
    }

    pub fn deny_writes(&self, device_id: u32, object_id: ObjectId) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            device.write_denied.insert(object_id);
        }
    }

    /// Makes the device refuse COV subscriptions that touch `object_id`.
    pub fn deny_subscriptions(&self, device_id: u32, object_id: ObjectId, deny: bool) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            if deny {
                device.subscribe_denied.insert(object_id);
            } else {
                device.subscribe_denied.remove(&object_id);
            }
        }
    }

    /// Makes COV subscriptions that touch `object_id` go unanswered, while
    /// the rest of the device keeps responding.
    pub fn stall_subscriptions(&self, device_id: u32, object_id: ObjectId, stall: bool) {
        if let Some(device) = self.lock().devices.get_mut(&device_id) {
            if stall {
                device.subscribe_stalled.insert(object_id);
            } else {
                device.subscribe_stalled.remove(&object_id);
            }
        }
    }

    /// Delivers an arbitrary notification to every live engine's listeners.
    pub fn inject(&self, event: CovEvent) {
        let events = self.lock().broadcast(&EngineEvent::Cov(event));
        dispatch(events);
    }

    pub fn inject_error(&self, message: impl Into<String>) {
        let events = self
            .lock()
            .broadcast(&EngineEvent::ListenerError(message.into()));
        dispatch(events);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, kind: CallKind, device_id: u32) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind == kind && c.device_id == device_id)
            .count()
    }

    pub fn total_calls(&self, kind: CallKind) -> usize {
        self.lock().calls.iter().filter(|c| c.kind == kind).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    pub fn active_subscriptions(&self, device_id: u32) -> Vec<ActiveSubscription> {
        self.lock()
            .subscriptions
            .values()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn engines_created(&self) -> usize {
        self.lock().settings.len()
    }

    pub fn live_engines(&self) -> usize {
        self.lock().live_engines.len()
    }

    pub fn last_settings(&self) -> Option<EngineSettings> {
        self.lock().settings.last().cloned()
    }

    /// Makes the next engine creation fail with `error`.
    pub fn fail_next_create(&self, error: EngineError) {
        self.lock().create_error = Some(error);
    }
}

impl EngineFactory for SimulatedNetwork {
    type Engine = SimulatedEngine;

    fn create(&self, settings: &EngineSettings) -> Result<SimulatedEngine, EngineError> {
        let mut state = self.lock();
        if let Some(err) = state.create_error.take() {
            return Err(err);
        }
        state.settings.push(settings.clone());
        state.next_engine += 1;
        let id = state.next_engine;
        state.live_engines.insert(id);
        log::debug!("simulated engine {id} created for local device {}", settings.local_device_id);
        Ok(SimulatedEngine {
            network: self.clone(),
            id,
        })
    }
}

enum Admission {
    Ready(Result<(), EngineError>),
    Hang,
}

/// A [`ProtocolEngine`] backed by a [`SimulatedNetwork`].
pub struct SimulatedEngine {
    network: SimulatedNetwork,
    id: u64,
}

impl SimulatedEngine {
    /// Records the call, then resolves once the device would have answered.
    async fn admit(&self, kind: CallKind, device_id: u32) -> Result<(), EngineError> {
        let admission = {
            let mut state = self.network.lock();
            state.calls.push(RecordedCall { kind, device_id });
            if !state.live_engines.contains(&self.id) {
                Admission::Ready(Err(EngineError::Transport("engine terminated".into())))
            } else {
                match state.devices.get(&device_id) {
                    None => Admission::Ready(Err(EngineError::UnknownDevice(device_id))),
                    Some(d) if d.hanging => Admission::Hang,
                    Some(d) if !d.reachable => Admission::Ready(Err(EngineError::Timeout)),
                    Some(_) => Admission::Ready(Ok(())),
                }
            }
        };
        match admission {
            Admission::Ready(result) => result,
            Admission::Hang => std::future::pending().await,
        }
    }

    fn with_device<T>(
        &self,
        device_id: u32,
        f: impl FnOnce(&mut NetworkState) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut state = self.network.lock();
        if !state.devices.contains_key(&device_id) {
            return Err(EngineError::UnknownDevice(device_id));
        }
        f(&mut state)
    }

    fn require(
        &self,
        device_id: u32,
        supported: impl FnOnce(ServicesSupported) -> bool,
        name: &'static str,
    ) -> Result<(), EngineError> {
        self.with_device(device_id, |state| {
            if supported(state.devices[&device_id].services) {
                Ok(())
            } else {
                Err(EngineError::Unsupported(name))
            }
        })
    }

    fn apply_writes(&self, device_id: u32, accesses: &[WriteAccess]) -> Result<(), EngineError> {
        let events = self.with_device(device_id, |state| {
            let device = &state.devices[&device_id];
            for access in accesses {
                device.check_write(access)?;
            }
            let mut events = Vec::new();
            for access in accesses {
                let value = match &access.value {
                    PropertyValue::Null => device_relinquish(state, device_id, access),
                    v => v.clone(),
                };
                state.writes.push(RecordedWrite {
                    device_id,
                    access: access.clone(),
                });
                events.extend(state.store(
                    device_id,
                    access.object_id,
                    (access.property_id, access.array_index),
                    value,
                ));
            }
            Ok(events)
        })?;
        dispatch(events);
        Ok(())
    }
}

/// A relinquished command falls back to the object's `relinquish-default`.
fn device_relinquish(state: &NetworkState, device_id: u32, access: &WriteAccess) -> PropertyValue {
    state.devices[&device_id]
        .objects
        .get(&access.object_id)
        .and_then(|props| props.get(&(PropertyId::RelinquishDefault, None)))
        .cloned()
        .unwrap_or(PropertyValue::Null)
}

fn subscribed_objects(request: &SubscribeRequest) -> Vec<ObjectId> {
    match request {
        SubscribeRequest::Object { object_id, .. }
        | SubscribeRequest::Property { object_id, .. } => vec![*object_id],
        SubscribeRequest::PropertiesMultiple { specifications, .. } => {
            specifications.iter().map(|s| s.object_id).collect()
        }
    }
}

impl ProtocolEngine for SimulatedEngine {
    async fn read_services_supported(
        &self,
        device_id: u32,
    ) -> Result<ServicesSupported, EngineError> {
        self.admit(CallKind::ReadServicesSupported, device_id).await?;
        self.with_device(device_id, |state| Ok(state.devices[&device_id].services))
    }

    async fn subscribe(
        &self,
        device_id: u32,
        request: &SubscribeRequest,
    ) -> Result<WireSubscriptionId, EngineError> {
        self.admit(CallKind::Subscribe, device_id).await?;
        let stalled = {
            let state = self.network.lock();
            state.devices.get(&device_id).is_some_and(|d| {
                subscribed_objects(request)
                    .iter()
                    .any(|o| d.subscribe_stalled.contains(o))
            })
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        let service = request.service_name();
        self.require(
            device_id,
            |s| match request {
                SubscribeRequest::Object { .. } => s.subscribe_cov(),
                SubscribeRequest::Property { .. } => s.subscribe_cov_property(),
                SubscribeRequest::PropertiesMultiple { .. } => s.subscribe_cov_property_multiple(),
            },
            service,
        )?;
        let engine = self.id;
        self.with_device(device_id, |state| {
            let device = &state.devices[&device_id];
            for object_id in subscribed_objects(request) {
                if !device.objects.contains_key(&object_id) {
                    return Err(EngineError::Remote {
                        error_class: codes::CLASS_OBJECT,
                        error_code: codes::CODE_UNKNOWN_OBJECT,
                    });
                }
                if device.subscribe_denied.contains(&object_id) {
                    return Err(EngineError::Remote {
                        error_class: codes::CLASS_SERVICES,
                        error_code: codes::CODE_COV_SUBSCRIPTION_FAILED,
                    });
                }
            }
            state.next_wire_id = state.next_wire_id.wrapping_add(1).max(1);
            let wire_id = WireSubscriptionId(state.next_wire_id);
            state.subscriptions.insert(
                wire_id,
                ActiveSubscription {
                    wire_id,
                    device_id,
                    request: request.clone(),
                    engine,
                },
            );
            log::trace!("device {device_id} accepted {service} as {wire_id}");
            Ok(wire_id)
        })
    }

    async fn unsubscribe(
        &self,
        device_id: u32,
        id: WireSubscriptionId,
        _request: &SubscribeRequest,
    ) -> Result<(), EngineError> {
        self.admit(CallKind::Unsubscribe, device_id).await?;
        self.with_device(device_id, |state| {
            if state
                .subscriptions
                .get(&id)
                .is_some_and(|s| s.device_id == device_id)
            {
                state.subscriptions.remove(&id);
            }
            Ok(())
        })
    }

    async fn read_property(
        &self,
        device_id: u32,
        access: ReadAccess,
    ) -> Result<PropertyValue, EngineError> {
        self.admit(CallKind::ReadProperty, device_id).await?;
        self.require(device_id, ServicesSupported::read_property, "ReadProperty")?;
        self.with_device(device_id, |state| state.devices[&device_id].lookup(&access))
    }

    async fn read_property_multiple(
        &self,
        device_id: u32,
        accesses: &[ReadAccess],
    ) -> Result<Vec<Result<PropertyValue, EngineError>>, EngineError> {
        self.admit(CallKind::ReadPropertyMultiple, device_id).await?;
        self.require(
            device_id,
            ServicesSupported::read_property_multiple,
            "ReadPropertyMultiple",
        )?;
        self.with_device(device_id, |state| {
            let device = &state.devices[&device_id];
            Ok(accesses.iter().map(|a| device.lookup(a)).collect())
        })
    }

    async fn write_property(&self, device_id: u32, access: WriteAccess) -> Result<(), EngineError> {
        self.admit(CallKind::WriteProperty, device_id).await?;
        self.require(device_id, ServicesSupported::write_property, "WriteProperty")?;
        self.apply_writes(device_id, std::slice::from_ref(&access))
    }

    async fn write_property_multiple(
        &self,
        device_id: u32,
        accesses: &[WriteAccess],
    ) -> Result<(), EngineError> {
        self.admit(CallKind::WritePropertyMultiple, device_id).await?;
        self.require(
            device_id,
            ServicesSupported::write_property_multiple,
            "WritePropertyMultiple",
        )?;
        self.apply_writes(device_id, accesses)
    }

    fn register_listener(&self, listener: Arc<dyn EventListener>) {
        let mut state = self.network.lock();
        if state.live_engines.contains(&self.id) {
            state.listeners.entry(self.id).or_default().push(listener);
        }
    }

    fn terminate(&self) {
        let mut state = self.network.lock();
        state.live_engines.remove(&self.id);
        state.listeners.remove(&self.id);
        log::debug!("simulated engine {} terminated", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CovReference, CovSpecification};
    use covnet_core::types::Service;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<EngineEvent>>);

    impl EventListener for Collect {
        fn on_event(&self, event: EngineEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Collect {
        fn cov(&self) -> Vec<CovEvent> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    EngineEvent::Cov(c) => Some(c.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    const AI1: ObjectId = ObjectId::new(ObjectType::AnalogInput, 1);

    fn network(services: &[Service]) -> SimulatedNetwork {
        let net = SimulatedNetwork::new();
        net.add_device(10, ServicesSupported::of(services));
        net.add_object(
            10,
            AI1,
            [
                (PropertyId::PresentValue, PropertyValue::Real(20.0)),
                (PropertyId::StatusFlags, PropertyValue::BitString(Default::default())),
            ],
        );
        net
    }

    fn engine(net: &SimulatedNetwork) -> (SimulatedEngine, Arc<Collect>) {
        let engine = net.create(&EngineSettings::default()).unwrap();
        let listener = Arc::new(Collect::default());
        engine.register_listener(listener.clone());
        (engine, listener)
    }

    #[tokio::test]
    async fn object_subscription_reports_cov_set() {
        let net = network(&[Service::SubscribeCov, Service::ReadProperty]);
        let (engine, events) = engine(&net);
        let request = SubscribeRequest::Object {
            object_id: AI1,
            lifetime: Duration::from_secs(120),
        };
        let id = engine.subscribe(10, &request).await.unwrap();

        net.set_property(10, AI1, PropertyId::PresentValue, PropertyValue::Real(21.0));
        let cov = events.cov();
        assert_eq!(cov.len(), 1);
        assert_eq!(cov[0].wire_id, id);
        assert_eq!(cov[0].values.len(), 2);
        assert_eq!(cov[0].values[0].value, PropertyValue::Real(21.0));

        engine.unsubscribe(10, id, &request).await.unwrap();
        net.set_property(10, AI1, PropertyId::PresentValue, PropertyValue::Real(22.0));
        assert_eq!(events.cov().len(), 1);
    }

    #[tokio::test]
    async fn increment_suppresses_small_changes() {
        let net = network(&[Service::SubscribeCovPropertyMultiple]);
        let (engine, events) = engine(&net);
        let request = SubscribeRequest::PropertiesMultiple {
            lifetime: Duration::from_secs(60),
            max_notification_delay: Duration::from_secs(5),
            specifications: vec![CovSpecification {
                object_id: AI1,
                references: vec![CovReference {
                    property_id: PropertyId::PresentValue,
                    array_index: None,
                    cov_increment: Some(1.0),
                }],
            }],
        };
        engine.subscribe(10, &request).await.unwrap();
        net.set_property(10, AI1, PropertyId::PresentValue, PropertyValue::Real(20.5));
        assert!(events.cov().is_empty());
        net.set_property(10, AI1, PropertyId::PresentValue, PropertyValue::Real(21.5));
        assert_eq!(events.cov().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_service_and_unreachable_device() {
        let net = network(&[Service::ReadProperty]);
        let (engine, _) = engine(&net);
        let request = SubscribeRequest::Object {
            object_id: AI1,
            lifetime: Duration::from_secs(60),
        };
        assert_eq!(
            engine.subscribe(10, &request).await,
            Err(EngineError::Unsupported("SubscribeCOV"))
        );
        net.set_reachable(10, false);
        let access = ReadAccess {
            object_id: AI1,
            property_id: PropertyId::PresentValue,
            array_index: None,
        };
        assert_eq!(engine.read_property(10, access).await, Err(EngineError::Timeout));
        assert_eq!(net.call_count(CallKind::ReadProperty, 10), 1);
        assert_eq!(
            engine.read_services_supported(99).await,
            Err(EngineError::UnknownDevice(99))
        );
    }

    #[tokio::test]
    async fn multiple_reads_report_per_property() {
        let net = network(&[Service::ReadPropertyMultiple]);
        let (engine, _) = engine(&net);
        let results = engine
            .read_property_multiple(
                10,
                &[
                    ReadAccess {
                        object_id: AI1,
                        property_id: PropertyId::PresentValue,
                        array_index: None,
                    },
                    ReadAccess {
                        object_id: AI1,
                        property_id: PropertyId::Units,
                        array_index: None,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(results[0], Ok(PropertyValue::Real(20.0)));
        assert!(matches!(results[1], Err(EngineError::Remote { .. })));
    }

    #[tokio::test]
    async fn multiple_writes_are_all_or_nothing() {
        let net = network(&[Service::WritePropertyMultiple]);
        let ao = ObjectId::new(ObjectType::AnalogOutput, 1);
        net.add_object(10, ao, [(PropertyId::PresentValue, PropertyValue::Real(0.0))]);
        net.deny_writes(10, ao);
        let (engine, _) = engine(&net);
        let result = engine
            .write_property_multiple(
                10,
                &[
                    WriteAccess {
                        object_id: AI1,
                        property_id: PropertyId::PresentValue,
                        array_index: None,
                        value: PropertyValue::Real(1.0),
                        priority: None,
                    },
                    WriteAccess {
                        object_id: ao,
                        property_id: PropertyId::PresentValue,
                        array_index: None,
                        value: PropertyValue::Real(1.0),
                        priority: Some(8),
                    },
                ],
            )
            .await;
        assert!(result.is_err());
        assert_eq!(
            net.property(10, AI1, PropertyId::PresentValue),
            Some(PropertyValue::Real(20.0))
        );
        assert!(net.writes().is_empty());
    }

    #[tokio::test]
    async fn terminated_engine_stops_listening() {
        let net = network(&[Service::SubscribeCovProperty]);
        let (engine, events) = engine(&net);
        let request = SubscribeRequest::Property {
            object_id: AI1,
            property_id: PropertyId::PresentValue,
            array_index: None,
            cov_increment: None,
            lifetime: Duration::from_secs(60),
        };
        engine.subscribe(10, &request).await.unwrap();
        engine.terminate();
        net.set_property(10, AI1, PropertyId::PresentValue, PropertyValue::Real(30.0));
        assert!(events.cov().is_empty());
        assert_eq!(net.live_engines(), 0);
        assert!(matches!(
            engine.read_services_supported(10).await,
            Err(EngineError::Transport(_))
        ));
    }
}
