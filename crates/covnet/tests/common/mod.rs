#![allow(dead_code)]

use covnet::{CovHandler, CovNetwork, CovUpdates, NetworkConfig, SubscriptionId};
use covnet_core::types::{
    BitString, ObjectId, ObjectType, PropertyId, PropertyValue, Service, ServicesSupported,
};
use covnet_engine::SimulatedNetwork;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const AI1: ObjectId = ObjectId::new(ObjectType::AnalogInput, 1);
pub const AI2: ObjectId = ObjectId::new(ObjectType::AnalogInput, 2);
pub const AO1: ObjectId = ObjectId::new(ObjectType::AnalogOutput, 1);
pub const BO1: ObjectId = ObjectId::new(ObjectType::BinaryOutput, 1);

pub const ALL: &[Service] = &[
    Service::SubscribeCov,
    Service::SubscribeCovProperty,
    Service::SubscribeCovPropertyMultiple,
    Service::ReadProperty,
    Service::ReadPropertyMultiple,
    Service::WriteProperty,
    Service::WritePropertyMultiple,
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn services(list: &[Service]) -> ServicesSupported {
    ServicesSupported::of(list)
}

/// Adds a device carrying AI1, AI2, AO1 and BO1.
pub fn add_device(sim: &SimulatedNetwork, device_id: u32, list: &[Service]) {
    sim.add_device(device_id, services(list));
    for (object_id, value) in [
        (AI1, PropertyValue::Real(20.0)),
        (AI2, PropertyValue::Real(30.0)),
        (AO1, PropertyValue::Real(0.0)),
        (BO1, PropertyValue::Enumerated(0)),
    ] {
        sim.add_object(
            device_id,
            object_id,
            [
                (PropertyId::PresentValue, value),
                (
                    PropertyId::StatusFlags,
                    PropertyValue::BitString(BitString::from_bits(&[false; 4])),
                ),
                (
                    PropertyId::ObjectName,
                    PropertyValue::CharacterString(format!("{object_id}")),
                ),
                (PropertyId::RelinquishDefault, PropertyValue::Real(0.0)),
            ],
        );
    }
}

/// Scans fast, never renews during a test unless the lifetime is shortened.
pub fn fast_config() -> NetworkConfig {
    NetworkConfig {
        timeout_ms: 500,
        subscription_check_period_ms: 100,
        ..Default::default()
    }
}

pub async fn started(sim: &SimulatedNetwork, config: NetworkConfig) -> CovNetwork<SimulatedNetwork> {
    let network = CovNetwork::new(sim.clone(), config).unwrap();
    network.start().await.unwrap();
    network
}

/// Records every map handed to it.
#[derive(Clone, Default)]
pub struct Collector {
    seen: Arc<Mutex<Vec<(SubscriptionId, CovUpdates)>>>,
}

impl Collector {
    pub fn handler(&self) -> impl CovHandler + 'static {
        let seen = self.seen.clone();
        move |id: SubscriptionId, updates: &CovUpdates| {
            seen.lock().unwrap().push((id, updates.clone()));
        }
    }

    pub fn seen(&self) -> Vec<(SubscriptionId, CovUpdates)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }

    /// Waits for some delivered map to satisfy `pred`.
    pub async fn wait_for(&self, pred: impl Fn(SubscriptionId, &CovUpdates) -> bool) -> bool {
        eventually(|| async { self.seen().iter().any(|(id, u)| pred(*id, u)) }).await
    }
}

/// Polls `check` for up to five seconds.
pub async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
