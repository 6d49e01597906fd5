use crate::request::WireSubscriptionId;
use covnet_core::types::{ObjectId, PropertyId, PropertyValue};
use std::time::Duration;

/// One property value carried by a COV notification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovValue {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: PropertyValue,
    pub priority: Option<u8>,
}

/// A confirmed or unconfirmed COV notification as received from a device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovEvent {
    pub wire_id: WireSubscriptionId,
    pub device_id: u32,
    pub object_id: ObjectId,
    pub time_remaining: Duration,
    pub values: Vec<CovValue>,
}

/// Asynchronous traffic the engine pushes to its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Cov(CovEvent),
    /// The engine failed to process inbound traffic.
    ListenerError(String),
}

/// Receives engine events. Called on the engine's own thread, so
/// implementations should hand the event off rather than do work inline.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: EngineEvent);
}
