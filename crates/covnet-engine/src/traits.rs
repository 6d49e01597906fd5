use crate::error::EngineError;
use crate::event::EventListener;
use crate::request::{ReadAccess, SubscribeRequest, WireSubscriptionId, WriteAccess};
use covnet_core::types::{PropertyValue, ServicesSupported};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Transport-level settings handed to an [`EngineFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineSettings {
    /// Device instance of the local BACnet device the engine represents.
    pub local_device_id: u32,
    pub timeout: Duration,
    pub segment_timeout: Duration,
    pub segment_window: u8,
    pub retries: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            local_device_id: 1,
            timeout: Duration::from_millis(6000),
            segment_timeout: Duration::from_millis(5000),
            segment_window: 5,
            retries: 2,
        }
    }
}

/// Request/response access to remote BACnet devices.
///
/// Every call addresses a single remote device. Implementations must be safe
/// to call from many tasks at once; returned futures are `Send` so callers
/// can spawn them.
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Reads the device object's `protocol-services-supported`.
    fn read_services_supported(
        &self,
        device_id: u32,
    ) -> impl Future<Output = Result<ServicesSupported, EngineError>> + Send;

    /// Issues a COV subscription and returns the subscriber process id the
    /// device will tag notifications with.
    fn subscribe(
        &self,
        device_id: u32,
        request: &SubscribeRequest,
    ) -> impl Future<Output = Result<WireSubscriptionId, EngineError>> + Send;

    /// Cancels a subscription previously issued with `request`.
    fn unsubscribe(
        &self,
        device_id: u32,
        id: WireSubscriptionId,
        request: &SubscribeRequest,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn read_property(
        &self,
        device_id: u32,
        access: ReadAccess,
    ) -> impl Future<Output = Result<PropertyValue, EngineError>> + Send;

    /// ReadPropertyMultiple. The outer error fails the whole request; inner
    /// results are per property, in request order.
    fn read_property_multiple(
        &self,
        device_id: u32,
        accesses: &[ReadAccess],
    ) -> impl Future<Output = Result<Vec<Result<PropertyValue, EngineError>>, EngineError>> + Send;

    fn write_property(
        &self,
        device_id: u32,
        access: WriteAccess,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// WritePropertyMultiple. Success or failure applies to the whole batch.
    fn write_property_multiple(
        &self,
        device_id: u32,
        accesses: &[WriteAccess],
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Adds a listener for COV notifications and inbound errors.
    fn register_listener(&self, listener: Arc<dyn EventListener>);

    /// Releases transport resources. No events are delivered afterwards.
    fn terminate(&self);
}

/// Creates engines from settings; a new engine is built on every
/// (re)configuration.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: ProtocolEngine;

    fn create(&self, settings: &EngineSettings) -> Result<Self::Engine, EngineError>;
}
