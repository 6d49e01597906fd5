use covnet_core::types::ServicesSupported;
use dashmap::DashMap;

/// Services bitmap per remote device, fetched once and kept until the local
/// device is rebuilt.
#[derive(Debug, Default)]
pub(crate) struct CapabilityCache {
    devices: DashMap<u32, ServicesSupported>,
}

impl CapabilityCache {
    pub(crate) fn get(&self, device_id: u32) -> Option<ServicesSupported> {
        self.devices.get(&device_id).map(|entry| *entry)
    }

    pub(crate) fn insert(&self, device_id: u32, services: ServicesSupported) {
        self.devices.insert(device_id, services);
    }
}
