use crate::error::CovError;
use covnet_core::types::MAX_INSTANCE;
use covnet_engine::EngineSettings;
use std::time::Duration;

/// Settings for a [`CovNetwork`](crate::CovNetwork) and the local BACnet
/// device behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkConfig {
    /// Instance number of the local device.
    pub device_id: u32,
    /// Timeout applied to every wire call.
    pub timeout_ms: u64,
    pub segment_timeout_ms: u64,
    pub segment_window: u8,
    pub retries: u8,
    /// Lifetime requested for COV subscriptions.
    pub subscription_lifetime_seconds: u32,
    /// How often the resubscription scan runs. Must be shorter than the
    /// subscription lifetime.
    pub subscription_check_period_ms: u64,
    /// Upper bound on wire calls in flight at once.
    pub max_concurrent_requests: usize,
    pub application_software_version: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            timeout_ms: 6000,
            segment_timeout_ms: 5000,
            segment_window: 5,
            retries: 2,
            subscription_lifetime_seconds: 120,
            subscription_check_period_ms: 15_000,
            max_concurrent_requests: 8,
            application_software_version: None,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), CovError> {
        if self.device_id > MAX_INSTANCE {
            return Err(CovError::InvalidConfig(format!(
                "device id {} exceeds {MAX_INSTANCE}",
                self.device_id
            )));
        }
        if self.timeout_ms == 0 {
            return Err(CovError::InvalidConfig("timeout must be non-zero".into()));
        }
        if self.subscription_lifetime_seconds == 0 {
            return Err(CovError::InvalidConfig(
                "subscription lifetime must be non-zero".into(),
            ));
        }
        if self.subscription_check_period_ms == 0 || self.check_period() >= self.lifetime() {
            return Err(CovError::InvalidConfig(format!(
                "check period {}ms must be shorter than the {}s subscription lifetime",
                self.subscription_check_period_ms, self.subscription_lifetime_seconds
            )));
        }
        if self.max_concurrent_requests == 0 {
            return Err(CovError::InvalidConfig(
                "max concurrent requests must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(u64::from(self.subscription_lifetime_seconds))
    }

    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.subscription_check_period_ms)
    }

    /// The transport-facing subset handed to the engine factory.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            local_device_id: self.device_id,
            timeout: self.timeout(),
            segment_timeout: Duration::from_millis(self.segment_timeout_ms),
            segment_window: self.segment_window,
            retries: self.retries,
        }
    }
}
