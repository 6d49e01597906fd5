use crate::subscription::SubscriptionId;
use covnet_core::PropertyRef;
use covnet_engine::EngineError;
use thiserror::Error;

/// Errors surfaced by the COV network and its connections.
///
/// Device-level variants are reported per device or per ref inside result
/// maps; only [`NotAvailable`](Self::NotAvailable),
/// [`Closed`](Self::Closed), configuration errors and a subscribe request
/// naming an [`InvalidRef`](Self::InvalidRef) abort a whole call.
#[derive(Debug, Clone, Error)]
pub enum CovError {
    #[error("device {device_id} lacks the services needed: {reason}")]
    Capability { device_id: u32, reason: String },
    #[error("communication with device {device_id} failed: {source}")]
    Communication {
        device_id: u32,
        #[source]
        source: EngineError,
    },
    #[error("device {device_id} rejected the request: {source}")]
    Protocol {
        device_id: u32,
        #[source]
        source: EngineError,
    },
    #[error("value cannot be encoded for {0}")]
    UnsupportedValue(PropertyRef),
    #[error("{0} is outside the BACnet instance range")]
    InvalidRef(PropertyRef),
    #[error("no local BACnet device available")]
    NotAvailable,
    #[error("connection or network closed")]
    Closed,
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
    #[error("subscription {subscription} failed on every device")]
    SubscribeFailed {
        subscription: SubscriptionId,
        failures: Vec<(u32, CovError)>,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CovError {
    /// Classifies an engine failure for `device_id`.
    pub fn from_engine(device_id: u32, err: EngineError) -> Self {
        match err {
            EngineError::Unsupported(service) => Self::Capability {
                device_id,
                reason: format!("{service} not supported"),
            },
            err if err.is_communication() => Self::Communication {
                device_id,
                source: err,
            },
            err => Self::Protocol {
                device_id,
                source: err,
            },
        }
    }

    pub fn is_capability(&self) -> bool {
        matches!(self, Self::Capability { .. })
    }

    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::CovError;
    use covnet_engine::EngineError;

    #[test]
    fn engine_errors_are_classified() {
        assert!(CovError::from_engine(1, EngineError::Timeout).is_communication());
        assert!(CovError::from_engine(1, EngineError::UnknownDevice(1)).is_communication());
        assert!(CovError::from_engine(1, EngineError::Unsupported("ReadProperty")).is_capability());
        assert!(matches!(
            CovError::from_engine(
                7,
                EngineError::Remote {
                    error_class: 2,
                    error_code: 32
                }
            ),
            CovError::Protocol { device_id: 7, .. }
        ));
        assert!(matches!(
            CovError::from_engine(7, EngineError::Abort { reason: 4 }),
            CovError::Protocol { .. }
        ));
    }
}
