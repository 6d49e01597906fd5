use thiserror::Error;

/// Failures reported by a protocol engine for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EngineError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unknown device {0}")]
    UnknownDevice(u32),
    #[error("remote service error (class {error_class}, code {error_code})")]
    Remote { error_class: u32, error_code: u32 },
    #[error("remote reject reason {reason}")]
    Reject { reason: u8 },
    #[error("remote abort reason {reason}")]
    Abort { reason: u8 },
    #[error("service not supported by device: {0}")]
    Unsupported(&'static str),
}

impl EngineError {
    /// `true` for failures that say nothing about the device's capabilities,
    /// only about the path to it.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Transport(_) | Self::UnknownDevice(_)
        )
    }
}

/// Well-known BACnet error class and code values.
pub mod codes {
    pub const CLASS_OBJECT: u32 = 1;
    pub const CLASS_PROPERTY: u32 = 2;
    pub const CLASS_SERVICES: u32 = 5;

    pub const CODE_UNKNOWN_OBJECT: u32 = 31;
    pub const CODE_UNKNOWN_PROPERTY: u32 = 32;
    pub const CODE_WRITE_ACCESS_DENIED: u32 = 40;
    pub const CODE_INVALID_ARRAY_INDEX: u32 = 42;
    pub const CODE_COV_SUBSCRIPTION_FAILED: u32 = 43;
}
