use covnet_core::types::{ObjectId, PropertyId, PropertyValue};
use core::fmt;
use std::time::Duration;

/// The subscriber process identifier that tags one wire-level COV
/// subscription. Minted by the engine; notifications carry it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WireSubscriptionId(pub u32);

impl fmt::Display for WireSubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One property inside a SubscribeCOVPropertyMultiple specification.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovReference {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub cov_increment: Option<f32>,
}

/// The monitored properties of one object in a SubscribeCOVPropertyMultiple
/// request.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovSpecification {
    pub object_id: ObjectId,
    pub references: Vec<CovReference>,
}

/// A COV subscription as issued to a device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubscribeRequest {
    /// SubscribeCOV: the device reports its object's COV property set.
    Object {
        object_id: ObjectId,
        lifetime: Duration,
    },
    /// SubscribeCOVProperty for a single property.
    Property {
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
        cov_increment: Option<f32>,
        lifetime: Duration,
    },
    /// SubscribeCOVPropertyMultiple across several objects.
    PropertiesMultiple {
        lifetime: Duration,
        max_notification_delay: Duration,
        specifications: Vec<CovSpecification>,
    },
}

impl SubscribeRequest {
    pub fn lifetime(&self) -> Duration {
        match self {
            Self::Object { lifetime, .. }
            | Self::Property { lifetime, .. }
            | Self::PropertiesMultiple { lifetime, .. } => *lifetime,
        }
    }

    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Object { .. } => "SubscribeCOV",
            Self::Property { .. } => "SubscribeCOVProperty",
            Self::PropertiesMultiple { .. } => "SubscribeCOVPropertyMultiple",
        }
    }
}

/// Addresses one property value for ReadProperty/ReadPropertyMultiple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadAccess {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
}

/// One value to write with WriteProperty/WritePropertyMultiple.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteAccess {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: PropertyValue,
    pub priority: Option<u8>,
}
