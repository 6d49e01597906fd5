//! Addressing for remote device properties.

use crate::types::{ObjectId, ObjectType, PropertyId, MAX_INSTANCE};
use core::fmt;

/// Identifies one property of one object on one remote device: the unit of
/// subscription, read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyRef {
    pub device_id: u32,
    pub object_type: ObjectType,
    pub object_instance: u32,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub priority: Option<u8>,
}

impl PropertyRef {
    pub const fn new(
        device_id: u32,
        object_type: ObjectType,
        object_instance: u32,
        property_id: PropertyId,
    ) -> Self {
        Self {
            device_id,
            object_type,
            object_instance,
            property_id,
            array_index: None,
            priority: None,
        }
    }

    /// Shorthand for a `present-value` reference.
    pub const fn present_value(device_id: u32, object_type: ObjectType, instance: u32) -> Self {
        Self::new(device_id, object_type, instance, PropertyId::PresentValue)
    }

    #[must_use]
    pub const fn with_array_index(mut self, index: u32) -> Self {
        self.array_index = Some(index);
        self
    }

    /// Write priority (1..=16); values outside that range are ignored.
    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        if priority >= 1 && priority <= 16 {
            self.priority = Some(priority);
        }
        self
    }

    /// Packs the object identifier. The instance is masked to 22 bits, so
    /// check [`is_addressable`](Self::is_addressable) first.
    pub const fn object_id(&self) -> ObjectId {
        ObjectId::new(self.object_type, self.object_instance)
    }

    /// `false` when the device or object instance does not fit the 22-bit
    /// BACnet instance range.
    pub const fn is_addressable(&self) -> bool {
        self.device_id <= MAX_INSTANCE && self.object_instance <= MAX_INSTANCE
    }

    /// The same reference without a write priority. Reads, cache entries and
    /// notifications are addressed without priority.
    pub const fn without_priority(mut self) -> Self {
        self.priority = None;
        self
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.device_id,
            self.object_id(),
            self.property_id
        )?;
        if let Some(index) = self.array_index {
            write!(f, "[{index}]")?;
        }
        if let Some(priority) = self.priority {
            write!(f, "@{priority}")?;
        }
        Ok(())
    }
}

/// A [`PropertyRef`] to monitor by COV, optionally with the increment an
/// analog value must move by before the device reports it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovPropertyRef {
    pub reference: PropertyRef,
    pub cov_increment: Option<f32>,
}

impl CovPropertyRef {
    pub const fn new(reference: PropertyRef) -> Self {
        Self {
            reference,
            cov_increment: None,
        }
    }

    /// Non-finite or negative increments are treated as absent.
    pub fn with_increment(reference: PropertyRef, increment: f32) -> Self {
        Self {
            reference,
            cov_increment: (increment.is_finite() && increment >= 0.0).then_some(increment),
        }
    }

    pub const fn device_id(&self) -> u32 {
        self.reference.device_id
    }
}

impl From<PropertyRef> for CovPropertyRef {
    fn from(reference: PropertyRef) -> Self {
        Self::new(reference)
    }
}
