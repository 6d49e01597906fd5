use crate::types::ObjectType;
use core::fmt;

/// A BACnet object identifier: object type in the upper 10 bits, instance
/// number in the lower 22 bits, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId(u32);

/// Largest instance number representable in an [`ObjectId`].
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

impl ObjectId {
    pub const fn new(object_type: ObjectType, instance: u32) -> Self {
        Self((((object_type.to_u16() as u32) & 0x03FF) << 22) | (instance & MAX_INSTANCE))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn object_type(self) -> ObjectType {
        ObjectType::from_u16(((self.0 >> 22) & 0x03FF) as u16)
    }

    pub const fn instance(self) -> u32 {
        self.0 & MAX_INSTANCE
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type(), self.instance())
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectId;
    use crate::types::ObjectType;

    #[test]
    fn packs_type_and_instance() {
        let id = ObjectId::new(ObjectType::AnalogValue, 1234);
        assert_eq!(id.object_type(), ObjectType::AnalogValue);
        assert_eq!(id.instance(), 1234);
        assert_eq!(id.raw(), (2 << 22) | 1234);
        assert_eq!(ObjectId::from_raw(id.raw()), id);
    }

    #[test]
    fn display_names_type() {
        let id = ObjectId::new(ObjectType::BinaryOutput, 3);
        assert_eq!(id.to_string(), "BinaryOutput:3");
    }
}
