use core::fmt;

/// BACnet property identifiers.
///
/// Properties the COV layer reasons about are named; vendor or unlisted
/// identifiers use [`Other`](Self::Other).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyId {
    CovIncrement,
    Description,
    ObjectIdentifier,
    ObjectList,
    ObjectName,
    ObjectType,
    PresentValue,
    PriorityArray,
    ProtocolServicesSupported,
    RelinquishDefault,
    StatusFlags,
    Units,
    VendorName,
    Other(u32),
}

impl PropertyId {
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::CovIncrement => 22,
            Self::Description => 28,
            Self::ObjectIdentifier => 75,
            Self::ObjectList => 76,
            Self::ObjectName => 77,
            Self::ObjectType => 79,
            Self::PresentValue => 85,
            Self::PriorityArray => 87,
            Self::ProtocolServicesSupported => 97,
            Self::RelinquishDefault => 104,
            Self::StatusFlags => 111,
            Self::Units => 117,
            Self::VendorName => 121,
            Self::Other(v) => v,
        }
    }

    pub const fn from_u32(value: u32) -> Self {
        match value {
            22 => Self::CovIncrement,
            28 => Self::Description,
            75 => Self::ObjectIdentifier,
            76 => Self::ObjectList,
            77 => Self::ObjectName,
            79 => Self::ObjectType,
            85 => Self::PresentValue,
            87 => Self::PriorityArray,
            97 => Self::ProtocolServicesSupported,
            104 => Self::RelinquishDefault,
            111 => Self::StatusFlags,
            117 => Self::Units,
            121 => Self::VendorName,
            v => Self::Other(v),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(v) => write!(f, "property-{v}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PropertyId;

    #[test]
    fn known_and_unknown_ids_round_trip() {
        assert_eq!(PropertyId::from_u32(85), PropertyId::PresentValue);
        assert_eq!(PropertyId::PresentValue.to_u32(), 85);
        assert_eq!(PropertyId::from_u32(4321), PropertyId::Other(4321));
        assert_eq!(PropertyId::Other(4321).to_u32(), 4321);
    }
}
