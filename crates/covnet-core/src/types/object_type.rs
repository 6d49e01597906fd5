use core::fmt;

/// BACnet object types.
///
/// Standard types that the gateway reads, writes or monitors have named
/// variants; anything else round-trips through [`Other`](Self::Other).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    Calendar,
    Device,
    Loop,
    MultiStateInput,
    MultiStateOutput,
    Schedule,
    MultiStateValue,
    TrendLog,
    Accumulator,
    PulseConverter,
    Timer,
    BitstringValue,
    CharacterstringValue,
    DateValue,
    DatetimeValue,
    IntegerValue,
    LargeAnalogValue,
    OctetstringValue,
    PositiveIntegerValue,
    TimeValue,
    LightingOutput,
    Staging,
    Other(u16),
}

impl ObjectType {
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::AnalogInput => 0,
            Self::AnalogOutput => 1,
            Self::AnalogValue => 2,
            Self::BinaryInput => 3,
            Self::BinaryOutput => 4,
            Self::BinaryValue => 5,
            Self::Calendar => 6,
            Self::Device => 8,
            Self::Loop => 12,
            Self::MultiStateInput => 13,
            Self::MultiStateOutput => 14,
            Self::Schedule => 17,
            Self::MultiStateValue => 19,
            Self::TrendLog => 20,
            Self::Accumulator => 23,
            Self::PulseConverter => 24,
            Self::Timer => 31,
            Self::BitstringValue => 39,
            Self::CharacterstringValue => 40,
            Self::DateValue => 42,
            Self::DatetimeValue => 44,
            Self::IntegerValue => 45,
            Self::LargeAnalogValue => 46,
            Self::OctetstringValue => 47,
            Self::PositiveIntegerValue => 48,
            Self::TimeValue => 50,
            Self::LightingOutput => 54,
            Self::Staging => 60,
            Self::Other(v) => v,
        }
    }

    /// Maps a numeric type to its named variant, keeping unknown codes as
    /// [`Other`](Self::Other) so that `from_u16(t).to_u16() == t`.
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::AnalogInput,
            1 => Self::AnalogOutput,
            2 => Self::AnalogValue,
            3 => Self::BinaryInput,
            4 => Self::BinaryOutput,
            5 => Self::BinaryValue,
            6 => Self::Calendar,
            8 => Self::Device,
            12 => Self::Loop,
            13 => Self::MultiStateInput,
            14 => Self::MultiStateOutput,
            17 => Self::Schedule,
            19 => Self::MultiStateValue,
            20 => Self::TrendLog,
            23 => Self::Accumulator,
            24 => Self::PulseConverter,
            31 => Self::Timer,
            39 => Self::BitstringValue,
            40 => Self::CharacterstringValue,
            42 => Self::DateValue,
            44 => Self::DatetimeValue,
            45 => Self::IntegerValue,
            46 => Self::LargeAnalogValue,
            47 => Self::OctetstringValue,
            48 => Self::PositiveIntegerValue,
            50 => Self::TimeValue,
            54 => Self::LightingOutput,
            60 => Self::Staging,
            v => Self::Other(v),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(v) => write!(f, "object-type-{v}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectType;

    #[test]
    fn numeric_codes_round_trip() {
        for code in 0..=64u16 {
            assert_eq!(ObjectType::from_u16(code).to_u16(), code);
        }
        assert_eq!(ObjectType::from_u16(46), ObjectType::LargeAnalogValue);
        assert_eq!(ObjectType::from_u16(7), ObjectType::Other(7));
    }
}
