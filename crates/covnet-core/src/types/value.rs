use crate::types::ObjectId;

/// A BACnet date. Fields set to `0xFF` are unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Date {
    pub year_since_1900: u8,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
}

impl Date {
    pub const UNSPECIFIED: u8 = 0xFF;

    /// Builds a date with an unspecified weekday.
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self {
            year_since_1900: year.saturating_sub(1900) as u8,
            month,
            day,
            weekday: Self::UNSPECIFIED,
        }
    }

    pub const fn year(&self) -> Option<u16> {
        if self.year_since_1900 == Self::UNSPECIFIED {
            None
        } else {
            Some(1900 + self.year_since_1900 as u16)
        }
    }

    /// `true` when year, month and day are all concrete values.
    pub const fn is_specific(&self) -> bool {
        self.year_since_1900 != Self::UNSPECIFIED
            && self.month >= 1
            && self.month <= 12
            && self.day >= 1
            && self.day <= 31
    }
}

/// A BACnet time of day. Fields set to `0xFF` are unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl Time {
    pub const UNSPECIFIED: u8 = 0xFF;

    pub const fn new(hour: u8, minute: u8, second: u8, hundredths: u8) -> Self {
        Self {
            hour,
            minute,
            second,
            hundredths,
        }
    }
}

/// An owned BACnet bit string.
///
/// `data` holds the bits most-significant first, so bit `0` is the high bit
/// of `data[0]`; `unused_bits` trailing bits of the last byte are padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitString {
    pub unused_bits: u8,
    pub data: Vec<u8>,
}

impl BitString {
    pub fn new(unused_bits: u8, data: Vec<u8>) -> Self {
        Self { unused_bits, data }
    }

    pub fn from_bits(bits: &[bool]) -> Self {
        let mut data = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                data[i / 8] |= 0x80 >> (i % 8);
            }
        }
        let unused_bits = ((8 - bits.len() % 8) % 8) as u8;
        Self { unused_bits, data }
    }

    pub fn len(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.unused_bits as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> bool {
        if index >= self.len() {
            return false;
        }
        self.data[index / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn bits(&self) -> Vec<bool> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}

/// A decoded application-tagged BACnet value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString(BitString),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    DateTime(Date, Time),
    ObjectId(ObjectId),
}

#[cfg(test)]
mod tests {
    use super::{BitString, Date};

    #[test]
    fn bit_string_is_msb_first() {
        let bits = BitString::from_bits(&[true, false, true]);
        assert_eq!(bits.data, vec![0b1010_0000]);
        assert_eq!(bits.unused_bits, 5);
        assert_eq!(bits.len(), 3);
        assert_eq!(bits.bits(), vec![true, false, true]);
        assert!(!bits.get(7));
    }

    #[test]
    fn date_specificity() {
        assert!(Date::new(2024, 3, 9).is_specific());
        assert_eq!(Date::new(2024, 3, 9).year(), Some(2024));
        let wildcard = Date {
            year_since_1900: Date::UNSPECIFIED,
            month: 3,
            day: 9,
            weekday: Date::UNSPECIFIED,
        };
        assert!(!wildcard.is_specific());
        assert_eq!(wildcard.year(), None);
    }
}
