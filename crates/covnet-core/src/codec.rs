//! Conversions between BACnet property values and plain consumer values.
//!
//! Reads go through [`decode_value`], which flattens any [`PropertyValue`]
//! into a number, a bit set or text. Writes go through [`encode_for_write`],
//! which picks the BACnet datatype a device expects for the addressed
//! property.

use crate::reference::PropertyRef;
use crate::types::{BitString, Date, ObjectType, PropertyId, PropertyValue, Time};
use core::fmt;

/// A numeric reading extracted from a property value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Integer(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(v),
            Self::Float(v) if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 => {
                Some(v.trunc() as i64)
            }
            Self::Float(_) => None,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// The consumer-facing shape of a decoded property value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Decoded {
    Number(Number),
    Bits(Vec<bool>),
    Text(String),
}

/// A value a consumer wants written to a property, before it is typed for
/// the target object.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlValue {
    /// Relinquishes the command at the ref's priority.
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bits(Vec<bool>),
    Date(Date),
    Time(Time),
    DateTime(Date, Time),
}

/// Extracts a number from numeric, boolean, enumerated, date, time,
/// object-id, bit-string and octet-string values.
///
/// - dates must be specific and become `yyyyMMdd`
/// - times need an hour and become seconds of the day, with hundredths as a
///   fraction when present
/// - object ids become `type.instance`
/// - bit strings become an integer with bit 0 least significant
/// - octet strings become a big-endian integer of at most 8 bytes
pub fn number_value(value: &PropertyValue) -> Option<Number> {
    match value {
        PropertyValue::Boolean(v) => Some(Number::Integer(i64::from(*v))),
        PropertyValue::Unsigned(v) => Some(match i64::try_from(*v) {
            Ok(v) => Number::Integer(v),
            Err(_) => Number::Float(*v as f64),
        }),
        PropertyValue::Signed(v) => Some(Number::Integer(*v)),
        PropertyValue::Real(v) => Some(Number::Float(f64::from(*v))),
        PropertyValue::Double(v) => Some(Number::Float(*v)),
        PropertyValue::Enumerated(v) => Some(Number::Integer(i64::from(*v))),
        PropertyValue::Date(date) => date_number(date),
        PropertyValue::Time(time) => time_number(time),
        PropertyValue::ObjectId(id) => format!("{}.{}", id.object_type().to_u16(), id.instance())
            .parse::<f64>()
            .ok()
            .map(Number::Float),
        PropertyValue::BitString(bits) => {
            if bits.len() > 63 {
                return None;
            }
            let n = bits
                .bits()
                .iter()
                .enumerate()
                .fold(0i64, |acc, (i, bit)| if *bit { acc | (1 << i) } else { acc });
            Some(Number::Integer(n))
        }
        PropertyValue::OctetString(bytes) => {
            if bytes.is_empty() || bytes.len() > 8 {
                return None;
            }
            let n = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            Some(match i64::try_from(n) {
                Ok(v) => Number::Integer(v),
                Err(_) => Number::Float(n as f64),
            })
        }
        _ => None,
    }
}

fn date_number(date: &Date) -> Option<Number> {
    if !date.is_specific() {
        return None;
    }
    let year = i64::from(date.year()?);
    Some(Number::Integer(
        year * 10_000 + i64::from(date.month) * 100 + i64::from(date.day),
    ))
}

fn time_number(time: &Time) -> Option<Number> {
    if time.hour == Time::UNSPECIFIED {
        return None;
    }
    let mut secs = i64::from(time.hour) * 3600;
    if time.minute != Time::UNSPECIFIED {
        secs += i64::from(time.minute) * 60;
    }
    if time.second != Time::UNSPECIFIED {
        secs += i64::from(time.second);
    }
    if time.hundredths == Time::UNSPECIFIED {
        return Some(Number::Integer(secs));
    }
    Some(Number::Float(secs as f64 + f64::from(time.hundredths) / 100.0))
}

/// Bit-string values as a list of bits, bit 0 first.
pub fn bits_value(value: &PropertyValue) -> Option<Vec<bool>> {
    match value {
        PropertyValue::BitString(bits) => Some(bits.bits()),
        _ => None,
    }
}

/// Character strings as-is, octet strings in dotted-decimal form, and any
/// value [`number_value`] understands in base 10.
pub fn string_value(value: &PropertyValue) -> Option<String> {
    match value {
        PropertyValue::CharacterString(s) => Some(s.clone()),
        PropertyValue::OctetString(bytes) => Some(
            bytes
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join("."),
        ),
        other => number_value(other).map(|n| n.to_string()),
    }
}

/// Flattens a property value: numbers first, then bits, then text.
pub fn decode_value(value: &PropertyValue) -> Option<Decoded> {
    if let Some(n) = number_value(value) {
        return Some(Decoded::Number(n));
    }
    if let Some(bits) = bits_value(value) {
        return Some(Decoded::Bits(bits));
    }
    string_value(value).map(Decoded::Text)
}

/// Types `value` for a write to `target`.
///
/// `present-value` writes are typed by the object type; every other property
/// (and objects without a typed rule) use [`encode_value`]. Returns `None`
/// when the value cannot be represented as the datatype the property needs.
pub fn encode_for_write(target: &PropertyRef, value: &ControlValue) -> Option<PropertyValue> {
    if matches!(value, ControlValue::Null) {
        return Some(PropertyValue::Null);
    }
    if target.property_id != PropertyId::PresentValue {
        return encode_value(value);
    }
    match target.object_type {
        ObjectType::AnalogOutput
        | ObjectType::AnalogValue
        | ObjectType::LightingOutput
        | ObjectType::Loop
        | ObjectType::PulseConverter
        | ObjectType::Staging => real_value(value),
        ObjectType::BinaryOutput | ObjectType::BinaryValue => binary_value(value),
        ObjectType::BitstringValue => bit_string_value(value),
        ObjectType::DateValue => match value {
            ControlValue::Date(d) | ControlValue::DateTime(d, _) => Some(PropertyValue::Date(*d)),
            _ => None,
        },
        ObjectType::DatetimeValue => match value {
            ControlValue::DateTime(d, t) => Some(PropertyValue::DateTime(*d, *t)),
            _ => None,
        },
        ObjectType::TimeValue => match value {
            ControlValue::Time(t) | ControlValue::DateTime(_, t) => Some(PropertyValue::Time(*t)),
            _ => None,
        },
        ObjectType::IntegerValue => integer_value(value).map(PropertyValue::Signed),
        ObjectType::LargeAnalogValue => float_value(value).map(PropertyValue::Double),
        ObjectType::Accumulator
        | ObjectType::MultiStateOutput
        | ObjectType::MultiStateValue
        | ObjectType::PositiveIntegerValue
        | ObjectType::Timer => integer_value(value)
            .and_then(|v| u64::try_from(v).ok())
            .map(PropertyValue::Unsigned),
        _ => encode_value(value),
    }
}

/// Maps a value to its natural BACnet datatype without any knowledge of the
/// target property.
pub fn encode_value(value: &ControlValue) -> Option<PropertyValue> {
    Some(match value {
        ControlValue::Null => PropertyValue::Null,
        ControlValue::Boolean(v) => PropertyValue::Boolean(*v),
        ControlValue::Integer(v) => PropertyValue::Signed(*v),
        ControlValue::Float(v) => PropertyValue::Double(*v),
        ControlValue::Text(s) => PropertyValue::CharacterString(s.clone()),
        ControlValue::Bits(bits) => PropertyValue::BitString(BitString::from_bits(bits)),
        ControlValue::Date(d) => PropertyValue::Date(*d),
        ControlValue::Time(t) => PropertyValue::Time(*t),
        ControlValue::DateTime(d, t) => PropertyValue::DateTime(*d, *t),
    })
}

fn float_value(value: &ControlValue) -> Option<f64> {
    match value {
        ControlValue::Integer(v) => Some(*v as f64),
        ControlValue::Float(v) => Some(*v),
        ControlValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn real_value(value: &ControlValue) -> Option<PropertyValue> {
    float_value(value).map(|v| PropertyValue::Real(v as f32))
}

fn integer_value(value: &ControlValue) -> Option<i64> {
    match value {
        ControlValue::Integer(v) => Some(*v),
        ControlValue::Float(v) => Number::Float(*v).as_i64(),
        ControlValue::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// `active` is enumerated 1, `inactive` 0.
fn binary_value(value: &ControlValue) -> Option<PropertyValue> {
    let active = match value {
        ControlValue::Boolean(v) => *v,
        ControlValue::Integer(v) => *v != 0,
        ControlValue::Float(v) => *v != 0.0,
        ControlValue::Text(s) => parse_boolean(s),
        _ => return None,
    };
    Some(PropertyValue::Enumerated(u32::from(active)))
}

fn bit_string_value(value: &ControlValue) -> Option<PropertyValue> {
    match value {
        ControlValue::Bits(bits) => Some(PropertyValue::BitString(BitString::from_bits(bits))),
        ControlValue::Integer(v) if *v >= 0 => {
            let width = 64 - v.leading_zeros() as usize;
            let bits: Vec<bool> = (0..width).map(|i| v & (1 << i) != 0).collect();
            Some(PropertyValue::BitString(BitString::from_bits(&bits)))
        }
        _ => None,
    }
}

fn parse_boolean(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "on" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    fn pv(object_type: ObjectType) -> PropertyRef {
        PropertyRef::present_value(1, object_type, 1)
    }

    #[test]
    fn numbers_from_primitive_values() {
        assert_eq!(
            number_value(&PropertyValue::Boolean(true)),
            Some(Number::Integer(1))
        );
        assert_eq!(
            number_value(&PropertyValue::Real(1.5)),
            Some(Number::Float(1.5))
        );
        assert_eq!(
            number_value(&PropertyValue::Enumerated(3)),
            Some(Number::Integer(3))
        );
        assert_eq!(
            number_value(&PropertyValue::Unsigned(u64::MAX)),
            Some(Number::Float(u64::MAX as f64))
        );
        assert_eq!(number_value(&PropertyValue::Null), None);
    }

    #[test]
    fn numbers_from_date_and_time() {
        assert_eq!(
            number_value(&PropertyValue::Date(Date::new(2022, 11, 4))),
            Some(Number::Integer(20221104))
        );
        assert_eq!(
            number_value(&PropertyValue::Time(Time::new(1, 2, 3, Time::UNSPECIFIED))),
            Some(Number::Integer(3723))
        );
        assert_eq!(
            number_value(&PropertyValue::Time(Time::new(0, 0, 5, 25))),
            Some(Number::Float(5.25))
        );
        let no_hour = Time::new(Time::UNSPECIFIED, 1, 1, 1);
        assert_eq!(number_value(&PropertyValue::Time(no_hour)), None);
    }

    #[test]
    fn numbers_from_object_id_bits_and_octets() {
        let id = ObjectId::new(ObjectType::AnalogValue, 15);
        assert_eq!(
            number_value(&PropertyValue::ObjectId(id)),
            Some(Number::Float(2.15))
        );
        let bits = BitString::from_bits(&[true, false, true, true]);
        assert_eq!(
            number_value(&PropertyValue::BitString(bits)),
            Some(Number::Integer(0b1101))
        );
        assert_eq!(
            number_value(&PropertyValue::OctetString(vec![0x01, 0x02])),
            Some(Number::Integer(0x0102))
        );
    }

    #[test]
    fn strings_and_decoding_order() {
        assert_eq!(
            string_value(&PropertyValue::OctetString(vec![192, 168, 0, 1])),
            Some("192.168.0.1".to_string())
        );
        assert_eq!(
            decode_value(&PropertyValue::CharacterString("AHU-1".into())),
            Some(Decoded::Text("AHU-1".into()))
        );
        let wide = BitString::from_bits(&[true; 70]);
        assert_eq!(
            decode_value(&PropertyValue::BitString(wide)),
            Some(Decoded::Bits(vec![true; 70]))
        );
    }

    #[test]
    fn present_value_writes_are_typed_by_object() {
        assert_eq!(
            encode_for_write(&pv(ObjectType::AnalogOutput), &ControlValue::Integer(3)),
            Some(PropertyValue::Real(3.0))
        );
        assert_eq!(
            encode_for_write(
                &pv(ObjectType::BinaryValue),
                &ControlValue::Text("on".into())
            ),
            Some(PropertyValue::Enumerated(1))
        );
        assert_eq!(
            encode_for_write(&pv(ObjectType::MultiStateValue), &ControlValue::Float(2.9)),
            Some(PropertyValue::Unsigned(2))
        );
        assert_eq!(
            encode_for_write(&pv(ObjectType::MultiStateValue), &ControlValue::Integer(-1)),
            None
        );
        assert_eq!(
            encode_for_write(&pv(ObjectType::LargeAnalogValue), &ControlValue::Text("1.25".into())),
            Some(PropertyValue::Double(1.25))
        );
        assert_eq!(
            encode_for_write(&pv(ObjectType::BitstringValue), &ControlValue::Integer(0b101)),
            Some(PropertyValue::BitString(BitString::from_bits(&[true, false, true])))
        );
        assert_eq!(
            encode_for_write(&pv(ObjectType::AnalogOutput), &ControlValue::Boolean(true)),
            None
        );
    }

    #[test]
    fn null_relinquishes_and_other_properties_are_generic() {
        assert_eq!(
            encode_for_write(&pv(ObjectType::AnalogOutput), &ControlValue::Null),
            Some(PropertyValue::Null)
        );
        let name = PropertyRef::new(1, ObjectType::AnalogOutput, 1, PropertyId::Description);
        assert_eq!(
            encode_for_write(&name, &ControlValue::Text("supply fan".into())),
            Some(PropertyValue::CharacterString("supply fan".into()))
        );
    }
}
