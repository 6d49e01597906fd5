use crate::types::BitString;
use core::fmt;

/// Confirmed and unconfirmed services, numbered by their bit position in the
/// device object's `protocol-services-supported` bit string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Service {
    ConfirmedCovNotification = 1,
    SubscribeCov = 5,
    ReadProperty = 12,
    ReadPropertyMultiple = 14,
    WriteProperty = 15,
    WritePropertyMultiple = 16,
    UnconfirmedCovNotification = 28,
    SubscribeCovProperty = 38,
    SubscribeCovPropertyMultiple = 41,
}

impl Service {
    pub const ALL: [Service; 9] = [
        Self::ConfirmedCovNotification,
        Self::SubscribeCov,
        Self::ReadProperty,
        Self::ReadPropertyMultiple,
        Self::WriteProperty,
        Self::WritePropertyMultiple,
        Self::UnconfirmedCovNotification,
        Self::SubscribeCovProperty,
        Self::SubscribeCovPropertyMultiple,
    ];

    pub const fn bit(self) -> u8 {
        self as u8
    }
}

/// The services a remote device advertises.
///
/// Stored as a 64-bit mask indexed by [`Service::bit`]; bits for services
/// without a [`Service`] variant are preserved as read from the device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServicesSupported(u64);

impl ServicesSupported {
    pub const NONE: Self = Self(0);

    pub const fn from_mask(mask: u64) -> Self {
        Self(mask)
    }

    pub const fn mask(self) -> u64 {
        self.0
    }

    /// Decodes a `protocol-services-supported` bit string. Bit positions past
    /// 63 are ignored.
    pub fn from_bit_string(bits: &BitString) -> Self {
        let mut mask = 0u64;
        for index in 0..bits.len().min(64) {
            if bits.get(index) {
                mask |= 1 << index;
            }
        }
        Self(mask)
    }

    pub fn to_bit_string(self) -> BitString {
        let width = 64 - self.0.leading_zeros() as usize;
        let bits: Vec<bool> = (0..width).map(|i| self.0 & (1 << i) != 0).collect();
        BitString::from_bits(&bits)
    }

    pub fn of(services: &[Service]) -> Self {
        services.iter().fold(Self::NONE, |acc, s| acc.with(*s))
    }

    #[must_use]
    pub const fn with(self, service: Service) -> Self {
        Self(self.0 | (1 << service.bit()))
    }

    pub const fn supports(self, service: Service) -> bool {
        self.0 & (1 << service.bit()) != 0
    }

    pub const fn subscribe_cov(self) -> bool {
        self.supports(Service::SubscribeCov)
    }

    pub const fn subscribe_cov_property(self) -> bool {
        self.supports(Service::SubscribeCovProperty)
    }

    pub const fn subscribe_cov_property_multiple(self) -> bool {
        self.supports(Service::SubscribeCovPropertyMultiple)
    }

    pub const fn read_property(self) -> bool {
        self.supports(Service::ReadProperty)
    }

    pub const fn read_property_multiple(self) -> bool {
        self.supports(Service::ReadPropertyMultiple)
    }

    pub const fn write_property(self) -> bool {
        self.supports(Service::WriteProperty)
    }

    pub const fn write_property_multiple(self) -> bool {
        self.supports(Service::WritePropertyMultiple)
    }
}

impl fmt::Debug for ServicesSupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_set();
        for service in Service::ALL {
            if self.supports(service) {
                list.entry(&service);
            }
        }
        list.finish()
    }
}
