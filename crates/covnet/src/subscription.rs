use crate::negotiator::{DevicePlan, PlannedCall, SubscriptionMechanism};
use covnet_core::{CovPropertyRef, PropertyRef};
use covnet_engine::WireSubscriptionId;
use core::fmt;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Process-unique handle for a COV subscription. Handles are minted from a
/// monotonically increasing counter and never reused, so a stale handle can
/// never address a newer subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cov-{}", self.0)
    }
}

/// Per-device health of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceState {
    /// Subscribed (or polled) as negotiated.
    Active,
    /// The last attempt failed; retried on the next scan.
    Pending(String),
    /// The device offers nothing usable; never retried.
    Unsupported(String),
}

/// A subscribe call the device accepted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WireRecord {
    pub wire_id: WireSubscriptionId,
    pub call: PlannedCall,
}

#[derive(Debug, Clone)]
pub(crate) struct DeviceEntry {
    pub plan: Option<DevicePlan>,
    pub wire: Vec<WireRecord>,
    pub state: DeviceState,
}

/// Which devices a renewal should touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Renewal {
    All,
    PendingOnly,
}

/// The negotiated, per-device state of one subscription handle.
#[derive(Debug)]
pub(crate) struct Subscription {
    id: SubscriptionId,
    lifetime: Duration,
    max_delay: Duration,
    pub expires_at: Option<Instant>,
    refs: Vec<CovPropertyRef>,
    pub devices: BTreeMap<u32, DeviceEntry>,
    /// Set once the handle has been removed from the registry; late lock
    /// holders must not act on it.
    pub retired: bool,
}

impl Subscription {
    pub fn new(id: SubscriptionId, lifetime: Duration) -> Self {
        Self {
            id,
            lifetime,
            max_delay: Duration::ZERO,
            expires_at: None,
            refs: Vec::new(),
            devices: BTreeMap::new(),
            retired: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Replaces the ref set. Refs are deduplicated by reference (the first
    /// increment given wins) and every device they touch gets a fresh,
    /// not-yet-negotiated entry.
    pub fn assign(&mut self, refs: Vec<CovPropertyRef>, max_delay: Duration) {
        let mut seen = HashSet::new();
        self.refs = refs
            .into_iter()
            .filter(|r| seen.insert(r.reference.without_priority()))
            .collect();
        self.max_delay = max_delay;
        self.devices = self
            .refs
            .iter()
            .map(|r| {
                (
                    r.device_id(),
                    DeviceEntry {
                        plan: None,
                        wire: Vec::new(),
                        state: DeviceState::Pending("not yet subscribed".into()),
                    },
                )
            })
            .collect();
    }

    pub fn refs_for(&self, device_id: u32) -> Vec<CovPropertyRef> {
        self.refs
            .iter()
            .filter(|r| r.device_id() == device_id)
            .copied()
            .collect()
    }

    /// Drops every wire identifier and the expiry, returning the records so
    /// the caller can cancel them.
    pub fn reset(&mut self) -> Vec<(u32, WireRecord)> {
        self.expires_at = None;
        let mut stale = Vec::new();
        for (device_id, entry) in &mut self.devices {
            stale.extend(entry.wire.drain(..).map(|r| (*device_id, r)));
        }
        stale
    }

    pub fn mark_renewed(&mut self, now: Instant) {
        self.expires_at = Some(now + self.lifetime);
    }

    /// What the scheduler should do for this handle at `now`.
    pub fn renewal_due(&self, now: Instant, period: Duration) -> Option<Renewal> {
        if self.devices.is_empty() {
            return None;
        }
        let expiring = match self.expires_at {
            None => true,
            Some(expires_at) => now + period >= expires_at,
        };
        if expiring {
            return Some(Renewal::All);
        }
        self.devices
            .values()
            .any(|d| matches!(d.state, DeviceState::Pending(_)))
            .then_some(Renewal::PendingOnly)
    }

    /// Polled devices with their refs and mechanism.
    pub fn polled(&self) -> Vec<(u32, SubscriptionMechanism, Vec<PropertyRef>)> {
        self.devices
            .iter()
            .filter_map(|(device_id, entry)| {
                let plan = entry.plan.as_ref()?;
                plan.mechanism
                    .is_polling()
                    .then(|| (*device_id, plan.mechanism, plan.polled.clone()))
            })
            .collect()
    }

    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus {
            id: self.id,
            refs: self.refs.iter().map(|r| r.reference).collect(),
            expires_at: self.expires_at,
            devices: self
                .devices
                .iter()
                .map(|(device_id, entry)| {
                    (
                        *device_id,
                        DeviceStatus {
                            mechanism: entry.plan.as_ref().map(|p| p.mechanism),
                            wire_ids: entry.wire.iter().map(|r| r.wire_id).collect(),
                            state: entry.state.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Snapshot of one device's part of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    /// `None` until negotiation has succeeded once.
    pub mechanism: Option<SubscriptionMechanism>,
    pub wire_ids: Vec<WireSubscriptionId>,
    pub state: DeviceState,
}

/// Snapshot of a subscription, see
/// [`CovNetwork::subscription_status`](crate::CovNetwork::subscription_status).
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionStatus {
    pub id: SubscriptionId,
    pub refs: Vec<PropertyRef>,
    pub devices: BTreeMap<u32, DeviceStatus>,
    pub expires_at: Option<Instant>,
}

impl SubscriptionStatus {
    pub fn mechanism(&self, device_id: u32) -> Option<SubscriptionMechanism> {
        self.devices.get(&device_id)?.mechanism
    }

    pub fn wire_ids(&self) -> Vec<WireSubscriptionId> {
        self.devices
            .values()
            .flat_map(|d| d.wire_ids.iter().copied())
            .collect()
    }
}
