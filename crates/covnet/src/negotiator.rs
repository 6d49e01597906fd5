//! Chooses how each device's refs are kept live.

use crate::error::CovError;
use covnet_core::types::{ObjectId, PropertyId, ServicesSupported};
use covnet_core::{CovPropertyRef, PropertyRef};
use covnet_engine::{CovReference, CovSpecification, SubscribeRequest};
use std::collections::BTreeMap;
use std::time::Duration;

/// How a device's refs are monitored. Variants are declared in preference
/// order, so the derived `Ord` ranks richer mechanisms first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubscriptionMechanism {
    PropertiesMultiple,
    SinglePropertyWithIncrement,
    WholeObject,
    PollMultiple,
    PollSingle,
}

impl SubscriptionMechanism {
    pub const fn is_polling(self) -> bool {
        matches!(self, Self::PollMultiple | Self::PollSingle)
    }
}

/// One wire-level subscribe call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlannedCall {
    pub mechanism: SubscriptionMechanism,
    pub request: SubscribeRequest,
    /// Refs this call keeps live.
    pub refs: Vec<PropertyRef>,
}

impl PlannedCall {
    /// The single object a notification for this call must come from.
    pub fn object_id(&self) -> Option<ObjectId> {
        match &self.request {
            SubscribeRequest::Object { object_id, .. }
            | SubscribeRequest::Property { object_id, .. } => Some(*object_id),
            SubscribeRequest::PropertiesMultiple { .. } => None,
        }
    }

    /// The monitored property of a single-property subscription.
    pub fn monitored_property(&self) -> Option<(PropertyId, Option<u32>)> {
        match &self.request {
            SubscribeRequest::Property {
                property_id,
                array_index,
                ..
            } => Some((*property_id, *array_index)),
            _ => None,
        }
    }
}

/// The negotiated strategy for one device of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DevicePlan {
    pub device_id: u32,
    pub mechanism: SubscriptionMechanism,
    /// Subscribe calls to issue; empty for polled devices.
    pub calls: Vec<PlannedCall>,
    /// Refs read on every scan; empty for COV devices.
    pub polled: Vec<PropertyRef>,
}

/// Picks the richest mechanism `services` allows for `refs`, all of which
/// belong to `device_id`.
///
/// Property-multiple COV takes everything in one call. Single-property COV
/// covers refs with an increment, and the remaining refs fall back to one
/// whole-object subscription per object; when whole-object COV is missing
/// for that fallback the whole device is polled instead. Without any usable
/// COV service the device is polled with read-property-multiple or
/// read-property, and a device with neither fails.
pub(crate) fn negotiate(
    device_id: u32,
    refs: &[CovPropertyRef],
    services: ServicesSupported,
    lifetime: Duration,
    max_delay: Duration,
) -> Result<DevicePlan, CovError> {
    if services.subscribe_cov_property_multiple() {
        let mut specs: BTreeMap<ObjectId, Vec<CovReference>> = BTreeMap::new();
        for r in refs {
            specs
                .entry(r.reference.object_id())
                .or_default()
                .push(CovReference {
                    property_id: r.reference.property_id,
                    array_index: r.reference.array_index,
                    cov_increment: r.cov_increment,
                });
        }
        let call = PlannedCall {
            mechanism: SubscriptionMechanism::PropertiesMultiple,
            request: SubscribeRequest::PropertiesMultiple {
                lifetime,
                max_notification_delay: max_delay,
                specifications: specs
                    .into_iter()
                    .map(|(object_id, references)| CovSpecification {
                        object_id,
                        references,
                    })
                    .collect(),
            },
            refs: refs.iter().map(|r| r.reference).collect(),
        };
        return Ok(cov_plan(device_id, SubscriptionMechanism::PropertiesMultiple, vec![call]));
    }

    if services.subscribe_cov_property() {
        let (with_increment, fallback): (Vec<&CovPropertyRef>, Vec<&CovPropertyRef>) =
            refs.iter().partition(|r| r.cov_increment.is_some());
        if fallback.is_empty() || services.subscribe_cov() {
            let mut calls: Vec<PlannedCall> = with_increment
                .iter()
                .map(|r| PlannedCall {
                    mechanism: SubscriptionMechanism::SinglePropertyWithIncrement,
                    request: SubscribeRequest::Property {
                        object_id: r.reference.object_id(),
                        property_id: r.reference.property_id,
                        array_index: r.reference.array_index,
                        cov_increment: r.cov_increment,
                        lifetime,
                    },
                    refs: vec![r.reference],
                })
                .collect();
            let fallback: Vec<PropertyRef> = fallback.iter().map(|r| r.reference).collect();
            calls.extend(whole_object_calls(&fallback, lifetime));
            let mechanism = if with_increment.is_empty() {
                SubscriptionMechanism::WholeObject
            } else {
                SubscriptionMechanism::SinglePropertyWithIncrement
            };
            return Ok(cov_plan(device_id, mechanism, calls));
        }
    } else if services.subscribe_cov() {
        let refs: Vec<PropertyRef> = refs.iter().map(|r| r.reference).collect();
        let calls = whole_object_calls(&refs, lifetime);
        return Ok(cov_plan(device_id, SubscriptionMechanism::WholeObject, calls));
    }

    let mechanism = if services.read_property_multiple() {
        SubscriptionMechanism::PollMultiple
    } else if services.read_property() {
        SubscriptionMechanism::PollSingle
    } else {
        return Err(CovError::Capability {
            device_id,
            reason: "no COV or read service available".into(),
        });
    };
    Ok(DevicePlan {
        device_id,
        mechanism,
        calls: Vec::new(),
        polled: refs.iter().map(|r| r.reference).collect(),
    })
}

fn cov_plan(
    device_id: u32,
    mechanism: SubscriptionMechanism,
    calls: Vec<PlannedCall>,
) -> DevicePlan {
    DevicePlan {
        device_id,
        mechanism,
        calls,
        polled: Vec::new(),
    }
}

/// One SubscribeCOV per distinct object, in object order.
fn whole_object_calls(refs: &[PropertyRef], lifetime: Duration) -> Vec<PlannedCall> {
    let mut objects: BTreeMap<ObjectId, Vec<PropertyRef>> = BTreeMap::new();
    for r in refs {
        objects.entry(r.object_id()).or_default().push(*r);
    }
    objects
        .into_iter()
        .map(|(object_id, refs)| PlannedCall {
            mechanism: SubscriptionMechanism::WholeObject,
            request: SubscribeRequest::Object {
                object_id,
                lifetime,
            },
            refs,
        })
        .collect()
}
