//! Issues, renews and cancels the wire subscriptions behind a handle.
//!
//! Devices are worked on concurrently; the calls for a single device go out
//! one after another so a failure part-way through can be unwound.

use crate::error::CovError;
use crate::local::LocalDevice;
use crate::negotiator::{negotiate, DevicePlan};
use crate::registry::WireRoute;
use crate::subscription::{DeviceState, Renewal, Subscription, SubscriptionId, WireRecord};
use covnet_core::CovPropertyRef;
use covnet_engine::ProtocolEngine;
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

struct DeviceOutcome {
    device_id: u32,
    plan: Option<DevicePlan>,
    result: Result<Vec<WireRecord>, CovError>,
}

/// (Re)arms `id` with `refs`, replacing whatever it held before.
///
/// Succeeds when at least one device is subscribed or polled. Devices that
/// fail for communication reasons stay pending and are retried by the
/// scheduler; when no device succeeded the handle is kept only if some device
/// can still be retried. A ref outside the instance range rejects the request
/// before any existing state is touched.
pub(crate) async fn subscribe<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    id: SubscriptionId,
    refs: Vec<CovPropertyRef>,
    max_delay: Duration,
) -> Result<(), CovError> {
    if let Some(bad) = refs.iter().find(|r| !r.reference.is_addressable()) {
        return Err(CovError::InvalidRef(bad.reference));
    }
    let mut sub = local
        .registry
        .lock_or_create(id, local.config.lifetime())
        .await;
    let stale = sub.reset();
    release_all(local, id, stale).await;
    sub.assign(refs, max_delay);

    let mut jobs = Vec::new();
    for device_id in sub.devices.keys().copied() {
        jobs.push(establish(
            local,
            id,
            device_id,
            sub.refs_for(device_id),
            sub.lifetime(),
            sub.max_delay(),
        ));
    }
    let outcomes = join_all(jobs).await;

    let mut failures = Vec::new();
    let mut succeeded = false;
    for outcome in outcomes {
        let Some(entry) = sub.devices.get_mut(&outcome.device_id) else {
            continue;
        };
        entry.plan = outcome.plan;
        match outcome.result {
            Ok(wire) => {
                entry.wire = wire;
                entry.state = DeviceState::Active;
                succeeded = true;
            }
            Err(err) => {
                entry.state = if err.is_capability() {
                    DeviceState::Unsupported(err.to_string())
                } else {
                    DeviceState::Pending(err.to_string())
                };
                failures.push((outcome.device_id, err));
            }
        }
    }

    if succeeded {
        sub.mark_renewed(Instant::now());
        log::info!(
            "subscription {id} armed on {} of {} devices",
            sub.devices.len() - failures.len(),
            sub.devices.len()
        );
        return Ok(());
    }
    if failures.is_empty() {
        // Empty ref set: nothing to keep alive.
        local.registry.retire_locked(&mut sub);
        return Ok(());
    }
    let retryable = sub
        .devices
        .values()
        .any(|d| matches!(d.state, DeviceState::Pending(_)));
    if !retryable {
        local.registry.retire_locked(&mut sub);
    }
    log::warn!("subscription {id} failed on every device");
    Err(CovError::SubscribeFailed {
        subscription: id,
        failures,
    })
}

/// Removes `id` and cancels its wire subscriptions, best effort.
pub(crate) async fn unsubscribe<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    id: SubscriptionId,
) -> Result<(), CovError> {
    let mut sub = local
        .registry
        .retire(id)
        .await
        .ok_or(CovError::UnknownSubscription(id))?;
    let stale = sub.reset();
    let count = stale.len();
    release_all(local, id, stale).await;
    log::info!("subscription {id} removed ({count} wire subscriptions cancelled)");
    Ok(())
}

/// Renews `id` with its existing plans.
///
/// New wire ids replace the old ones per device only when every call for
/// that device succeeded; otherwise the device keeps its previous ids and is
/// marked pending for the next scan.
pub(crate) async fn resubscribe<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    id: SubscriptionId,
    scope: Renewal,
) -> Result<(), CovError> {
    let mut sub = local
        .registry
        .lock(id)
        .await
        .ok_or(CovError::UnknownSubscription(id))?;

    let mut jobs = Vec::new();
    for (device_id, entry) in &sub.devices {
        let wanted = match &entry.state {
            DeviceState::Unsupported(_) => false,
            DeviceState::Pending(_) => true,
            DeviceState::Active => scope == Renewal::All,
        };
        if !wanted {
            continue;
        }
        jobs.push(renew_device(local, id, *device_id, entry.plan.clone(), &sub));
    }
    if jobs.is_empty() {
        return Ok(());
    }
    let outcomes = join_all(jobs).await;

    let mut failures = Vec::new();
    let mut renewed = 0usize;
    let mut released = BTreeMap::new();
    for outcome in outcomes {
        let Some(entry) = sub.devices.get_mut(&outcome.device_id) else {
            continue;
        };
        if outcome.plan.is_some() {
            entry.plan = outcome.plan;
        }
        match outcome.result {
            Ok(wire) => {
                let old = std::mem::replace(&mut entry.wire, wire);
                released.insert(outcome.device_id, old);
                entry.state = DeviceState::Active;
                renewed += 1;
            }
            Err(err) => {
                log::warn!(
                    "renewing subscription {id} on device {} failed, retrying next scan: {err}",
                    outcome.device_id
                );
                entry.state = if err.is_capability() && entry.plan.is_none() {
                    DeviceState::Unsupported(err.to_string())
                } else {
                    DeviceState::Pending(err.to_string())
                };
                failures.push((outcome.device_id, err));
            }
        }
    }

    for (device_id, old) in released {
        let keep: HashSet<_> = sub.devices[&device_id].wire.iter().map(|r| r.wire_id).collect();
        let stale = old
            .into_iter()
            .filter(|r| !keep.contains(&r.wire_id))
            .map(|r| (device_id, r))
            .collect();
        release_all(local, id, stale).await;
    }

    // Only a full renewal refreshed every device's wire subscriptions.
    if renewed > 0 && scope == Renewal::All {
        sub.mark_renewed(Instant::now());
    }
    if renewed == 0 && !failures.is_empty() {
        return Err(CovError::SubscribeFailed {
            subscription: id,
            failures,
        });
    }
    Ok(())
}

async fn renew_device<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    id: SubscriptionId,
    device_id: u32,
    plan: Option<DevicePlan>,
    sub: &Subscription,
) -> DeviceOutcome {
    match plan {
        // Never negotiated: capabilities were unreachable the first time.
        None => {
            establish(
                local,
                id,
                device_id,
                sub.refs_for(device_id),
                sub.lifetime(),
                sub.max_delay(),
            )
            .await
        }
        Some(plan) => {
            let result = issue(local, id, &plan).await;
            DeviceOutcome {
                device_id,
                plan: None,
                result,
            }
        }
    }
}

/// Negotiates and issues one device's part of a subscription.
async fn establish<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    id: SubscriptionId,
    device_id: u32,
    refs: Vec<CovPropertyRef>,
    lifetime: Duration,
    max_delay: Duration,
) -> DeviceOutcome {
    let plan = match local.capabilities(device_id).await {
        Ok(services) => negotiate(device_id, &refs, services, lifetime, max_delay),
        Err(err) => Err(err),
    };
    let plan = match plan {
        Ok(plan) => plan,
        Err(err) => {
            log::warn!("cannot subscribe {id} on device {device_id}: {err}");
            return DeviceOutcome {
                device_id,
                plan: None,
                result: Err(err),
            };
        }
    };
    log::debug!(
        "subscription {id} uses {:?} on device {device_id} ({} calls)",
        plan.mechanism,
        plan.calls.len()
    );
    let result = issue(local, id, &plan).await;
    DeviceOutcome {
        device_id,
        plan: Some(plan),
        result,
    }
}

/// Issues every call of `plan`. Wire ids are routed only once the device has
/// accepted all of them; on failure the calls already accepted are cancelled
/// without ever having been routed.
async fn issue<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    id: SubscriptionId,
    plan: &DevicePlan,
) -> Result<Vec<WireRecord>, CovError> {
    let device_id = plan.device_id;
    let mut issued = Vec::with_capacity(plan.calls.len());
    for call in &plan.calls {
        let result = local
            .call(device_id, local.engine.subscribe(device_id, &call.request))
            .await;
        match result {
            Ok(wire_id) => {
                log::info!(
                    "device {device_id} accepted {} {wire_id} for {id} covering {} refs",
                    call.request.service_name(),
                    call.refs.len()
                );
                issued.push(WireRecord {
                    wire_id,
                    call: call.clone(),
                });
            }
            Err(err) => {
                log::warn!(
                    "device {device_id} refused {} for {id}: {err}",
                    call.request.service_name()
                );
                join_all(issued.iter().map(|r| cancel(local, device_id, r))).await;
                return Err(err);
            }
        }
    }
    for record in &issued {
        local
            .registry
            .insert_route(record.wire_id, WireRoute::new(id, device_id, &record.call));
    }
    Ok(issued)
}

/// Unroutes `records` and cancels them on their devices, ignoring failures.
async fn release_all<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    id: SubscriptionId,
    records: Vec<(u32, WireRecord)>,
) {
    if records.is_empty() {
        return;
    }
    for (_, record) in &records {
        local.registry.remove_route(record.wire_id, id);
    }
    let mut jobs = Vec::new();
    for (device_id, record) in &records {
        jobs.push(cancel(local, *device_id, record));
    }
    join_all(jobs).await;
}

async fn cancel<E: ProtocolEngine>(local: &LocalDevice<E>, device_id: u32, record: &WireRecord) {
    let result = local
        .call(
            device_id,
            local
                .engine
                .unsubscribe(device_id, record.wire_id, &record.call.request),
        )
        .await;
    match result {
        Ok(()) => log::info!("device {device_id} cancelled {}", record.wire_id),
        Err(err) => log::debug!("cancelling {} on device {device_id}: {err}", record.wire_id),
    }
}
