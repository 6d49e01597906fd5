//! Batched reads and writes grouped by device.

use crate::error::CovError;
use crate::local::LocalDevice;
use covnet_core::codec::{decode_value, encode_for_write, ControlValue, Decoded};
use covnet_core::types::PropertyValue;
use covnet_core::PropertyRef;
use covnet_engine::{EngineError, ProtocolEngine, ReadAccess, WriteAccess};
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-ref outcome of a batched read.
pub type ReadResults = HashMap<PropertyRef, Result<PropertyValue, CovError>>;

/// Flattens successful reads into numbers, bits and text, keeping failures.
/// Values with no plain form (null, an unspecified date) are left out.
pub fn decode_results(results: &ReadResults) -> HashMap<PropertyRef, Result<Decoded, CovError>> {
    results
        .iter()
        .filter_map(|(r, result)| match result {
            Ok(value) => decode_value(value).map(|d| (*r, Ok(d))),
            Err(err) => Some((*r, Err(err.clone()))),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    Multiple,
    Single,
}

/// Per-ref outcome of a batched write.
#[derive(Debug, Clone, Default)]
pub struct WriteResults {
    results: HashMap<PropertyRef, Result<(), CovError>>,
}

/// The split of a batch where some writes succeeded and some failed.
#[derive(Debug, Clone)]
pub struct PartialWriteFailure {
    pub succeeded: Vec<PropertyRef>,
    pub failed: Vec<(PropertyRef, CovError)>,
}

impl WriteResults {
    pub fn get(&self, r: &PropertyRef) -> Option<&Result<(), CovError>> {
        self.results.get(r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropertyRef, &Result<(), CovError>)> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// `true` when every write succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(Result::is_ok)
    }

    /// Some when the batch mixed successes and failures.
    pub fn partial_failure(&self) -> Option<PartialWriteFailure> {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (r, result) in &self.results {
            match result {
                Ok(()) => succeeded.push(*r),
                Err(err) => failed.push((*r, err.clone())),
            }
        }
        if succeeded.is_empty() || failed.is_empty() {
            return None;
        }
        succeeded.sort();
        failed.sort_by_key(|(r, _)| *r);
        Some(PartialWriteFailure { succeeded, failed })
    }

    pub fn into_map(self) -> HashMap<PropertyRef, Result<(), CovError>> {
        self.results
    }
}

fn group_by_device<T>(
    items: impl IntoIterator<Item = (PropertyRef, T)>,
) -> BTreeMap<u32, Vec<(PropertyRef, T)>> {
    let mut devices: BTreeMap<u32, Vec<(PropertyRef, T)>> = BTreeMap::new();
    for (r, item) in items {
        devices.entry(r.device_id).or_default().push((r, item));
    }
    devices
}

fn read_access(r: &PropertyRef) -> ReadAccess {
    ReadAccess {
        object_id: r.object_id(),
        property_id: r.property_id,
        array_index: r.array_index,
    }
}

/// Reads `refs`, serving fresh cached values without touching the wire.
/// Each device gets one read-property-multiple call when it supports one,
/// otherwise one read-property call per ref. Refs outside the instance range
/// fail with [`CovError::InvalidRef`] and never reach a device.
pub(crate) async fn read_all<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    refs: &[PropertyRef],
) -> ReadResults {
    let mut results = ReadResults::with_capacity(refs.len());
    let mut wanted = HashSet::new();
    let mut misses = Vec::new();
    for r in refs {
        if !wanted.insert(*r) {
            continue;
        }
        if !r.is_addressable() {
            results.insert(*r, Err(CovError::InvalidRef(*r)));
            continue;
        }
        match local.cache.get(r) {
            Some(value) => {
                results.insert(*r, Ok(value));
            }
            None => misses.push((*r, ())),
        }
    }

    let mut jobs = Vec::new();
    for (device_id, refs) in group_by_device(misses) {
        let refs: Vec<PropertyRef> = refs.into_iter().map(|(r, ())| r).collect();
        jobs.push(read_device(local, device_id, refs));
    }
    for device_results in join_all(jobs).await {
        for (r, result) in device_results {
            if let Ok(value) = &result {
                local.cache.store(&r, value);
            }
            results.insert(r, result);
        }
    }
    results
}

async fn read_device<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    device_id: u32,
    refs: Vec<PropertyRef>,
) -> Vec<(PropertyRef, Result<PropertyValue, CovError>)> {
    let mode = match local.capabilities(device_id).await {
        Ok(services) if services.read_property_multiple() => ReadMode::Multiple,
        Ok(services) if services.read_property() => ReadMode::Single,
        Ok(_) => {
            let err = CovError::Capability {
                device_id,
                reason: "no read service available".into(),
            };
            return refs.into_iter().map(|r| (r, Err(err.clone()))).collect();
        }
        Err(err) => return refs.into_iter().map(|r| (r, Err(err.clone()))).collect(),
    };
    fetch(local, device_id, &refs, mode).await
}

/// Reads `refs` from one device with the given mode, bypassing the cache.
pub(crate) async fn fetch<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    device_id: u32,
    refs: &[PropertyRef],
    mode: ReadMode,
) -> Vec<(PropertyRef, Result<PropertyValue, CovError>)> {
    match mode {
        ReadMode::Multiple => {
            let accesses: Vec<ReadAccess> = refs.iter().map(read_access).collect();
            let result = local
                .call(
                    device_id,
                    local.engine.read_property_multiple(device_id, &accesses),
                )
                .await;
            match result {
                Ok(values) if values.len() == refs.len() => refs
                    .iter()
                    .zip(values)
                    .map(|(r, v)| (*r, v.map_err(|e| CovError::from_engine(device_id, e))))
                    .collect(),
                Ok(values) => {
                    log::warn!(
                        "device {device_id} answered {} of {} properties",
                        values.len(),
                        refs.len()
                    );
                    let mut values = values.into_iter();
                    refs.iter()
                        .map(|r| {
                            let result = match values.next() {
                                Some(v) => v.map_err(|e| CovError::from_engine(device_id, e)),
                                None => Err(CovError::from_engine(
                                    device_id,
                                    EngineError::Transport("missing property in response".into()),
                                )),
                            };
                            (*r, result)
                        })
                        .collect()
                }
                Err(err) => refs.iter().map(|r| (*r, Err(err.clone()))).collect(),
            }
        }
        ReadMode::Single => {
            let mut jobs = Vec::with_capacity(refs.len());
            for r in refs {
                jobs.push(read_one(local, device_id, *r));
            }
            join_all(jobs).await
        }
    }
}

async fn read_one<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    device_id: u32,
    r: PropertyRef,
) -> (PropertyRef, Result<PropertyValue, CovError>) {
    let result = local
        .call(device_id, local.engine.read_property(device_id, read_access(&r)))
        .await;
    (r, result)
}

/// Writes every value, typed for its target. Values that cannot be encoded,
/// and refs outside the instance range, fail on their own. Each device gets
/// one write-property-multiple call when it supports one, whose outcome then
/// applies to all its refs; otherwise one write-property call per ref.
pub(crate) async fn write_all<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    values: Vec<(PropertyRef, ControlValue)>,
) -> WriteResults {
    let mut results = HashMap::with_capacity(values.len());
    let mut encoded = Vec::with_capacity(values.len());
    for (r, value) in values {
        if !r.is_addressable() {
            results.insert(r, Err(CovError::InvalidRef(r)));
            continue;
        }
        match encode_for_write(&r, &value) {
            Some(value) => encoded.push((
                r,
                WriteAccess {
                    object_id: r.object_id(),
                    property_id: r.property_id,
                    array_index: r.array_index,
                    value,
                    priority: r.priority,
                },
            )),
            None => {
                results.insert(r, Err(CovError::UnsupportedValue(r)));
            }
        }
    }

    let mut jobs = Vec::new();
    for (device_id, items) in group_by_device(encoded) {
        jobs.push(write_device(local, device_id, items));
    }
    for device_results in join_all(jobs).await {
        for (r, result) in device_results {
            if result.is_ok() {
                local.cache.invalidate(&r);
            }
            results.insert(r, result);
        }
    }
    WriteResults { results }
}

async fn write_device<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    device_id: u32,
    items: Vec<(PropertyRef, WriteAccess)>,
) -> Vec<(PropertyRef, Result<(), CovError>)> {
    let services = match local.capabilities(device_id).await {
        Ok(services) => services,
        Err(err) => return items.into_iter().map(|(r, _)| (r, Err(err.clone()))).collect(),
    };
    if services.write_property_multiple() {
        let accesses: Vec<WriteAccess> = items.iter().map(|(_, a)| a.clone()).collect();
        let result = local
            .call(
                device_id,
                local.engine.write_property_multiple(device_id, &accesses),
            )
            .await;
        if let Err(err) = &result {
            log::warn!("write-property-multiple to device {device_id} failed: {err}");
        }
        return items.into_iter().map(|(r, _)| (r, result.clone())).collect();
    }
    if !services.write_property() {
        let err = CovError::Capability {
            device_id,
            reason: "no write service available".into(),
        };
        return items.into_iter().map(|(r, _)| (r, Err(err.clone()))).collect();
    }
    let mut jobs = Vec::with_capacity(items.len());
    for (r, access) in items {
        jobs.push(write_one(local, device_id, r, access));
    }
    join_all(jobs).await
}

async fn write_one<E: ProtocolEngine>(
    local: &LocalDevice<E>,
    device_id: u32,
    r: PropertyRef,
    access: WriteAccess,
) -> (PropertyRef, Result<(), CovError>) {
    let result = local
        .call(device_id, local.engine.write_property(device_id, access))
        .await;
    if let Err(err) = &result {
        log::warn!("write to {r} failed: {err}");
    }
    (r, result)
}
