mod common;

use common::*;
use covnet::{decode_results, CovError, NetworkConfig};
use covnet_core::types::{ObjectId, PropertyId, PropertyValue, Service};
use covnet_core::{ControlValue, Decoded, Number, PropertyRef};
use covnet_engine::{CallKind, SimulatedNetwork};
use std::time::Duration;

fn pv(device_id: u32, object: ObjectId) -> PropertyRef {
    PropertyRef::present_value(device_id, object.object_type(), object.instance())
}

fn refs_on(device_id: u32) -> Vec<PropertyRef> {
    vec![pv(device_id, AI1), pv(device_id, AI2), pv(device_id, AO1)]
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_use_one_call_per_device_when_supported() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    add_device(&sim, 2, ALL);
    add_device(&sim, 3, &[Service::ReadProperty]);
    let network = started(&sim, NetworkConfig::default()).await;

    let mut refs = refs_on(1);
    refs.extend(refs_on(2));
    let results = network.read_properties(&refs).await.unwrap();
    assert_eq!(results.len(), 6);
    assert!(results.values().all(Result::is_ok));
    assert_eq!(
        results[&pv(2, AI2)].as_ref().unwrap(),
        &PropertyValue::Real(30.0)
    );
    assert_eq!(sim.total_calls(CallKind::ReadPropertyMultiple), 2);
    assert_eq!(sim.total_calls(CallKind::ReadProperty), 0);

    sim.clear_calls();
    let results = network.read_properties(&refs_on(3)).await.unwrap();
    assert!(results.values().all(Result::is_ok));
    assert_eq!(sim.call_count(CallKind::ReadProperty, 3), 3);
    assert_eq!(sim.total_calls(CallKind::ReadPropertyMultiple), 0);

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn read_failures_stay_with_their_ref() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    add_device(&sim, 5, ALL);
    add_device(&sim, 6, &[Service::WriteProperty]);
    sim.set_reachable(5, false);
    let network = started(&sim, NetworkConfig::default()).await;

    let units = PropertyRef::new(1, AI1.object_type(), AI1.instance(), PropertyId::Units);
    let refs = [pv(1, AI1), units, pv(5, AI1), pv(6, AI1), pv(99, AI1)];
    let results = network.read_properties(&refs).await.unwrap();

    assert_eq!(results[&pv(1, AI1)].as_ref().unwrap(), &PropertyValue::Real(20.0));
    assert!(matches!(
        results[&units],
        Err(CovError::Protocol { device_id: 1, .. })
    ));
    assert!(results[&pv(5, AI1)].as_ref().unwrap_err().is_communication());
    assert!(results[&pv(6, AI1)].as_ref().unwrap_err().is_capability());
    assert!(results[&pv(99, AI1)].as_ref().unwrap_err().is_communication());

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn read_results_decode_to_plain_values() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    let network = started(&sim, NetworkConfig::default()).await;

    let name = PropertyRef::new(1, AI1.object_type(), AI1.instance(), PropertyId::ObjectName);
    let refs = [pv(1, AI1), pv(1, BO1), name, pv(99, AI1)];
    let decoded = decode_results(&network.read_properties(&refs).await.unwrap());

    assert_eq!(
        decoded[&pv(1, AI1)].as_ref().unwrap(),
        &Decoded::Number(Number::Float(20.0))
    );
    assert_eq!(
        decoded[&pv(1, BO1)].as_ref().unwrap(),
        &Decoded::Number(Number::Integer(0))
    );
    assert_eq!(
        decoded[&name].as_ref().unwrap(),
        &Decoded::Text(AI1.to_string())
    );
    assert!(decoded[&pv(99, AI1)].as_ref().unwrap_err().is_communication());

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_values_skip_the_wire_until_stale() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    let network = started(&sim, NetworkConfig::default()).await;
    let kept = pv(1, AO1);
    let timed = pv(1, AI2);
    network.set_cache_policy(&[kept], u64::MAX);
    network.set_cache_policy(&[timed], 50);

    network.read_properties(&[kept, timed]).await.unwrap();
    network.read_properties(&[kept, timed]).await.unwrap();
    assert_eq!(sim.total_calls(CallKind::ReadPropertyMultiple), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    sim.clear_calls();
    network.read_properties(&[kept, timed]).await.unwrap();
    assert_eq!(sim.total_calls(CallKind::ReadPropertyMultiple), 1);
    assert_eq!(sim.calls().len(), 1);

    // A write drops the cached value.
    let written = network
        .write_properties([(kept, ControlValue::Float(24.5))])
        .await
        .unwrap();
    assert!(written.all_succeeded());
    sim.clear_calls();
    let results = network.read_properties(&[kept]).await.unwrap();
    assert_eq!(results[&kept].as_ref().unwrap(), &PropertyValue::Real(24.5));
    assert_eq!(sim.total_calls(CallKind::ReadPropertyMultiple), 1);

    // Disabling the policy forgets the value.
    network.set_cache_policy(&[kept], 0);
    sim.clear_calls();
    network.read_properties(&[kept]).await.unwrap();
    assert_eq!(sim.total_calls(CallKind::ReadPropertyMultiple), 1);

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn notifications_refresh_the_cache() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    let network = started(&sim, NetworkConfig::default()).await;
    let collector = Collector::default();
    network.add_cov_handler(collector.handler());
    let r = pv(1, AI1);
    network.set_cache_policy(&[r], u64::MAX);
    network.cov_subscribe([r.into()], 0).await.unwrap();

    sim.set_property(1, AI1, PropertyId::PresentValue, PropertyValue::Real(25.0));
    assert!(
        collector
            .wait_for(|_, u| u.get(&r) == Some(&PropertyValue::Real(25.0)))
            .await
    );
    sim.clear_calls();
    let results = network.read_properties(&[r]).await.unwrap();
    assert_eq!(results[&r].as_ref().unwrap(), &PropertyValue::Real(25.0));
    assert!(sim.calls().is_empty());

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn writes_group_by_device_and_type_their_values() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    add_device(&sim, 2, ALL);
    let network = started(&sim, NetworkConfig::default()).await;

    let results = network
        .write_properties([
            (pv(1, AO1).with_priority(8), ControlValue::Float(12.5)),
            (pv(1, BO1), ControlValue::Boolean(true)),
            (pv(2, AO1), ControlValue::Integer(3)),
            (pv(2, BO1), ControlValue::Text("off".into())),
        ])
        .await
        .unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.all_succeeded());
    assert!(results.partial_failure().is_none());
    assert_eq!(sim.total_calls(CallKind::WritePropertyMultiple), 2);
    assert_eq!(sim.total_calls(CallKind::WriteProperty), 0);

    let writes = sim.writes();
    let find = |device_id: u32, object: ObjectId| {
        writes
            .iter()
            .find(|w| w.device_id == device_id && w.access.object_id == object)
            .map(|w| w.access.clone())
            .unwrap()
    };
    let ao = find(1, AO1);
    assert_eq!(ao.value, PropertyValue::Real(12.5));
    assert_eq!(ao.priority, Some(8));
    assert_eq!(find(1, BO1).value, PropertyValue::Enumerated(1));
    assert_eq!(find(2, AO1).value, PropertyValue::Real(3.0));
    assert_eq!(find(2, BO1).value, PropertyValue::Enumerated(0));

    // Relinquishing falls back to the relinquish default.
    let results = network
        .write_properties([(pv(1, AO1).with_priority(8), ControlValue::Null)])
        .await
        .unwrap();
    assert!(results.all_succeeded());
    assert_eq!(
        sim.property(1, AO1, PropertyId::PresentValue),
        Some(PropertyValue::Real(0.0))
    );

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn single_writes_report_partial_failure_per_ref() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 3, &[Service::ReadProperty, Service::WriteProperty]);
    sim.deny_writes(3, AI2);
    let network = started(&sim, NetworkConfig::default()).await;

    let results = network
        .write_properties([
            (pv(3, AO1), ControlValue::Text("warm".into())),
            (pv(3, BO1), ControlValue::Boolean(true)),
            (pv(3, AI1), ControlValue::Float(2.0)),
            (pv(3, AI2), ControlValue::Float(1.0)),
        ])
        .await
        .unwrap();
    // The unencodable value never reaches the wire.
    assert_eq!(sim.call_count(CallKind::WriteProperty, 3), 3);
    assert!(matches!(
        results.get(&pv(3, AO1)),
        Some(Err(CovError::UnsupportedValue(_)))
    ));

    let split = results.partial_failure().unwrap();
    assert_eq!(split.succeeded, {
        let mut ok = vec![pv(3, BO1), pv(3, AI1)];
        ok.sort();
        ok
    });
    assert_eq!(split.failed.len(), 2);
    assert!(split
        .failed
        .iter()
        .any(|(r, e)| *r == pv(3, AI2) && matches!(e, CovError::Protocol { device_id: 3, .. })));
    assert_eq!(
        sim.property(3, BO1, PropertyId::PresentValue),
        Some(PropertyValue::Enumerated(1))
    );

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn multiple_write_failure_applies_to_the_whole_device() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    add_device(&sim, 2, ALL);
    sim.deny_writes(1, AO1);
    let network = started(&sim, NetworkConfig::default()).await;

    let results = network
        .write_properties([
            (pv(1, AO1), ControlValue::Float(1.0)),
            (pv(1, BO1), ControlValue::Boolean(true)),
            (pv(2, AO1), ControlValue::Float(1.0)),
        ])
        .await
        .unwrap();
    assert!(results.get(&pv(1, AO1)).unwrap().is_err());
    assert!(results.get(&pv(1, BO1)).unwrap().is_err());
    assert!(results.get(&pv(2, AO1)).unwrap().is_ok());
    // Device 1 applied nothing.
    assert_eq!(
        sim.property(1, BO1, PropertyId::PresentValue),
        Some(PropertyValue::Enumerated(0))
    );

    network.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn refs_beyond_the_instance_range_never_alias_another_object() {
    init_logging();
    let sim = SimulatedNetwork::new();
    add_device(&sim, 1, ALL);
    let network = started(&sim, NetworkConfig::default()).await;

    // Masked to 22 bits this would be AI1.
    let wide = PropertyRef::present_value(1, AI1.object_type(), 0x40_0000 | AI1.instance());
    assert_eq!(wide.object_id(), AI1);
    let results = network.read_properties(&[wide, pv(1, AI2)]).await.unwrap();
    assert!(matches!(&results[&wide], Err(CovError::InvalidRef(r)) if *r == wide));
    assert_eq!(
        results[&pv(1, AI2)].as_ref().unwrap(),
        &PropertyValue::Real(30.0)
    );
    assert_eq!(sim.total_calls(CallKind::ReadPropertyMultiple), 1);

    let wide_output =
        PropertyRef::present_value(1, AO1.object_type(), 0x40_0000 | AO1.instance());
    let results = network
        .write_properties([(wide_output, ControlValue::Float(5.0))])
        .await
        .unwrap();
    assert!(matches!(
        results.get(&wide_output),
        Some(Err(CovError::InvalidRef(_)))
    ));
    assert!(sim.writes().is_empty());
    assert_eq!(
        sim.property(1, AO1, PropertyId::PresentValue),
        Some(PropertyValue::Real(0.0))
    );

    network.shutdown().await;
}
