use std::time::UNIX_EPOCH;

use tel_protocol::{DataChange, NodeId, Value};

use super::*;
use crate::test_support::RecordingSink;

const SOURCE: &str = "opc.tcp://plc:4840";

fn sample_event(name: &str) -> Event {
    Event::from_change(DataChange::good(
        NodeId::string(2, name),
        Value::F64(1.25),
        UNIX_EPOCH,
    ))
}

#[tokio::test]
async fn publish_stamps_source_and_isolates_failures() {
    let mut distributor = Distributor::new(SOURCE, SinkContext::default());
    let (broken, broken_probe) = RecordingSink::failing_publish("broken");
    let (healthy, healthy_probe) = RecordingSink::new("healthy");
    distributor.register(Box::new(broken)).expect("register broken");
    distributor.register(Box::new(healthy)).expect("register healthy");

    let failed = distributor.publish(sample_event("Temperature")).await;
    assert_eq!(failed, 1);
    assert_eq!(broken_probe.publish_calls(), 1);

    let events = healthy_probe.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, SOURCE);
    assert_eq!(events[0].name, "Temperature");
}

#[tokio::test]
async fn initialize_stops_at_first_failure_and_unwinds() {
    let mut distributor = Distributor::new(SOURCE, SinkContext::default());
    let (first, first_probe) = RecordingSink::new("first");
    let (second, second_probe) = RecordingSink::failing_init("second");
    let (third, third_probe) = RecordingSink::new("third");
    distributor.register(Box::new(first)).expect("register first");
    distributor.register(Box::new(second)).expect("register second");
    distributor.register(Box::new(third)).expect("register third");

    let err = distributor.initialize().await.expect_err("startup must fail");
    assert!(matches!(err, DistributorError::Initialize { ref key, .. } if key == "second"));
    assert!(err.to_string().contains("second refused to start"));

    assert_eq!(first_probe.init_calls(), 1);
    assert_eq!(first_probe.shutdown_calls(), 1);
    assert_eq!(second_probe.init_calls(), 1);
    assert_eq!(second_probe.shutdown_calls(), 0);
    assert_eq!(third_probe.init_calls(), 0);
}

#[test]
fn duplicate_keys_are_rejected() {
    let mut distributor = Distributor::new(SOURCE, SinkContext::default());
    let (a, _) = RecordingSink::new("websocket");
    let (b, _) = RecordingSink::new("websocket");
    distributor.register(Box::new(a)).expect("register first");
    let err = distributor.register(Box::new(b)).expect_err("duplicate");
    assert!(matches!(err, DistributorError::DuplicateKey(key) if key == "websocket"));
}

#[tokio::test]
async fn unknown_selection_keys_are_ignored() {
    let keys = vec![
        "websocket".to_string(),
        "kafka".to_string(),
        "timescale".to_string(),
    ];
    let distributor = Distributor::from_selection(SOURCE, SinkContext::default(), &keys, |key| {
        Ok(match key {
            "websocket" | "timescale" => Some(Box::new(RecordingSink::new(key).0) as Box<dyn Sink>),
            _ => None,
        })
    })
    .expect("build distributor");

    assert_eq!(distributor.keys(), vec!["websocket", "timescale"]);
    distributor.initialize().await.expect("initialize");
}

#[test]
fn factory_errors_surface_with_key() {
    let keys = vec!["timescale".to_string()];
    let result = Distributor::from_selection(SOURCE, SinkContext::default(), &keys, |_| {
        Err(SinkError::Setup("bad pool settings".to_string()))
    });
    let err = result.err().expect("factory error");
    assert!(err.to_string().contains("timescale"));
    assert!(err.to_string().contains("bad pool settings"));
}

#[tokio::test]
async fn shutdown_runs_once() {
    let mut distributor = Distributor::new(SOURCE, SinkContext::default());
    let (sink, probe) = RecordingSink::new("store");
    distributor.register(Box::new(sink)).expect("register");

    distributor.shutdown().await;
    distributor.shutdown().await;
    assert_eq!(probe.shutdown_calls(), 1);
}
