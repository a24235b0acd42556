use std::time::Duration;

use tel_protocol::{
    select_endpoint, SecurityMode, SecurityPolicy, SessionOptions, SourceDriver, StatusCode,
    UserIdentity,
};
use tel_sim::{SimSession, SimulatedSource};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_support::{Probe, RecordingSink};
use crate::SinkContext;

const URL: &str = "opc.tcp://sim:4840";

async fn open(source: &SimulatedSource) -> SimSession {
    let endpoints = source.discover(URL).await.expect("discover");
    let endpoint = select_endpoint(&endpoints, SecurityPolicy::None, SecurityMode::None)
        .expect("endpoint")
        .clone();
    source
        .open_session(
            URL,
            SessionOptions {
                application_name: "telegate-test".to_string(),
                auto_reconnect: true,
                reconnect_interval: Duration::from_secs(10),
                endpoint,
                identity: UserIdentity::Anonymous,
                certificate: None,
            },
        )
        .await
        .expect("open session")
}

fn recording_distributor() -> (Arc<Distributor>, Probe) {
    let mut distributor = Distributor::new(URL, SinkContext::default());
    let (sink, probe) = RecordingSink::new("probe");
    distributor.register(Box::new(sink)).expect("register probe");
    (Arc::new(distributor), probe)
}

fn spec(node_ids: Vec<NodeId>) -> SubscriptionSpec {
    SubscriptionSpec {
        node_ids,
        interval: Duration::from_millis(10),
    }
}

async fn wait_for<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn data_points_become_events_and_keepalive_does_not() {
    let source = SimulatedSource::new();
    let session = open(&source).await;
    let epoch = Arc::new(ConnectionEpoch::new(1, CancellationToken::new()));
    let (distributor, probe) = recording_distributor();
    let temperature = NodeId::string(2, "Temperature");

    let manager = SubscriptionManager::start(
        &session,
        epoch.clone(),
        &spec(vec![temperature.clone()]),
        distributor,
    )
    .await
    .expect("start subscription");

    wait_for(|| probe.events().len() >= 3 && epoch.keepalive_seen()).await;
    let events = probe.events();
    assert!(events.iter().all(|event| event.id == "ns=2;s=Temperature"));
    assert!(events.iter().all(|event| event.name == "Temperature"));
    assert!(events.iter().all(|event| event.source == URL));
    assert_eq!(
        epoch.active_subscriptions(),
        vec![manager.subscription_id()]
    );

    epoch.cancel();
    manager.stop().await;
    assert!(epoch.active_subscriptions().is_empty());
}

#[tokio::test]
async fn rejected_items_are_skipped() {
    let source = SimulatedSource::new();
    let missing = NodeId::string(2, "Missing");
    let pressure = NodeId::string(2, "Pressure");
    source.reject_item(missing.clone());
    let session = open(&source).await;
    let epoch = Arc::new(ConnectionEpoch::new(1, CancellationToken::new()));
    let (distributor, probe) = recording_distributor();

    let manager = SubscriptionManager::start(
        &session,
        epoch.clone(),
        &spec(vec![missing, pressure]),
        distributor,
    )
    .await
    .expect("start despite rejected item");

    wait_for(|| !probe.events().is_empty()).await;
    assert!(probe
        .events()
        .iter()
        .all(|event| event.id == "ns=2;s=Pressure"));
    assert_eq!(epoch.monitored_items(manager.subscription_id()), Some(2));

    epoch.cancel();
    manager.stop().await;
}

#[tokio::test]
async fn bad_status_and_errored_notifications_are_dropped() {
    let source = SimulatedSource::new();
    let flaky = NodeId::string(2, "Flaky");
    let errored = NodeId::string(2, "Errored");
    let good = NodeId::string(2, "Good");
    source.force_status(flaky.clone(), StatusCode::BAD_COMMUNICATION_ERROR);
    source.force_error(errored.clone(), "decode failure");
    let session = open(&source).await;
    let epoch = Arc::new(ConnectionEpoch::new(1, CancellationToken::new()));
    let (distributor, probe) = recording_distributor();

    let manager = SubscriptionManager::start(
        &session,
        epoch.clone(),
        &spec(vec![flaky, errored, good]),
        distributor,
    )
    .await
    .expect("start subscription");

    wait_for(|| probe.events().len() >= 3).await;
    assert!(probe.events().iter().all(|event| event.id == "ns=2;s=Good"));

    epoch.cancel();
    manager.stop().await;
}

#[tokio::test]
async fn subscription_failure_is_fatal_for_the_epoch() {
    let source = SimulatedSource::new();
    source.fail_subscriptions(true);
    let session = open(&source).await;
    let epoch = Arc::new(ConnectionEpoch::new(1, CancellationToken::new()));
    let (distributor, _) = recording_distributor();

    let result = SubscriptionManager::start(&session, epoch.clone(), &spec(vec![]), distributor).await;
    assert!(matches!(result, Err(SubscriptionError::Subscribe(_))));
    assert!(epoch.active_subscriptions().is_empty());
}

#[tokio::test]
async fn keepalive_rejection_is_fatal_for_the_epoch() {
    let source = SimulatedSource::new();
    source.reject_item(KEEPALIVE_NODE_ID);
    let session = open(&source).await;
    let epoch = Arc::new(ConnectionEpoch::new(1, CancellationToken::new()));
    let (distributor, _) = recording_distributor();

    let result = SubscriptionManager::start(
        &session,
        epoch,
        &spec(vec![NodeId::string(2, "Temperature")]),
        distributor,
    )
    .await;
    assert!(matches!(result, Err(SubscriptionError::Keepalive(_))));
}

#[tokio::test]
async fn no_events_after_epoch_cancellation() {
    let source = SimulatedSource::new();
    let session = open(&source).await;
    let epoch = Arc::new(ConnectionEpoch::new(1, CancellationToken::new()));
    let (distributor, probe) = recording_distributor();

    let manager = SubscriptionManager::start(
        &session,
        epoch.clone(),
        &spec(vec![NodeId::string(2, "Level")]),
        distributor,
    )
    .await
    .expect("start subscription");
    wait_for(|| !probe.events().is_empty()).await;

    epoch.cancel();
    manager.stop().await;
    let settled = probe.events().len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.events().len(), settled);
}
