use std::time::Duration;

use tel_protocol::{NodeId, StatusCode};
use tel_sim::SimulatedSource;
use tokio::task::JoinHandle;

use super::*;
use crate::test_support::{Probe, RecordingSink};
use crate::SinkContext;

const URL: &str = "opc.tcp://sim:4840";

fn options(retry_budget: u32) -> SupervisorOptions {
    let mut options = SupervisorOptions::new(
        URL,
        SubscriptionSpec {
            node_ids: vec![NodeId::string(2, "Temperature")],
            interval: Duration::from_millis(10),
        },
    );
    options.retry_budget = retry_budget;
    options.connect_timeout = Duration::from_millis(500);
    options
}

fn recording_distributor() -> (Arc<Distributor>, Probe) {
    let mut distributor = Distributor::new(URL, SinkContext::default());
    let (sink, probe) = RecordingSink::new("probe");
    distributor.register(Box::new(sink)).expect("register probe");
    (Arc::new(distributor), probe)
}

fn spawn_supervisor(
    source: SimulatedSource,
    options: SupervisorOptions,
    distributor: Arc<Distributor>,
    shutdown: CancellationToken,
) -> (
    watch::Receiver<SupervisorStatus>,
    JoinHandle<Result<(), SupervisorError>>,
) {
    let supervisor = Supervisor::new(source, options, distributor);
    let status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown));
    (status, task)
}

async fn wait_for_status<F>(status: &mut watch::Receiver<SupervisorStatus>, check: F) -> SupervisorStatus
where
    F: FnMut(&SupervisorStatus) -> bool,
{
    let snapshot = tokio::time::timeout(Duration::from_secs(3), status.wait_for(check))
        .await
        .expect("status not reached in time")
        .expect("status channel closed");
    *snapshot
}

#[test]
fn cadence_derives_from_subscription_interval() {
    let options = options(1);
    assert_eq!(options.poll_interval(), Duration::from_millis(30));
    assert_eq!(options.keepalive_timeout(), Duration::from_millis(60));
}

#[tokio::test]
async fn connects_and_forwards_events() {
    let source = SimulatedSource::new();
    let (distributor, probe) = recording_distributor();
    let shutdown = CancellationToken::new();
    let (mut status, task) =
        spawn_supervisor(source.clone(), options(2), distributor, shutdown.clone());

    let connected = wait_for_status(&mut status, |s| s.state == SupervisorState::Connected).await;
    assert_eq!(connected.epoch, 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while probe.events().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("events forwarded");
    assert!(probe.events().iter().all(|event| !event.id.contains("2258")));
    assert!(probe.events().iter().all(|event| event.source == URL));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("supervisor stops")
        .expect("join supervisor")
        .expect("clean shutdown");
    assert_eq!(status.borrow().state, SupervisorState::Disconnected);
    assert_eq!(source.sessions_opened(), 1);
    assert_eq!(source.sessions_closed(), 1);
    assert_eq!(probe.shutdown_calls(), 0);
}

#[tokio::test]
async fn keepalive_loss_reconnects_with_new_epoch_and_resets_retries() {
    let source = SimulatedSource::new();
    let (distributor, _probe) = recording_distributor();
    let shutdown = CancellationToken::new();
    let (mut status, task) =
        spawn_supervisor(source.clone(), options(10), distributor, shutdown.clone());

    wait_for_status(&mut status, |s| s.state == SupervisorState::Connected).await;
    source.pause_keepalive(true);

    let reconnected = wait_for_status(&mut status, |s| {
        s.state == SupervisorState::Connected && s.epoch >= 2 && s.retries >= 1
    })
    .await;
    assert!(reconnected.retries <= 10);
    assert!(source.sessions_closed() >= 1);

    source.pause_keepalive(false);
    let recovered = wait_for_status(&mut status, |s| {
        s.state == SupervisorState::Connected && s.retries == 0 && s.epoch >= 2
    })
    .await;
    assert!(recovered.epoch >= reconnected.epoch);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("supervisor stops")
        .expect("join supervisor")
        .expect("clean shutdown");
    assert_eq!(source.sessions_opened(), source.sessions_closed());
}

#[tokio::test]
async fn exhausted_budget_is_terminal_and_shuts_sinks_down() {
    let source = SimulatedSource::new();
    source.set_reachable(false);
    let (distributor, probe) = recording_distributor();
    let shutdown = CancellationToken::new();
    let (status, task) = spawn_supervisor(source.clone(), options(2), distributor, shutdown);

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("supervisor gives up")
        .expect("join supervisor");
    assert!(matches!(
        result,
        Err(SupervisorError::RetryBudgetExhausted {
            retries: 3,
            budget: 2
        })
    ));
    assert_eq!(status.borrow().state, SupervisorState::Terminal);
    assert_eq!(source.discover_calls(), 3);
    assert_eq!(source.sessions_opened(), 0);
    assert_eq!(probe.shutdown_calls(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.discover_calls(), 3);
}

#[tokio::test]
async fn subscription_failure_counts_as_failed_attempt() {
    let source = SimulatedSource::new();
    source.fail_subscriptions(true);
    let (distributor, _probe) = recording_distributor();
    let shutdown = CancellationToken::new();
    let (_status, task) = spawn_supervisor(source.clone(), options(0), distributor, shutdown);

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("supervisor gives up")
        .expect("join supervisor");
    assert!(matches!(
        result,
        Err(SupervisorError::RetryBudgetExhausted { retries: 1, .. })
    ));
    assert_eq!(source.sessions_opened(), 1);
    assert_eq!(source.sessions_closed(), 1);
}

#[tokio::test]
async fn source_outage_recovers_within_budget() {
    let source = SimulatedSource::new();
    let (distributor, probe) = recording_distributor();
    let shutdown = CancellationToken::new();
    let (mut status, task) =
        spawn_supervisor(source.clone(), options(20), distributor, shutdown.clone());

    wait_for_status(&mut status, |s| s.state == SupervisorState::Connected).await;
    source.set_reachable(false);
    wait_for_status(&mut status, |s| s.state == SupervisorState::Reconnecting).await;
    source.set_reachable(true);
    let recovered = wait_for_status(&mut status, |s| {
        s.state == SupervisorState::Connected && s.retries == 0 && s.epoch >= 2
    })
    .await;
    assert!(recovered.epoch >= 2);

    let before = probe.events().len();
    tokio::time::timeout(Duration::from_secs(2), async {
        while probe.events().len() <= before {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("events resume after recovery");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("supervisor stops")
        .expect("join supervisor")
        .expect("clean shutdown");
}

#[tokio::test]
async fn secured_policy_without_certificate_fails_to_connect() {
    let source = SimulatedSource::new();
    let mut options = options(0);
    options.policy = SecurityPolicy::Basic256Sha256;
    options.mode = SecurityMode::Sign;

    let err = connect(&source, &options).await.err().expect("connect error");
    assert!(matches!(
        err,
        ConnectError::MissingCertificate(SecurityPolicy::Basic256Sha256)
    ));
}

#[tokio::test]
async fn unmatched_security_mode_is_reported() {
    let source = SimulatedSource::new();
    let mut options = options(0);
    options.mode = SecurityMode::Sign;

    let err = connect(&source, &options).await.err().expect("connect error");
    assert!(matches!(
        err,
        ConnectError::Source(SourceError::NoMatchingEndpoint { .. })
    ));
}

#[tokio::test]
async fn bad_status_points_do_not_block_healthy_ones() {
    let source = SimulatedSource::new();
    let flaky = NodeId::string(2, "Temperature");
    source.force_status(flaky, StatusCode::BAD_COMMUNICATION_ERROR);
    let (distributor, probe) = recording_distributor();
    let shutdown = CancellationToken::new();
    let (mut status, task) =
        spawn_supervisor(source.clone(), options(1), distributor, shutdown.clone());

    wait_for_status(&mut status, |s| s.state == SupervisorState::Connected).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(probe.events().is_empty());
    let current = *status.borrow();
    assert_eq!(current.epoch, 1, "keepalive kept the epoch alive");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("supervisor stops")
        .expect("join supervisor")
        .expect("clean shutdown");
}

/// Accepts connection attempts and never answers them.
struct StalledSource;

#[async_trait::async_trait]
impl SourceDriver for StalledSource {
    type Session = tel_sim::SimSession;

    async fn discover(
        &self,
        _url: &str,
    ) -> Result<Vec<tel_protocol::EndpointDescription>, SourceError> {
        std::future::pending().await
    }

    async fn open_session(
        &self,
        _url: &str,
        _options: SessionOptions,
    ) -> Result<tel_sim::SimSession, SourceError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn shutdown_interrupts_a_pending_connection_attempt() {
    let (distributor, probe) = recording_distributor();
    let mut options = options(3);
    options.connect_timeout = Duration::from_secs(30);
    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::new(StalledSource, options, distributor);
    let mut status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown.clone()));

    wait_for_status(&mut status, |s| s.state == SupervisorState::Connecting).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_millis(500), task)
        .await
        .expect("supervisor stops while connecting")
        .expect("join supervisor")
        .expect("clean shutdown");
    assert_eq!(status.borrow().state, SupervisorState::Disconnected);
    assert_eq!(status.borrow().epoch, 0);
    assert_eq!(probe.shutdown_calls(), 0);
}
