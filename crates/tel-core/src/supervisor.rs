use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tel_protocol::{
    select_endpoint, ApplicationCertificate, SecurityMode, SecurityPolicy, Session,
    SessionOptions, SourceDriver, SourceError, UserIdentity,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    ensure_key_pair, CertificateError, ConnectionEpoch, Distributor, SubscriptionError,
    SubscriptionManager, SubscriptionSpec,
};

const POLL_FACTOR: u32 = 3;
const KEEPALIVE_FACTOR: u32 = 6;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("security policy {0} needs an application certificate")]
    MissingCertificate(SecurityPolicy),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error("certificate task failed: {0}")]
    CertificateTask(String),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("retry budget exhausted after {retries} failed attempts (budget {budget})")]
    RetryBudgetExhausted { retries: u32, budget: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
    Terminal,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub epoch: u64,
    pub retries: u32,
}

#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    pub url: String,
    pub policy: SecurityPolicy,
    pub mode: SecurityMode,
    pub identity: UserIdentity,
    pub certificate: Option<ApplicationCertificate>,
    pub auto_create_certificate: bool,
    pub application_name: String,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub retry_budget: u32,
    pub subscription: SubscriptionSpec,
}

impl SupervisorOptions {
    pub fn new(url: impl Into<String>, subscription: SubscriptionSpec) -> Self {
        Self {
            url: url.into(),
            policy: SecurityPolicy::None,
            mode: SecurityMode::None,
            identity: UserIdentity::Anonymous,
            certificate: None,
            auto_create_certificate: false,
            application_name: "telegate".to_string(),
            reconnect_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            retry_budget: 5,
            subscription,
        }
    }

    /// Health check cadence.
    pub fn poll_interval(&self) -> Duration {
        self.subscription.interval.saturating_mul(POLL_FACTOR)
    }

    /// Maximum keepalive silence before the epoch counts as lost.
    pub fn keepalive_timeout(&self) -> Duration {
        self.subscription.interval.saturating_mul(KEEPALIVE_FACTOR)
    }
}

/// Discovers endpoints, picks the configured one and opens a session.
pub async fn connect<D: SourceDriver>(
    driver: &D,
    options: &SupervisorOptions,
) -> Result<D::Session, ConnectError> {
    let endpoints = tokio::time::timeout(options.connect_timeout, driver.discover(&options.url))
        .await
        .map_err(|_| ConnectError::Timeout(options.connect_timeout))??;
    if endpoints.is_empty() {
        return Err(SourceError::NoEndpoints(options.url.clone()).into());
    }
    let endpoint = select_endpoint(&endpoints, options.policy, options.mode)
        .cloned()
        .ok_or(SourceError::NoMatchingEndpoint {
            policy: options.policy,
            mode: options.mode,
        })?;

    let certificate = if options.policy.requires_certificate() {
        let Some(certificate) = options.certificate.clone() else {
            return Err(ConnectError::MissingCertificate(options.policy));
        };
        if options.auto_create_certificate {
            let paths = certificate.clone();
            let application_name = options.application_name.clone();
            tokio::task::spawn_blocking(move || ensure_key_pair(&paths, &application_name))
                .await
                .map_err(|err| ConnectError::CertificateTask(err.to_string()))??;
        }
        Some(certificate)
    } else {
        None
    };

    let session_options = SessionOptions {
        application_name: options.application_name.clone(),
        auto_reconnect: true,
        reconnect_interval: options.reconnect_interval,
        endpoint,
        identity: options.identity.clone(),
        certificate,
    };
    let session = tokio::time::timeout(
        options.connect_timeout,
        driver.open_session(&options.url, session_options),
    )
    .await
    .map_err(|_| ConnectError::Timeout(options.connect_timeout))??;
    Ok(session)
}

struct ActiveEpoch<S> {
    session: S,
    epoch: Arc<ConnectionEpoch>,
    manager: SubscriptionManager,
}

impl<S: Session> ActiveEpoch<S> {
    async fn teardown(self) {
        let generation = self.epoch.generation();
        self.epoch.cancel();
        self.manager.stop().await;
        if let Err(err) = self.session.close().await {
            warn!(epoch = generation, error = %err, "session close failed");
        }
    }
}

/// Owns the source session and keeps it alive within a bounded retry
/// budget.
pub struct Supervisor<D: SourceDriver> {
    driver: D,
    options: SupervisorOptions,
    distributor: Arc<Distributor>,
    status_tx: watch::Sender<SupervisorStatus>,
    generation: u64,
}

impl<D: SourceDriver> Supervisor<D> {
    pub fn new(driver: D, options: SupervisorOptions, distributor: Arc<Distributor>) -> Self {
        let (status_tx, _) = watch::channel(SupervisorStatus {
            state: SupervisorState::Disconnected,
            epoch: 0,
            retries: 0,
        });
        Self {
            driver,
            options,
            distributor,
            status_tx,
            generation: 0,
        }
    }

    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    /// Runs until `shutdown` fires or the retry budget is exhausted. In the
    /// second case the distributor is shut down before returning.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        let poll = self.options.poll_interval();
        let keepalive_timeout = self.options.keepalive_timeout();
        let budget = self.options.retry_budget;
        let mut retries: u32 = 0;

        self.transition(SupervisorState::Connecting, retries);
        let Some(mut active) = self.establish_unless_stopped(&shutdown).await else {
            self.stopped(retries);
            return Ok(());
        };
        if active.is_some() {
            self.transition(SupervisorState::Connected, retries);
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Some(current) = active.take() {
                        current.teardown().await;
                    }
                    self.stopped(retries);
                    return Ok(());
                }
                _ = tokio::time::sleep(poll) => {}
            }

            let healthy = active
                .as_ref()
                .is_some_and(|current| current.epoch.is_healthy(keepalive_timeout));
            if healthy {
                let recovered = active
                    .as_ref()
                    .is_some_and(|current| current.epoch.keepalive_seen());
                if recovered && retries > 0 {
                    info!(url = %self.options.url, retries, "connection recovered, retry counter reset");
                    retries = 0;
                    self.transition(SupervisorState::Connected, retries);
                }
                continue;
            }

            retries = retries.saturating_add(1);
            if let Some(current) = active.take() {
                warn!(
                    url = %self.options.url,
                    epoch = current.epoch.generation(),
                    silent_ms = current.epoch.since_keepalive().as_millis() as u64,
                    attempt = retries,
                    "keepalive lost"
                );
                self.transition(SupervisorState::Degraded, retries);
                current.teardown().await;
            }

            if retries > budget {
                self.transition(SupervisorState::Terminal, retries);
                self.distributor.shutdown().await;
                return Err(SupervisorError::RetryBudgetExhausted { retries, budget });
            }

            self.transition(SupervisorState::Reconnecting, retries);
            active = match self.establish_unless_stopped(&shutdown).await {
                Some(attempt) => attempt,
                None => {
                    self.stopped(retries);
                    return Ok(());
                }
            };
            if active.is_some() {
                self.transition(SupervisorState::Connected, retries);
            }
        }
    }

    /// `None` when shutdown fired before the attempt finished. A session
    /// opened by the abandoned attempt is dropped with it.
    async fn establish_unless_stopped(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Option<Option<ActiveEpoch<D::Session>>> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            attempt = self.establish(shutdown) => Some(attempt),
        }
    }

    fn stopped(&self, retries: u32) {
        self.transition(SupervisorState::Disconnected, retries);
        info!(url = %self.options.url, "supervisor stopped");
    }

    async fn establish(&mut self, shutdown: &CancellationToken) -> Option<ActiveEpoch<D::Session>> {
        let session = match connect(&self.driver, &self.options).await {
            Ok(session) => session,
            Err(err) => {
                warn!(url = %self.options.url, error = %err, "connection attempt failed");
                return None;
            }
        };

        self.generation = self.generation.wrapping_add(1);
        let epoch = Arc::new(ConnectionEpoch::new(
            self.generation,
            shutdown.child_token(),
        ));
        match SubscriptionManager::start(
            &session,
            epoch.clone(),
            &self.options.subscription,
            self.distributor.clone(),
        )
        .await
        {
            Ok(manager) => Some(ActiveEpoch {
                session,
                epoch,
                manager,
            }),
            Err(err) => {
                warn!(url = %self.options.url, epoch = self.generation, error = %err, "subscription setup failed");
                epoch.cancel();
                if let Err(close_err) = session.close().await {
                    warn!(epoch = self.generation, error = %close_err, "session close failed");
                }
                None
            }
        }
    }

    fn transition(&self, state: SupervisorState, retries: u32) {
        let epoch = self.generation;
        let previous = self.status_tx.send_replace(SupervisorStatus {
            state,
            epoch,
            retries,
        });
        if previous.state != state {
            info!(
                url = %self.options.url,
                from = %previous.state,
                to = %state,
                epoch,
                retries,
                "supervisor state changed"
            );
        }
    }
}

#[cfg(test)]
mod tests;
