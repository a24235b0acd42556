use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tel_protocol::{
    ChangeHandler, EndpointDescription, NodeId, NodeMonitor, SecurityMode, SecurityPolicy,
    Session, SessionOptions, SourceDriver, SourceError, StatusCode, SubscriptionParameters,
    UserIdentity,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::state::{ForcedOutcome, SimState};
use crate::subscription::SimSubscription;

#[derive(Clone, Debug, Default)]
pub struct SimulatedSource {
    state: Arc<SimState>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unreachable sources refuse discovery and sessions, and live sessions
    /// stop publishing until the source comes back.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn pause_keepalive(&self, paused: bool) {
        self.state.keepalive_paused.store(paused, Ordering::SeqCst);
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.state.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_monitors(&self, fail: bool) {
        self.state.fail_monitor.store(fail, Ordering::SeqCst);
    }

    pub fn reject_item(&self, node_id: NodeId) {
        self.state
            .rejected_items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(node_id);
    }

    pub fn force_status(&self, node_id: NodeId, status: StatusCode) {
        self.state
            .forced
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(node_id, ForcedOutcome::Status(status));
    }

    pub fn force_error(&self, node_id: NodeId, message: impl Into<String>) {
        self.state
            .forced
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(node_id, ForcedOutcome::Error(message.into()));
    }

    pub fn clear_forced(&self, node_id: &NodeId) {
        self.state
            .forced
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(node_id);
    }

    pub fn sessions_opened(&self) -> u64 {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> u64 {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> u64 {
        self.state.discover_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceDriver for SimulatedSource {
    type Session = SimSession;

    async fn discover(&self, url: &str) -> Result<Vec<EndpointDescription>, SourceError> {
        self.state.discover_calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.is_reachable() {
            return Err(SourceError::Discovery {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(vec![
            EndpointDescription::new(url, SecurityPolicy::None, SecurityMode::None, 0),
            EndpointDescription::new(url, SecurityPolicy::Basic256Sha256, SecurityMode::Sign, 2),
            EndpointDescription::new(
                url,
                SecurityPolicy::Basic256Sha256,
                SecurityMode::SignAndEncrypt,
                3,
            ),
        ])
    }

    async fn open_session(
        &self,
        url: &str,
        options: SessionOptions,
    ) -> Result<SimSession, SourceError> {
        if !self.state.is_reachable() {
            return Err(SourceError::Session(format!("{url} is unreachable")));
        }
        let token = options.identity.token_type();
        if !options.endpoint.accepts(token) {
            return Err(SourceError::Session(format!(
                "endpoint does not accept {token:?} tokens"
            )));
        }
        if options.endpoint.security_policy.requires_certificate() && options.certificate.is_none()
        {
            return Err(SourceError::Session(
                "secure channel requires an application certificate".to_string(),
            ));
        }
        if let UserIdentity::UserName { username, .. } = &options.identity {
            if username.is_empty() {
                return Err(SourceError::Session("empty user name".to_string()));
            }
        }

        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        debug!(
            %url,
            application = %options.application_name,
            policy = %options.endpoint.security_policy,
            "simulated session opened"
        );
        Ok(SimSession {
            state: self.state.clone(),
            cancel: CancellationToken::new(),
        })
    }
}

#[derive(Debug)]
pub struct SimSession {
    state: Arc<SimState>,
    cancel: CancellationToken,
}

#[async_trait]
impl Session for SimSession {
    type Monitor = SimMonitor;

    async fn monitor(&self) -> Result<SimMonitor, SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Closed);
        }
        if self.state.fail_monitor.load(Ordering::SeqCst) {
            return Err(SourceError::Subscription(
                "monitor creation refused".to_string(),
            ));
        }
        Ok(SimMonitor {
            state: self.state.clone(),
            session: self.cancel.clone(),
        })
    }

    async fn close(&self) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimMonitor {
    state: Arc<SimState>,
    session: CancellationToken,
}

#[async_trait]
impl NodeMonitor for SimMonitor {
    type Subscription = SimSubscription;

    async fn subscribe(
        &self,
        params: SubscriptionParameters,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<SimSubscription, SourceError> {
        if self.session.is_cancelled() {
            return Err(SourceError::Closed);
        }
        if self.state.fail_subscribe.load(Ordering::SeqCst) {
            return Err(SourceError::Subscription(
                "subscription creation refused".to_string(),
            ));
        }
        let id = self.state.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        Ok(SimSubscription::start(
            id,
            self.state.clone(),
            self.session.child_token(),
            params.interval,
            handler,
        ))
    }
}
