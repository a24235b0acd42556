use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    DataChange, EndpointDescription, NodeId, SecurityMode, SecurityPolicy, SessionOptions,
    StatusCode,
};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("endpoint discovery failed for {url}: {reason}")]
    Discovery { url: String, reason: String },
    #[error("no endpoints found for {0}")]
    NoEndpoints(String),
    #[error("no endpoint matches policy {policy} and mode {mode}")]
    NoMatchingEndpoint {
        policy: SecurityPolicy,
        mode: SecurityMode,
    },
    #[error("session failed: {0}")]
    Session(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("monitored item {node_id} rejected: {status}")]
    ItemRejected { node_id: NodeId, status: StatusCode },
    #[error("session closed")]
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionParameters {
    pub interval: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitoringMode {
    Disabled,
    Sampling,
    Reporting,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorRequest {
    pub node_id: NodeId,
    pub mode: MonitoringMode,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

impl MonitorRequest {
    /// Reporting item holding only the latest value.
    pub fn reporting(node_id: NodeId) -> Self {
        Self {
            node_id,
            mode: MonitoringMode::Reporting,
            queue_size: 1,
            discard_oldest: true,
        }
    }
}

/// Receives notifications for a subscription. Delivery awaits the handler,
/// so a slow handler applies backpressure to the subscription.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_change(&self, change: DataChange);
}

#[async_trait]
pub trait SourceDriver: Send + Sync + 'static {
    type Session: Session;

    async fn discover(&self, url: &str) -> Result<Vec<EndpointDescription>, SourceError>;

    async fn open_session(
        &self,
        url: &str,
        options: SessionOptions,
    ) -> Result<Self::Session, SourceError>;
}

#[async_trait]
pub trait Session: Send + Sync + 'static {
    type Monitor: NodeMonitor;

    async fn monitor(&self) -> Result<Self::Monitor, SourceError>;

    async fn close(&self) -> Result<(), SourceError>;
}

#[async_trait]
pub trait NodeMonitor: Send + Sync + 'static {
    type Subscription: MonitorSubscription;

    async fn subscribe(
        &self,
        params: SubscriptionParameters,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<Self::Subscription, SourceError>;
}

#[async_trait]
pub trait MonitorSubscription: Send + Sync + 'static {
    fn id(&self) -> u32;

    async fn add_item(&self, request: MonitorRequest) -> Result<(), SourceError>;

    async fn unsubscribe(&self) -> Result<(), SourceError>;

    fn delivered(&self) -> u64;

    fn dropped(&self) -> u64;
}
