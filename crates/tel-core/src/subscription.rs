use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tel_protocol::{
    ChangeHandler, DataChange, Event, MonitorRequest, MonitorSubscription, NodeId, NodeMonitor,
    Session, SourceError, SubscriptionParameters, KEEPALIVE_NODE_ID,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ConnectionEpoch, Distributor};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("failed to create node monitor: {0}")]
    Monitor(#[source] SourceError),
    #[error("failed to create subscription: {0}")]
    Subscribe(#[source] SourceError),
    #[error("failed to monitor keepalive node: {0}")]
    Keepalive(#[source] SourceError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub node_ids: Vec<NodeId>,
    pub interval: Duration,
}

/// Monitors the configured points for one epoch. Cancelling the epoch ends
/// the subscription.
pub struct SubscriptionManager {
    subscription_id: u32,
    task: JoinHandle<()>,
}

impl SubscriptionManager {
    pub async fn start<S: Session>(
        session: &S,
        epoch: Arc<ConnectionEpoch>,
        spec: &SubscriptionSpec,
        distributor: Arc<Distributor>,
    ) -> Result<Self, SubscriptionError> {
        let monitor = session.monitor().await.map_err(SubscriptionError::Monitor)?;
        let handler = Arc::new(EpochChangeHandler {
            epoch: epoch.clone(),
            distributor,
        });
        let subscription = monitor
            .subscribe(
                SubscriptionParameters {
                    interval: spec.interval,
                },
                handler,
            )
            .await
            .map_err(SubscriptionError::Subscribe)?;
        let subscription_id = subscription.id();

        let mut registered = 0;
        for node_id in &spec.node_ids {
            match subscription
                .add_item(MonitorRequest::reporting(node_id.clone()))
                .await
            {
                Ok(()) => registered += 1,
                Err(err) => {
                    warn!(node = %node_id, subscription = subscription_id, error = %err, "monitored item registration failed, skipping");
                }
            }
        }

        if let Err(err) = subscription
            .add_item(MonitorRequest::reporting(KEEPALIVE_NODE_ID))
            .await
        {
            if let Err(unsub_err) = subscription.unsubscribe().await {
                warn!(subscription = subscription_id, error = %unsub_err, "unsubscribe after failed setup failed");
            }
            return Err(SubscriptionError::Keepalive(err));
        }

        epoch.register_subscription(subscription_id, registered + 1);
        info!(
            epoch = epoch.generation(),
            subscription = subscription_id,
            items = registered,
            requested = spec.node_ids.len(),
            interval_ms = spec.interval.as_millis() as u64,
            "subscription started"
        );

        let task = tokio::spawn(hold_until_cancelled(monitor, subscription, epoch));
        Ok(Self {
            subscription_id,
            task,
        })
    }

    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    /// Waits for the subscription to be released. The owning epoch must be
    /// cancelled first.
    pub async fn stop(self) {
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                warn!(subscription = self.subscription_id, error = %err, "subscription task join failed");
            }
        }
    }
}

async fn hold_until_cancelled<M: NodeMonitor>(
    monitor: M,
    subscription: M::Subscription,
    epoch: Arc<ConnectionEpoch>,
) {
    epoch.cancel_token().cancelled().await;

    let id = subscription.id();
    if let Err(err) = subscription.unsubscribe().await {
        warn!(subscription = id, error = %err, "unsubscribe failed");
    }
    info!(
        epoch = epoch.generation(),
        subscription = id,
        delivered = subscription.delivered(),
        dropped = subscription.dropped(),
        "subscription terminated"
    );
    epoch.release_subscription(id);
    drop(monitor);
}

struct EpochChangeHandler {
    epoch: Arc<ConnectionEpoch>,
    distributor: Arc<Distributor>,
}

#[async_trait]
impl ChangeHandler for EpochChangeHandler {
    async fn on_change(&self, change: DataChange) {
        if self.epoch.is_cancelled() {
            debug!(node = %change.node_id, epoch = self.epoch.generation(), "notification for a closed epoch, dropping");
            return;
        }
        if let Some(err) = &change.error {
            warn!(node = %change.node_id, error = %err, "notification carried an error, dropping");
            return;
        }
        if !change.status.is_good() {
            warn!(node = %change.node_id, status = %change.status, "notification has bad status, dropping");
            return;
        }
        if change.node_id.is_keepalive() {
            self.epoch.record_keepalive();
            return;
        }
        self.distributor.publish(Event::from_change(change)).await;
    }
}

#[cfg(test)]
mod tests;
