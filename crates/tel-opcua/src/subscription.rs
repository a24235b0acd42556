use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::client::{DataChangeCallback, MonitoredItem, Session as UaSession};
use opcua::types as ua;
use tel_protocol::{
    ChangeHandler, DataChange, MonitorRequest, MonitorSubscription, SourceError, StatusCode,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::convert::{data_change_from_ua, monitored_item_request};

/// Notifications buffered between the stack's callback and the handler.
pub(crate) const NOTIFICATION_BUFFER: usize = 256;
const LIFETIME_COUNT: u32 = 60;
const MAX_KEEPALIVE_COUNT: u32 = 10;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

pub struct OpcUaSubscription {
    id: u32,
    session: Arc<UaSession>,
    interval: Duration,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl OpcUaSubscription {
    pub(crate) async fn create(
        session: Arc<UaSession>,
        cancel: CancellationToken,
        interval: Duration,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<Self, SourceError> {
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let callback_counters = counters.clone();
        let callback = DataChangeCallback::new(move |value: ua::DataValue, item: &MonitoredItem| {
            enqueue(
                &tx,
                &callback_counters,
                data_change_from_ua(&item.item_to_monitor().node_id, &value),
            );
        });

        let id = session
            .create_subscription(
                interval,
                LIFETIME_COUNT,
                MAX_KEEPALIVE_COUNT,
                0,
                0,
                true,
                callback,
            )
            .await
            .map_err(|status| SourceError::Subscription(format!("create subscription: {status}")))?;
        debug!(subscription = id, ?interval, "opc ua subscription created");

        tokio::spawn(forward(rx, handler, counters.clone(), cancel.clone()));
        Ok(Self {
            id,
            session,
            interval,
            counters,
            cancel,
        })
    }
}

/// Called from the stack's callback, which must not block.
pub(crate) fn enqueue(
    tx: &mpsc::Sender<DataChange>,
    counters: &Counters,
    change: Option<DataChange>,
) {
    let Some(change) = change else {
        counters.dropped.fetch_add(1, Ordering::SeqCst);
        return;
    };
    if tx.try_send(change).is_err() {
        counters.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) async fn forward(
    mut rx: mpsc::Receiver<DataChange>,
    handler: Arc<dyn ChangeHandler>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = rx.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };
        trace!(node = %change.node_id, "opc ua notification");
        handler.on_change(change).await;
        counters.delivered.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MonitorSubscription for OpcUaSubscription {
    fn id(&self) -> u32 {
        self.id
    }

    async fn add_item(&self, request: MonitorRequest) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Closed);
        }
        let item = monitored_item_request(&request, self.interval)?;
        let created = self
            .session
            .create_monitored_items(self.id, ua::TimestampsToReturn::Both, vec![item])
            .await
            .map_err(|status| {
                SourceError::Subscription(format!(
                    "create monitored item {}: {status}",
                    request.node_id
                ))
            })?;
        let status = created
            .first()
            .map(|item| item.status_code)
            .unwrap_or(ua::StatusCode::BadUnexpectedError);
        if !status.is_good() {
            return Err(SourceError::ItemRejected {
                node_id: request.node_id,
                status: StatusCode(status.bits()),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        self.session
            .delete_subscription(self.id)
            .await
            .map(|_| ())
            .map_err(|status| SourceError::Subscription(format!("delete subscription: {status}")))
    }

    fn delivered(&self) -> u64 {
        self.counters.delivered()
    }

    fn dropped(&self) -> u64 {
        self.counters.dropped()
    }
}
