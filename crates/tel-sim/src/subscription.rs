use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tel_protocol::{
    ChangeHandler, DataChange, MonitorRequest, MonitorSubscription, MonitoringMode, NodeId,
    SourceError, StatusCode, Value,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::state::{ForcedOutcome, SimState};
use crate::values::synthesize;

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

pub struct SimSubscription {
    id: u32,
    state: Arc<SimState>,
    items: Arc<Mutex<Vec<NodeId>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl SimSubscription {
    pub(crate) fn start(
        id: u32,
        state: Arc<SimState>,
        cancel: CancellationToken,
        interval: Duration,
        handler: Arc<dyn ChangeHandler>,
    ) -> Self {
        let items = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(Counters::default());
        tokio::spawn(publish_loop(
            state.clone(),
            items.clone(),
            counters.clone(),
            cancel.clone(),
            interval,
            handler,
        ));
        Self {
            id,
            state,
            items,
            counters,
            cancel,
        }
    }
}

#[async_trait]
impl MonitorSubscription for SimSubscription {
    fn id(&self) -> u32 {
        self.id
    }

    async fn add_item(&self, request: MonitorRequest) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Closed);
        }
        if request.mode != MonitoringMode::Reporting || self.state.is_rejected(&request.node_id) {
            return Err(SourceError::ItemRejected {
                node_id: request.node_id,
                status: StatusCode::BAD_NODE_ID_UNKNOWN,
            });
        }
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.node_id);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), SourceError> {
        self.cancel.cancel();
        Ok(())
    }

    fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::SeqCst)
    }

    fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::SeqCst)
    }
}

async fn publish_loop(
    state: Arc<SimState>,
    items: Arc<Mutex<Vec<NodeId>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    interval: Duration,
    handler: Arc<dyn ChangeHandler>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if !state.is_reachable() {
            counters
                .dropped
                .fetch_add(snapshot.len() as u64, Ordering::SeqCst);
            continue;
        }

        for node_id in snapshot {
            if cancel.is_cancelled() {
                return;
            }
            let Some(change) = next_change(&state, &node_id, tick) else {
                continue;
            };
            trace!(node = %node_id, "simulated notification");
            handler.on_change(change).await;
            counters.delivered.fetch_add(1, Ordering::SeqCst);
        }
        tick = tick.wrapping_add(1);
    }
}

fn next_change(state: &SimState, node_id: &NodeId, tick: u64) -> Option<DataChange> {
    let now = SystemTime::now();
    if node_id.is_keepalive() {
        if state.keepalive_paused.load(Ordering::SeqCst) {
            return None;
        }
        return Some(DataChange::good(node_id.clone(), Value::DateTime(now), now));
    }

    let mut change = DataChange::good(node_id.clone(), synthesize(node_id, tick), now);
    match state.forced_outcome(node_id) {
        Some(ForcedOutcome::Status(status)) => change.status = status,
        Some(ForcedOutcome::Error(message)) => change.error = Some(message),
        None => {}
    }
    Some(change)
}
