use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SubscriptionRecord {
    items: usize,
}

/// State of one connected session. Shared by the supervisor and the
/// notification handler of the subscription created for it; discarded on
/// reconnect.
#[derive(Debug)]
pub struct ConnectionEpoch {
    generation: u64,
    started_at: Instant,
    last_keepalive: Mutex<Instant>,
    keepalive_seen: AtomicBool,
    subscriptions: Mutex<HashMap<u32, SubscriptionRecord>>,
    cancel: CancellationToken,
}

impl ConnectionEpoch {
    pub fn new(generation: u64, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            generation,
            started_at: now,
            last_keepalive: Mutex::new(now),
            keepalive_seen: AtomicBool::new(false),
            subscriptions: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn record_keepalive(&self) {
        *self
            .last_keepalive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
        self.keepalive_seen.store(true, Ordering::SeqCst);
    }

    /// Time since the last keepalive, or since the epoch started if none
    /// arrived yet.
    pub fn since_keepalive(&self) -> Duration {
        self.last_keepalive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
    }

    pub fn keepalive_seen(&self) -> bool {
        self.keepalive_seen.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self, keepalive_timeout: Duration) -> bool {
        !self.is_cancelled() && self.since_keepalive() <= keepalive_timeout
    }

    pub fn register_subscription(&self, id: u32, items: usize) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, SubscriptionRecord { items });
    }

    /// Returns false when `id` was not registered.
    pub fn release_subscription(&self, id: u32) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn active_subscriptions(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn monitored_items(&self, id: u32) -> Option<usize> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .map(|record| record.items)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
