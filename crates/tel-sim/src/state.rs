use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use tel_protocol::{NodeId, StatusCode};

#[derive(Clone, Debug)]
pub(crate) enum ForcedOutcome {
    Status(StatusCode),
    Error(String),
}

/// Knobs shared by every session handed out by one source.
#[derive(Debug)]
pub(crate) struct SimState {
    pub(crate) reachable: AtomicBool,
    pub(crate) keepalive_paused: AtomicBool,
    pub(crate) fail_subscribe: AtomicBool,
    pub(crate) fail_monitor: AtomicBool,
    pub(crate) rejected_items: Mutex<HashSet<NodeId>>,
    pub(crate) forced: Mutex<HashMap<NodeId, ForcedOutcome>>,
    pub(crate) next_subscription_id: AtomicU32,
    pub(crate) sessions_opened: AtomicU64,
    pub(crate) sessions_closed: AtomicU64,
    pub(crate) discover_calls: AtomicU64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            keepalive_paused: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_monitor: AtomicBool::new(false),
            rejected_items: Mutex::new(HashSet::new()),
            forced: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU32::new(1),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            discover_calls: AtomicU64::new(0),
        }
    }
}

impl SimState {
    pub(crate) fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    pub(crate) fn is_rejected(&self, node_id: &NodeId) -> bool {
        self.rejected_items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(node_id)
    }

    pub(crate) fn forced_outcome(&self, node_id: &NodeId) -> Option<ForcedOutcome> {
        self.forced
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(node_id)
            .cloned()
    }
}
