use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) type ClientId = u64;

pub(crate) const OUTBOUND_QUEUE: usize = 64;

struct ClientEntry {
    addr: SocketAddr,
    joined_at: Instant,
    authenticated: bool,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

/// Live clients. Publishing takes the shared lock; join, authentication and
/// removal take the exclusive one.
#[derive(Default)]
pub(crate) struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    next_id: AtomicU64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub(crate) attempted: usize,
    pub(crate) failed: usize,
}

impl ClientRegistry {
    pub(crate) fn join(
        &self,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) -> (ClientId, mpsc::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE);
        self.clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                id,
                ClientEntry {
                    addr,
                    joined_at: Instant::now(),
                    authenticated: false,
                    outbound,
                    cancel,
                },
            );
        info!(client = id, %addr, "client joined");
        (id, rx)
    }

    /// Marks the client authenticated. Returns false if it is gone.
    pub(crate) fn authenticate(&self, id: ClientId) -> bool {
        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(entry) = clients.get_mut(&id) else {
            return false;
        };
        if !entry.authenticated {
            entry.authenticated = true;
            info!(client = id, addr = %entry.addr, "client authenticated");
        }
        true
    }

    /// Removes a client and sends it a close frame. Removing an unknown id
    /// does nothing.
    pub(crate) fn remove(&self, id: ClientId, reason: &str) -> bool {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        let Some(entry) = removed else {
            return false;
        };
        let frame = CloseFrame {
            code: if reason == "shutdown" {
                CloseCode::Away
            } else {
                CloseCode::Policy
            },
            reason: reason.to_string().into(),
        };
        if entry.outbound.try_send(Message::Close(Some(frame))).is_err() {
            debug!(client = id, "close frame not queued");
        }
        entry.cancel.cancel();
        info!(client = id, addr = %entry.addr, %reason, "client removed");
        true
    }

    pub(crate) fn remove_all(&self, reason: &str) -> usize {
        let ids: Vec<ClientId> = self
            .clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect();
        ids.into_iter().filter(|id| self.remove(*id, reason)).count()
    }

    /// Clients still unauthenticated after `grace`.
    pub(crate) fn expired(&self, grace: Duration) -> Vec<ClientId> {
        let now = Instant::now();
        self.clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(_, entry)| {
                !entry.authenticated && now.duration_since(entry.joined_at) > grace
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Queues `text` for every authenticated client.
    pub(crate) fn broadcast(&self, text: &str) -> Delivery {
        let clients = self
            .clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut delivery = Delivery::default();
        for (id, entry) in clients.iter().filter(|(_, entry)| entry.authenticated) {
            delivery.attempted += 1;
            match entry.outbound.try_send(Message::Text(text.to_string().into())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    delivery.failed += 1;
                    debug!(client = *id, addr = %entry.addr, "client queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    delivery.failed += 1;
                    debug!(client = *id, addr = %entry.addr, "client writer gone");
                }
            }
        }
        delivery
    }

    pub(crate) fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub(crate) fn authenticated_len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|entry| entry.authenticated)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().expect("addr")
    }

    #[test]
    fn removing_absent_client_is_noop() {
        let registry = ClientRegistry::default();
        assert!(!registry.remove(42, "gone"));

        let (id, _rx) = registry.join(addr(), CancellationToken::new());
        assert!(registry.remove(id, "test"));
        assert!(!registry.remove(id, "test"));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn removal_queues_close_frame_and_cancels() {
        let registry = ClientRegistry::default();
        let cancel = CancellationToken::new();
        let (id, mut rx) = registry.join(addr(), cancel.clone());

        registry.remove(id, "authentication failed");
        assert!(cancel.is_cancelled());
        match rx.try_recv().expect("close frame") {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Policy);
                assert_eq!(frame.reason.as_str(), "authentication failed");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn broadcast_reaches_only_authenticated_clients() {
        let registry = ClientRegistry::default();
        let (pending, mut pending_rx) = registry.join(addr(), CancellationToken::new());
        let (trusted, mut trusted_rx) = registry.join(addr(), CancellationToken::new());
        assert!(registry.authenticate(trusted));
        assert!(registry.authenticate(trusted));
        assert!(!registry.authenticate(999));

        let delivery = registry.broadcast("{\"value\":1}");
        assert_eq!(
            delivery,
            Delivery {
                attempted: 1,
                failed: 0
            }
        );
        assert!(matches!(trusted_rx.try_recv(), Ok(Message::Text(_))));
        assert!(pending_rx.try_recv().is_err());
        assert_eq!(registry.authenticated_len(), 1);
        assert_eq!(registry.len(), 2);
        let _ = pending;
    }

    #[test]
    fn full_queue_counts_as_failure() {
        let registry = ClientRegistry::default();
        let (id, _rx) = registry.join(addr(), CancellationToken::new());
        registry.authenticate(id);
        for _ in 0..OUTBOUND_QUEUE {
            registry.broadcast("x");
        }
        let delivery = registry.broadcast("x");
        assert_eq!(delivery.failed, 1);
    }

    #[tokio::test]
    async fn expired_lists_only_unauthenticated_clients_past_grace() {
        let registry = ClientRegistry::default();
        let (slow, _slow_rx) = registry.join(addr(), CancellationToken::new());
        let (fast, _fast_rx) = registry.join(addr(), CancellationToken::new());
        registry.authenticate(fast);

        assert!(registry.expired(Duration::from_millis(30)).is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.expired(Duration::from_millis(30)), vec![slow]);
    }
}
