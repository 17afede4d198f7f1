use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use circle_types::events::Envelope;

pub type ConnId = Uuid;

/// Process-wide registry of live WebSocket connections, keyed by user.
///
/// Each connection is represented by the sending half of an unbounded
/// channel; the connection loop owns the receiving half and the socket.
/// Dropping the sender (via `unregister`) ends that loop and closes the
/// socket.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    registry: RwLock<Registry>,
}

#[derive(Default)]
struct Registry {
    conns: HashMap<ConnId, (i64, mpsc::UnboundedSender<Utf8Bytes>)>,
    by_user: HashMap<i64, HashSet<ConnId>>,
}

impl Registry {
    fn remove(&mut self, conn_id: ConnId) -> bool {
        let Some((user_id, _)) = self.conns.remove(&conn_id) else {
            return false;
        };
        if let Some(set) = self.by_user.get_mut(&user_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        true
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection for an already-authenticated user.
    pub async fn register(&self, user_id: i64) -> (ConnId, mpsc::UnboundedReceiver<Utf8Bytes>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut reg = self.inner.registry.write().await;
        reg.conns.insert(conn_id, (user_id, tx));
        reg.by_user.entry(user_id).or_default().insert(conn_id);
        debug!("Registered connection {} for user {}", conn_id, user_id);

        (conn_id, rx)
    }

    /// Remove a connection. Safe to call more than once.
    pub async fn unregister(&self, conn_id: ConnId) -> bool {
        let removed = self.inner.registry.write().await.remove(conn_id);
        if removed {
            debug!("Unregistered connection {}", conn_id);
        }
        removed
    }

    /// Serialize `envelope` once and queue it on every connection of every
    /// target user. Connections whose channel is closed are removed; the
    /// others still receive the message. Returns the number of connections
    /// the message was queued on.
    pub async fn send_to_users<I>(&self, targets: I, envelope: &Envelope) -> usize
    where
        I: IntoIterator<Item = i64>,
    {
        let Some(text) = encode(envelope) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let reg = self.inner.registry.read().await;
            let mut seen = HashSet::new();
            for user_id in targets {
                if !seen.insert(user_id) {
                    continue;
                }
                let Some(conn_ids) = reg.by_user.get(&user_id) else {
                    continue;
                };
                for conn_id in conn_ids {
                    if let Some((_, tx)) = reg.conns.get(conn_id) {
                        if tx.send(text.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            dead.push(*conn_id);
                        }
                    }
                }
            }
        }

        self.prune(dead).await;
        delivered
    }

    /// Queue `envelope` on every registered connection.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let users = self.online_users().await;
        self.send_to_users(users, envelope).await
    }

    /// Queue `envelope` on a single connection.
    pub async fn send_to_connection(&self, conn_id: ConnId, envelope: &Envelope) -> bool {
        let Some(text) = encode(envelope) else {
            return false;
        };

        let ok = {
            let reg = self.inner.registry.read().await;
            match reg.conns.get(&conn_id) {
                Some((_, tx)) => tx.send(text).is_ok(),
                None => return false,
            }
        };
        if !ok {
            self.prune(vec![conn_id]).await;
        }
        ok
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.inner.registry.read().await.by_user.contains_key(&user_id)
    }

    /// Users with at least one live connection at the time of the call.
    pub async fn online_users(&self) -> HashSet<i64> {
        self.inner.registry.read().await.by_user.keys().copied().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.conns.len()
    }

    async fn prune(&self, dead: Vec<ConnId>) {
        if dead.is_empty() {
            return;
        }
        let mut reg = self.inner.registry.write().await;
        for conn_id in dead {
            if reg.remove(conn_id) {
                warn!("Dropped connection {} after failed delivery", conn_id);
            }
        }
    }
}

fn encode(envelope: &Envelope) -> Option<Utf8Bytes> {
    match serde_json::to_string(envelope) {
        Ok(text) => Some(Utf8Bytes::from(text)),
        Err(e) => {
            error!("Failed to serialize gateway envelope: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circle_types::events::GatewayEvent;

    fn pong() -> Envelope {
        Envelope::new(GatewayEvent::Pong)
    }

    #[tokio::test]
    async fn delivers_to_every_connection_of_a_user() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.register(1).await;
        let (_b, mut rx_b) = hub.register(1).await;
        let (_c, mut rx_c) = hub.register(2).await;

        assert_eq!(hub.send_to_users([1], &pong()).await, 2);
        assert_eq!(rx_a.recv().await.unwrap().as_str(), r#"{"type":"pong"}"#);
        assert!(rx_b.recv().await.is_some());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_connection_does_not_block_peers() {
        let hub = Hub::new();
        let (dead, rx_dead) = hub.register(1).await;
        let (_live, mut rx_live) = hub.register(2).await;
        drop(rx_dead);

        assert_eq!(hub.send_to_users([1, 2], &pong()).await, 1);
        assert!(rx_live.recv().await.is_some());

        // The dead connection was pruned during delivery.
        assert!(!hub.unregister(dead).await);
        assert!(!hub.is_online(1).await);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_targets_receive_once() {
        let hub = Hub::new();
        let (_id, mut rx) = hub.register(7).await;

        assert_eq!(hub.send_to_users([7, 7, 7], &pong()).await, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn preserves_call_order_per_connection() {
        let hub = Hub::new();
        let (_id, mut rx) = hub.register(3).await;

        for i in 0..10 {
            let env = Envelope::new(GatewayEvent::Ready {
                user_id: i,
                username: String::new(),
            });
            hub.send_to_users([3], &env).await;
        }
        for i in 0..10 {
            let text = rx.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["data"]["user_id"], i);
        }
    }

    #[tokio::test]
    async fn online_users_tracks_live_connections() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.register(5).await;
        let (_b, _rx_b) = hub.register(6).await;
        assert_eq!(hub.online_users().await, HashSet::from([5, 6]));

        hub.unregister(a).await;
        assert_eq!(hub.online_users().await, HashSet::from([6]));
    }

    #[tokio::test]
    async fn unregister_closes_the_channel() {
        let hub = Hub::new();
        let (id, mut rx) = hub.register(4).await;

        assert!(hub.unregister(id).await);
        assert!(rx.recv().await.is_none());
        assert_eq!(hub.broadcast(&pong()).await, 0);
    }
}
