//! Connection table and best-effort payload fan-out.
//!
//! Holds every live connection indexed by ID and delivers one serialized
//! payload to many recipients. Delivery is per-recipient independent:
//! a full or closed outbound queue is counted and logged, never
//! propagated to the sender or allowed to abort the rest of the fanout.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use parley_core::errors::RouteError;
use parley_core::events::ServerEvent;
use parley_core::ids::ConnectionId;

use crate::connection::ClientConnection;
use crate::metrics::{FANOUT_DELIVERIES_TOTAL, FANOUT_DROPS_TOTAL};

/// Connection table plus fan-out delivery.
pub struct Fanout {
    /// Live connections indexed by connection ID.
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    /// Atomic count mirror (avoids read-locking for count queries).
    active_count: AtomicUsize,
}

impl Fanout {
    /// Create an empty connection table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Register a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write();
        if conns.insert(connection.id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Register a connection unless the table already holds `limit`
    /// entries.
    ///
    /// The size check and the insert happen under one write lock, so
    /// concurrent admissions cannot race past the limit.
    pub fn try_add(&self, connection: Arc<ClientConnection>, limit: usize) -> bool {
        let mut conns = self.connections.write();
        if conns.len() >= limit {
            return false;
        }
        if conns.insert(connection.id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Deregister a connection by ID.
    pub fn remove(&self, id: &ConnectionId) {
        let mut conns = self.connections.write();
        if conns.remove(id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Look up a connection by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Deliver an event to the given members.
    ///
    /// Serializes once and enqueues the shared payload on each member's
    /// outbound queue. Members that disappeared since the snapshot are
    /// skipped; members with a full queue are counted as drops. Returns
    /// the number of successful deliveries. Fails only if the payload
    /// itself cannot be constructed.
    pub fn deliver(&self, members: &[ConnectionId], event: &ServerEvent) -> Result<usize, RouteError> {
        let payload = Arc::new(serde_json::to_string(event)?);
        let conns = self.connections.read();
        let mut delivered = 0usize;
        for id in members {
            let Some(conn) = conns.get(id) else {
                continue;
            };
            if conn.send(Arc::clone(&payload)) {
                delivered += 1;
            } else {
                counter!(FANOUT_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, drops = conn.drop_count(), "failed to deliver payload (queue full or closed)");
            }
        }
        counter!(FANOUT_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(recipients = members.len(), delivered, "fanout complete");
        Ok(delivered)
    }

    /// Deliver an event to every authenticated connection except one.
    ///
    /// The legacy broadcast path: a degenerate room fanout where the room
    /// is "all connections".
    pub fn deliver_all_except(
        &self,
        exclude: &ConnectionId,
        event: &ServerEvent,
    ) -> Result<usize, RouteError> {
        let payload = Arc::new(serde_json::to_string(event)?);
        let conns = self.connections.read();
        let mut delivered = 0usize;
        for conn in conns.values() {
            if &conn.id == exclude || !conn.is_authenticated() {
                continue;
            }
            if conn.send(Arc::clone(&payload)) {
                delivered += 1;
            } else {
                counter!(FANOUT_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, drops = conn.drop_count(), "failed to deliver broadcast (queue full or closed)");
            }
        }
        counter!(FANOUT_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(delivered, "broadcast complete");
        Ok(delivered)
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::auth::Identity;
    use parley_core::ids::UserId;
    use tokio::sync::mpsc;

    fn make_connection(
        tag: &str,
        authenticated: bool,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from(tag), tx);
        if authenticated {
            assert!(conn.authenticate(Identity {
                user_id: UserId::from(tag),
                display_name: tag.to_owned(),
            }));
        }
        (Arc::new(conn), rx)
    }

    fn broadcast(text: &str) -> ServerEvent {
        ServerEvent::Broadcast { text: text.into() }
    }

    #[test]
    fn add_and_remove_track_count() {
        let fanout = Fanout::new();
        let (a, _rx_a) = make_connection("a", true);
        let (b, _rx_b) = make_connection("b", true);
        fanout.add(a);
        fanout.add(b);
        assert_eq!(fanout.connection_count(), 2);
        fanout.remove(&ConnectionId::from("a"));
        assert_eq!(fanout.connection_count(), 1);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let fanout = Fanout::new();
        fanout.remove(&ConnectionId::from("ghost"));
        assert_eq!(fanout.connection_count(), 0);
    }

    #[test]
    fn try_add_refuses_at_limit_and_admits_after_remove() {
        let fanout = Fanout::new();
        let (a, _rx_a) = make_connection("a", true);
        let (b, _rx_b) = make_connection("b", true);
        assert!(fanout.try_add(a, 1));
        assert!(!fanout.try_add(Arc::clone(&b), 1));
        assert_eq!(fanout.connection_count(), 1);

        fanout.remove(&ConnectionId::from("a"));
        assert!(fanout.try_add(b, 1));
        assert_eq!(fanout.connection_count(), 1);
    }

    #[test]
    fn try_add_never_exceeds_limit_under_contention() {
        let fanout = Arc::new(Fanout::new());
        let mut receivers = Vec::new();
        let mut conns = Vec::new();
        for i in 0..16 {
            let (conn, rx) = make_connection(&format!("c{i}"), true);
            conns.push(conn);
            receivers.push(rx);
        }

        let admitted: usize = std::thread::scope(|scope| {
            conns
                .into_iter()
                .map(|conn| {
                    let fanout = Arc::clone(&fanout);
                    scope.spawn(move || usize::from(fanout.try_add(conn, 3)))
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .sum()
        });
        assert_eq!(admitted, 3);
        assert_eq!(fanout.connection_count(), 3);
    }

    #[test]
    fn re_adding_same_id_does_not_double_count() {
        let fanout = Fanout::new();
        let (a1, _rx1) = make_connection("a", true);
        let (a2, _rx2) = make_connection("a", true);
        fanout.add(a1);
        fanout.add(a2);
        assert_eq!(fanout.connection_count(), 1);
    }

    #[tokio::test]
    async fn deliver_reaches_each_member() {
        let fanout = Fanout::new();
        let (a, mut rx_a) = make_connection("a", true);
        let (b, mut rx_b) = make_connection("b", true);
        fanout.add(a);
        fanout.add(b);

        let members = vec![ConnectionId::from("a"), ConnectionId::from("b")];
        let delivered = fanout.deliver(&members, &broadcast("hey")).unwrap();
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn deliver_skips_vanished_members() {
        let fanout = Fanout::new();
        let (a, mut rx_a) = make_connection("a", true);
        fanout.add(a);

        let members = vec![ConnectionId::from("a"), ConnectionId::from("gone")];
        let delivered = fanout.deliver(&members, &broadcast("hey")).unwrap();
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
    }

    #[tokio::test]
    async fn one_full_queue_does_not_block_others() {
        let fanout = Fanout::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let slow = Arc::new(ClientConnection::new(ConnectionId::from("slow"), slow_tx));
        let _ = slow.authenticate(Identity {
            user_id: UserId::from("slow"),
            display_name: "slow".into(),
        });
        // Fill the slow queue ahead of time.
        assert!(slow.send(Arc::new("filler".into())));
        let (fast, mut fast_rx) = make_connection("fast", true);
        fanout.add(slow.clone());
        fanout.add(fast);

        let members = vec![ConnectionId::from("slow"), ConnectionId::from("fast")];
        let delivered = fanout.deliver(&members, &broadcast("hey")).unwrap();
        assert_eq!(delivered, 1);
        assert!(fast_rx.try_recv().is_ok());
        assert_eq!(slow.drop_count(), 1);
    }

    #[tokio::test]
    async fn payload_is_shared_not_cloned() {
        let fanout = Fanout::new();
        let (a, mut rx_a) = make_connection("a", true);
        let (b, mut rx_b) = make_connection("b", true);
        fanout.add(a);
        fanout.add(b);

        let members = vec![ConnectionId::from("a"), ConnectionId::from("b")];
        let _ = fanout.deliver(&members, &broadcast("hey")).unwrap();
        let pa = rx_a.recv().await.unwrap();
        let pb = rx_b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&pa, &pb));
    }

    #[tokio::test]
    async fn deliver_all_except_excludes_sender_and_pending() {
        let fanout = Fanout::new();
        let (sender, mut rx_sender) = make_connection("sender", true);
        let (peer, mut rx_peer) = make_connection("peer", true);
        let (pending, mut rx_pending) = make_connection("pending", false);
        fanout.add(sender);
        fanout.add(peer);
        fanout.add(pending);

        let delivered = fanout
            .deliver_all_except(&ConnectionId::from("sender"), &broadcast("hey"))
            .unwrap();
        assert_eq!(delivered, 1);
        assert!(rx_peer.try_recv().is_ok());
        assert!(rx_sender.try_recv().is_err());
        assert!(rx_pending.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_to_empty_member_list() {
        let fanout = Fanout::new();
        let delivered = fanout.deliver(&[], &broadcast("hey")).unwrap();
        assert_eq!(delivered, 0);
    }
}
