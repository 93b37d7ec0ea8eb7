//! Message routing: room membership snapshot, fanout, acknowledgement.
//!
//! The router turns an inbound client frame into a server frame and a
//! recipient set, then hands both to the fanout. Acknowledgement is
//! resolved here exactly once per acknowledged send: positively once the
//! fanout has run, negatively when routing fails before the fanout.
//! Per-recipient delivery failures never reach the sender.

use std::sync::Arc;

use metrics::{counter, gauge};
use tracing::{debug, instrument, warn};

use parley_core::ack::Ack;
use parley_core::errors::RouteError;
use parley_core::events::{AckStatus, ServerEvent};
use parley_core::ids::RoomName;

use crate::connection::ClientConnection;
use crate::fanout::Fanout;
use crate::metrics::{ACKS_RESOLVED_TOTAL, BROADCASTS_TOTAL, MESSAGES_ROUTED_TOTAL, ROOMS_ACTIVE};
use crate::rooms::RoomRegistry;

/// Routes client frames to room members.
pub struct Router {
    fanout: Arc<Fanout>,
    rooms: Arc<RoomRegistry>,
}

impl Router {
    pub fn new(fanout: Arc<Fanout>, rooms: Arc<RoomRegistry>) -> Self {
        Self { fanout, rooms }
    }

    /// Join a room on behalf of a connection.
    ///
    /// Idempotent; the room is created on first join.
    #[instrument(skip(self, conn), fields(conn_id = %conn.id, room = %room))]
    pub fn join(&self, conn: &ClientConnection, room: &RoomName) -> Result<(), RouteError> {
        if !conn.is_authenticated() {
            return Err(RouteError::Unauthenticated);
        }
        self.rooms.join(&conn.id, room);
        gauge!(ROOMS_ACTIVE).set(self.rooms.room_count() as f64);
        debug!(members = self.rooms.member_count(room), "joined room");
        Ok(())
    }

    /// Route a message to every member of a room except the sender.
    ///
    /// The sender is addressed by connection, not membership: a sender
    /// outside the room still reaches the room, and never receives its
    /// own message back. When `ack` is present it is resolved exactly
    /// once: `ok` after the fanout has run (whatever the delivery count),
    /// `error` if routing fails before the fanout.
    #[instrument(skip(self, sender, message, ack), fields(conn_id = %sender.id, room = %room))]
    pub fn route(
        &self,
        sender: &ClientConnection,
        room: &RoomName,
        message: &str,
        ack: Option<Ack>,
    ) -> Result<usize, RouteError> {
        let result = self.route_inner(sender, room, message);
        if let Some(ack) = ack {
            let status = if result.is_ok() {
                AckStatus::Ok
            } else {
                AckStatus::Error
            };
            ack.resolve(status);
            let label = match status {
                AckStatus::Ok => "ok",
                AckStatus::Error => "error",
            };
            counter!(ACKS_RESOLVED_TOTAL, "status" => label).increment(1);
        }
        result
    }

    fn route_inner(
        &self,
        sender: &ClientConnection,
        room: &RoomName,
        message: &str,
    ) -> Result<usize, RouteError> {
        // Identity survives a close, so the state check matters too: a
        // closed sender is refused, not routed.
        if !sender.is_authenticated() {
            warn!(conn_id = %sender.id, "dropping message from unauthenticated sender");
            return Err(RouteError::Unauthenticated);
        }
        let Some(identity) = sender.identity() else {
            return Err(RouteError::Unauthenticated);
        };
        let members = self.rooms.members_except(room, &sender.id);
        let event = ServerEvent::Message {
            sender_id: identity.user_id,
            sender_name: identity.display_name,
            message: message.to_owned(),
        };
        let delivered = self.fanout.deliver(&members, &event)?;
        counter!(MESSAGES_ROUTED_TOTAL).increment(1);
        debug!(recipients = members.len(), delivered, "routed message");
        Ok(delivered)
    }

    /// Legacy broadcast: prefix the text and deliver to every
    /// authenticated connection except the sender.
    #[instrument(skip(self, sender, text), fields(conn_id = %sender.id))]
    pub fn route_broadcast(
        &self,
        sender: &ClientConnection,
        text: &str,
    ) -> Result<usize, RouteError> {
        if !sender.is_authenticated() {
            return Err(RouteError::Unauthenticated);
        }
        let event = ServerEvent::Broadcast {
            text: format!("server: {text}"),
        };
        let delivered = self.fanout.deliver_all_except(&sender.id, &event)?;
        counter!(BROADCASTS_TOTAL).increment(1);
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parley_core::auth::Identity;
    use parley_core::ids::{ConnectionId, UserId};
    use tokio::sync::mpsc;

    struct Fixture {
        router: Router,
        rooms: Arc<RoomRegistry>,
        fanout: Arc<Fanout>,
    }

    fn fixture() -> Fixture {
        let fanout = Arc::new(Fanout::new());
        let rooms = Arc::new(RoomRegistry::new());
        Fixture {
            router: Router::new(Arc::clone(&fanout), Arc::clone(&rooms)),
            rooms,
            fanout,
        }
    }

    fn connect(
        fx: &Fixture,
        tag: &str,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = Arc::new(ClientConnection::new(ConnectionId::from(tag), tx));
        assert!(conn.authenticate(Identity {
            user_id: UserId::from(tag),
            display_name: tag.to_owned(),
        }));
        fx.fanout.add(Arc::clone(&conn));
        (conn, rx)
    }

    fn recv_event(rx: &mut mpsc::Receiver<Arc<String>>) -> ServerEvent {
        let payload = rx.try_recv().expect("expected a queued event");
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn routed_message_reaches_other_members_only() {
        let fx = fixture();
        let (u1, mut rx1) = connect(&fx, "u1");
        let (u2, mut rx2) = connect(&fx, "u2");
        let lobby = RoomName::from("lobby");
        fx.router.join(&u1, &lobby).unwrap();
        fx.router.join(&u2, &lobby).unwrap();

        let delivered = fx.router.route(&u1, &lobby, "hello", None).unwrap();
        assert_eq!(delivered, 1);
        assert_matches!(
            recv_event(&mut rx2),
            ServerEvent::Message { sender_id, sender_name, message }
                if sender_id == UserId::from("u1") && sender_name == "u1" && message == "hello"
        );
        // Sender never hears its own message.
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn sender_outside_room_still_reaches_members() {
        let fx = fixture();
        let (outsider, _rx_out) = connect(&fx, "outsider");
        let (member, mut rx_member) = connect(&fx, "member");
        let lobby = RoomName::from("lobby");
        fx.router.join(&member, &lobby).unwrap();

        let delivered = fx.router.route(&outsider, &lobby, "knock", None).unwrap();
        assert_eq!(delivered, 1);
        assert_matches!(recv_event(&mut rx_member), ServerEvent::Message { .. });
    }

    #[tokio::test]
    async fn message_to_unknown_room_delivers_to_nobody() {
        let fx = fixture();
        let (u1, _rx) = connect(&fx, "u1");
        let delivered = fx
            .router
            .route(&u1, &RoomName::from("nowhere"), "hello", None)
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn acknowledged_send_resolves_ok_even_with_zero_recipients() {
        let fx = fixture();
        let (u1, _rx) = connect(&fx, "u1");
        let (ack, rx_ack) = Ack::new();
        fx.router
            .route(&u1, &RoomName::from("empty"), "hello", Some(ack))
            .unwrap();
        assert_eq!(rx_ack.recv().await, AckStatus::Ok);
    }

    #[tokio::test]
    async fn unauthenticated_sender_gets_error_ack() {
        let fx = fixture();
        let (tx, _rx) = mpsc::channel(32);
        let pending = ClientConnection::new(ConnectionId::from("pending"), tx);

        let (ack, rx_ack) = Ack::new();
        let err = fx
            .router
            .route(&pending, &RoomName::from("lobby"), "hello", Some(ack))
            .unwrap_err();
        assert_matches!(err, RouteError::Unauthenticated);
        assert_eq!(rx_ack.recv().await, AckStatus::Error);
    }

    #[tokio::test]
    async fn closed_sender_is_refused_despite_retained_identity() {
        let fx = fixture();
        let (u1, _rx1) = connect(&fx, "u1");
        let (member, mut rx_member) = connect(&fx, "member");
        let lobby = RoomName::from("lobby");
        fx.router.join(&member, &lobby).unwrap();

        assert!(u1.close());
        assert!(u1.identity().is_some());

        assert_matches!(
            fx.router.route(&u1, &lobby, "late", None),
            Err(RouteError::Unauthenticated)
        );
        assert_matches!(
            fx.router.route_broadcast(&u1, "late"),
            Err(RouteError::Unauthenticated)
        );
        assert!(rx_member.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_requires_authentication() {
        let fx = fixture();
        let (tx, _rx) = mpsc::channel(32);
        let pending = ClientConnection::new(ConnectionId::from("pending"), tx);
        assert_matches!(
            fx.router.join(&pending, &RoomName::from("lobby")),
            Err(RouteError::Unauthenticated)
        );
        assert_eq!(fx.rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_is_prefixed_and_skips_sender() {
        let fx = fixture();
        let (u1, mut rx1) = connect(&fx, "u1");
        let (_u2, mut rx2) = connect(&fx, "u2");

        let delivered = fx.router.route_broadcast(&u1, "hey all").unwrap();
        assert_eq!(delivered, 1);
        assert_matches!(
            recv_event(&mut rx2),
            ServerEvent::Broadcast { text } if text == "server: hey all"
        );
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_member_does_not_fail_the_ack() {
        let fx = fixture();
        let (u1, _rx1) = connect(&fx, "u1");
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let slow = Arc::new(ClientConnection::new(ConnectionId::from("slow"), slow_tx));
        assert!(slow.authenticate(Identity {
            user_id: UserId::from("slow"),
            display_name: "slow".into(),
        }));
        fx.fanout.add(Arc::clone(&slow));
        assert!(slow.send(Arc::new("filler".into())));

        let lobby = RoomName::from("lobby");
        fx.router.join(&u1, &lobby).unwrap();
        fx.router.join(&slow, &lobby).unwrap();

        let (ack, rx_ack) = Ack::new();
        let delivered = fx.router.route(&u1, &lobby, "hello", Some(ack)).unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(rx_ack.recv().await, AckStatus::Ok);
        assert_eq!(slow.drop_count(), 1);
    }
}
