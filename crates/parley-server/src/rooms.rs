//! Room registry — the single source of membership truth.
//!
//! In-memory mapping from room name to member connection set. Rooms are
//! created lazily on first join and pruned when the last member leaves,
//! so the map cannot grow without bound under join/leave churn. Every
//! operation takes the one lock around the map, which makes membership
//! snapshots for fanout consistent: a concurrent join or leave either
//! happens entirely before a snapshot or entirely after it.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use parley_core::ids::{ConnectionId, RoomName};

/// Membership registry for all rooms.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomName, HashSet<ConnectionId>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room if absent.
    ///
    /// Idempotent: joining a room twice leaves membership unchanged.
    pub fn join(&self, conn: &ConnectionId, room: &RoomName) {
        let mut rooms = self.rooms.write();
        let _ = rooms.entry(room.clone()).or_default().insert(conn.clone());
    }

    /// Remove a connection from a room.
    ///
    /// Idempotent: leaving a room the connection is not in is a no-op.
    /// An emptied room is pruned.
    pub fn leave(&self, conn: &ConnectionId, room: &RoomName) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room) {
            let _ = members.remove(conn);
            if members.is_empty() {
                let _ = rooms.remove(room);
            }
        }
    }

    /// Remove a connection from every room it is in. Used on disconnect.
    pub fn leave_all(&self, conn: &ConnectionId) {
        let mut rooms = self.rooms.write();
        rooms.retain(|_, members| {
            let _ = members.remove(conn);
            !members.is_empty()
        });
    }

    /// Snapshot of a room's members minus the excluded connection.
    ///
    /// An unknown room yields an empty set, not an error.
    pub fn members_except(&self, room: &RoomName, exclude: &ConnectionId) -> Vec<ConnectionId> {
        let rooms = self.rooms.read();
        rooms
            .get(room)
            .map(|members| members.iter().filter(|id| *id != exclude).cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a connection is currently a member of a room.
    pub fn is_member(&self, conn: &ConnectionId, room: &RoomName) -> bool {
        self.rooms
            .read()
            .get(room)
            .is_some_and(|members| members.contains(conn))
    }

    /// Number of live (non-empty) rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Number of members in a room (0 for unknown rooms).
    pub fn member_count(&self, room: &RoomName) -> usize {
        self.rooms.read().get(room).map_or(0, HashSet::len)
    }
}
