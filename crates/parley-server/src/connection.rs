//! Per-channel connection state.
//!
//! A [`ClientConnection`] is created when a channel opens and owned by
//! the gateway for its whole life. The state machine is
//! `Pending → Authenticated → Closed` or `Pending → Rejected → Closed`;
//! identity is attached exactly once, at the `Authenticated` transition,
//! and never changes afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use parley_core::auth::Identity;
use parley_core::events::ServerEvent;
use parley_core::ids::ConnectionId;

/// Lifecycle state of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel open, credential not yet verified. No operation other
    /// than verification is permitted here.
    Pending,
    /// Credential verified; identity attached.
    Authenticated,
    /// Credential rejected; the channel is about to close.
    Rejected,
    /// Channel gone; cleanup has run.
    Closed,
}

/// One connected client channel.
#[derive(Debug)]
pub struct ClientConnection {
    /// Unique connection ID (UUID v7).
    pub id: ConnectionId,
    state: Mutex<ConnectionState>,
    identity: Mutex<Option<Identity>>,
    /// Send channel to the connection's outbound write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this channel was accepted.
    pub connected_at: Instant,
    /// Count of payloads dropped due to a full or closed queue.
    dropped_payloads: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection in `Pending` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState::Pending),
            identity: Mutex::new(None),
            tx,
            connected_at: Instant::now(),
            dropped_payloads: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Attach a verified identity and transition to `Authenticated`.
    ///
    /// Only legal from `Pending`; returns `false` (and changes nothing)
    /// from any other state, so identity can never be replaced.
    pub fn authenticate(&self, identity: Identity) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Pending {
            return false;
        }
        *state = ConnectionState::Authenticated;
        *self.identity.lock() = Some(identity);
        true
    }

    /// Transition `Pending → Rejected`. Returns `false` from any other state.
    pub fn reject(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Pending {
            return false;
        }
        *state = ConnectionState::Rejected;
        true
    }

    /// Transition to `Closed` from any state.
    ///
    /// Returns `true` only on the first call — callers use this to run
    /// disconnect cleanup exactly once regardless of close cause.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = ConnectionState::Closed;
        true
    }

    /// Whether the connection completed verification (and is not yet closed).
    pub fn is_authenticated(&self) -> bool {
        *self.state.lock() == ConnectionState::Authenticated
    }

    /// The verified identity, if attached.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    /// Enqueue a serialized payload for delivery.
    ///
    /// Returns `false` if the queue is full or the channel is gone, and
    /// increments the drop counter. Sending to a closed channel is a
    /// counted no-op, never an error.
    pub fn send(&self, payload: Arc<String>) -> bool {
        if self.tx.try_send(payload).is_ok() {
            true
        } else {
            let _ = self.dropped_payloads.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize a server event and enqueue it.
    pub fn send_event(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total payloads dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_payloads.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
