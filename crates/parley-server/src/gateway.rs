//! Connection admission and teardown.
//!
//! The gateway owns the connection lifecycle: it verifies the handshake
//! credential, admits the connection into the fanout table and its
//! personal room, and tears everything down exactly once on disconnect,
//! however the channel ended.

use std::sync::Arc;

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use parley_core::auth::{self, VerificationKey};
use parley_core::errors::AuthError;
use parley_core::events::ServerEvent;
use parley_core::ids::{ConnectionId, RoomName};

use crate::connection::ClientConnection;
use crate::fanout::Fanout;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    HANDSHAKE_REJECTIONS_TOTAL,
};
use crate::rooms::RoomRegistry;

/// Why a connection attempt was refused.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Credential verification failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The server is at its configured connection limit.
    #[error("server at capacity")]
    AtCapacity,
}

impl ConnectError {
    /// Short machine-readable code, used as a metric label and close reason.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.code(),
            Self::AtCapacity => "at_capacity",
        }
    }
}

/// Admits and retires connections.
pub struct Gateway {
    fanout: Arc<Fanout>,
    rooms: Arc<RoomRegistry>,
    key: VerificationKey,
    max_connections: usize,
}

impl Gateway {
    pub fn new(
        fanout: Arc<Fanout>,
        rooms: Arc<RoomRegistry>,
        key: VerificationKey,
        max_connections: usize,
    ) -> Self {
        Self {
            fanout,
            rooms,
            key,
            max_connections,
        }
    }

    /// Verify a handshake credential and admit the connection.
    ///
    /// On success the connection is authenticated, registered for fanout,
    /// joined to its personal room, and has the connected confirmation
    /// queued. On failure nothing is registered and the caller closes the
    /// channel with [`ConnectError::code`] as the reason.
    #[instrument(skip_all)]
    pub fn connect(
        &self,
        token: Option<&str>,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Result<Arc<ClientConnection>, ConnectError> {
        let identity = auth::verify(token, &self.key).inspect_err(|err| {
            counter!(HANDSHAKE_REJECTIONS_TOTAL, "reason" => err.code()).increment(1);
            warn!(reason = err.code(), "rejecting connection: bad credential");
        })?;

        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        let accepted = conn.authenticate(identity.clone());
        debug_assert!(accepted, "fresh connection must be pending");

        // The limit check and the table insert share one lock; racing
        // handshakes cannot overshoot the limit.
        if !self.fanout.try_add(Arc::clone(&conn), self.max_connections) {
            counter!(HANDSHAKE_REJECTIONS_TOTAL, "reason" => "at_capacity").increment(1);
            warn!(limit = self.max_connections, "rejecting connection: at capacity");
            return Err(ConnectError::AtCapacity);
        }
        // Every user has a personal room keyed by their user ID, so peers
        // can address them without an explicit join.
        self.rooms.join(&conn.id, &RoomName::from(&identity.user_id));
        let _ = conn.send_event(&ServerEvent::Connected {
            user_id: identity.user_id.clone(),
        });

        counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = %conn.id, user_id = %identity.user_id, "connection established");
        Ok(conn)
    }

    /// Retire a connection.
    ///
    /// Idempotent: room membership, fanout registration, and metrics are
    /// released exactly once no matter how many paths report the close.
    #[instrument(skip(self))]
    pub fn disconnect(&self, id: &ConnectionId) {
        let Some(conn) = self.fanout.get(id) else {
            return;
        };
        if !conn.close() {
            return;
        }
        self.rooms.leave_all(id);
        self.fanout.remove(id);
        counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        info!(conn_id = %id, dropped = conn.drop_count(), "connection closed");
    }
}
