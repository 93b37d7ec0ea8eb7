//! Error hierarchy for the messaging core.
//!
//! Two small domains, both built on [`thiserror`]:
//!
//! - [`AuthError`]: credential verification failures. Terminal for the
//!   handshake — the channel is closed with the reason string, never
//!   retried.
//! - [`RouteError`]: failures while routing a message. Never crosses the
//!   channel boundary as an error; the sender sees a negative
//!   acknowledgement instead.
//!
//! Per-recipient delivery failures during fanout are deliberately not an
//! error type: they are counted and logged, and the fanout continues.

use thiserror::Error;

/// Why a handshake credential was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The handshake carried no token at all.
    #[error("invalid credential: no token supplied")]
    MissingToken,

    /// The token could not be decoded as a signed credential.
    #[error("invalid credential: malformed token")]
    Malformed,

    /// The token's signature did not verify.
    #[error("invalid credential: signature verification failed")]
    InvalidSignature,

    /// The credential's expiry is in the past.
    #[error("invalid credential: token expired")]
    Expired,
}

impl AuthError {
    /// Short machine-readable code, used as a metric label and close reason.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Malformed => "malformed",
            Self::InvalidSignature => "bad_signature",
            Self::Expired => "expired",
        }
    }
}

/// Why a message could not be routed.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The outgoing payload could not be constructed.
    #[error("failed to encode outgoing payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The sending connection never completed its handshake.
    #[error("sender is not authenticated")]
    Unauthenticated,
}
