//! Single-use acknowledgement completion value.
//!
//! A sender that attaches an `ackId` to a message must receive exactly
//! one acknowledgement, whatever happens during routing. [`Ack`] makes
//! that invariant structural: resolving consumes the value, and dropping
//! an unresolved `Ack` reports [`AckStatus::Error`] — an acknowledgement
//! can be delivered once and can never be silently lost.

use tokio::sync::oneshot;

use crate::events::AckStatus;

/// The resolving half of an acknowledgement.
#[derive(Debug)]
pub struct Ack {
    tx: Option<oneshot::Sender<AckStatus>>,
}

/// The awaiting half of an acknowledgement.
#[derive(Debug)]
pub struct AckReceiver {
    rx: oneshot::Receiver<AckStatus>,
}

impl Ack {
    /// Create a linked acknowledgement pair.
    #[must_use]
    pub fn new() -> (Self, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, AckReceiver { rx })
    }

    /// Resolve the acknowledgement with the given status.
    ///
    /// Consumes the value; a second resolution is impossible by
    /// construction.
    pub fn resolve(mut self, status: AckStatus) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(status);
        }
    }
}

impl Drop for Ack {
    fn drop(&mut self) {
        // An unresolved acknowledgement still reaches the sender, as an
        // error rather than silence.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(AckStatus::Error);
        }
    }
}

impl AckReceiver {
    /// Wait for the acknowledgement to resolve.
    pub async fn recv(self) -> AckStatus {
        // The drop guard on `Ack` makes a dropped sender unreachable,
        // but map it to an error rather than panic.
        self.rx.await.unwrap_or(AckStatus::Error)
    }

    /// Non-blocking check, for callers that know resolution already
    /// happened synchronously.
    pub fn try_recv(&mut self) -> Option<AckStatus> {
        self.rx.try_recv().ok()
    }
}
