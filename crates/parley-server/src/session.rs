//! WebSocket session lifecycle — one connected client from upgrade
//! through disconnect.
//!
//! The session is handshake-first: the opening frame must carry the
//! credential, and nothing is registered server-side until it verifies.
//! After admission the session runs two halves — an outbound forwarder
//! draining the connection's queue, and the inbound frame loop feeding
//! the router — until the client leaves, the channel errors, or shutdown
//! is signalled.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use parley_core::ack::Ack;
use parley_core::events::{ClientEvent, ServerEvent};

use crate::connection::ClientConnection;
use crate::gateway::Gateway;
use crate::router::Router;

/// Everything a session needs beyond the socket itself.
#[derive(Clone)]
pub struct SessionContext {
    /// Admission and teardown.
    pub gateway: Arc<Gateway>,
    /// Frame dispatch.
    pub router: Arc<Router>,
    /// How long a new channel may take to present its handshake.
    pub handshake_timeout: Duration,
    /// Depth of the per-connection outbound queue.
    pub outbound_queue_capacity: usize,
    /// Observed for server-initiated session teardown.
    pub shutdown: CancellationToken,
}

/// Run a WebSocket session for one client.
///
/// 1. Waits for the handshake frame and verifies its credential
/// 2. Forwards queued outbound payloads to the socket
/// 3. Dispatches inbound frames to the router
/// 4. Tears the connection down exactly once, however the session ends
#[instrument(skip_all)]
pub async fn run_session(ws: WebSocket, ctx: SessionContext) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.outbound_queue_capacity);

    // Handshake phase. The gateway queues the connected confirmation on
    // success, so the forwarder delivers it as its first payload.
    let token = match await_handshake(&mut ws_rx, ctx.handshake_timeout).await {
        Ok(token) => token,
        Err(reason) => {
            close_with_reason(&mut ws_tx, reason).await;
            return;
        }
    };
    let connection = match ctx.gateway.connect(token.as_deref(), send_tx) {
        Ok(conn) => conn,
        Err(err) => {
            close_with_reason(&mut ws_tx, err.code()).await;
            return;
        }
    };

    let outbound = tokio::spawn(forward_outbound(ws_tx, send_rx));

    // Inbound frame loop.
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = ctx.shutdown.cancelled() => {
                info!(conn_id = %connection.id, "shutdown signalled, ending session");
                break;
            }
        };
        let Some(Ok(msg)) = msg else {
            break;
        };
        let text = match msg {
            Message::Text(ref t) => t.to_string(),
            Message::Close(_) => {
                debug!(conn_id = %connection.id, "client sent close frame");
                break;
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
        };
        handle_frame(&text, &connection, &ctx.router).await;
    }

    ctx.gateway.disconnect(&connection.id);
    outbound.abort();
}

/// Wait for the opening handshake frame and extract its token.
///
/// Fails with a close reason if the client is silent past the deadline,
/// closes early, or opens with anything other than a handshake frame.
async fn await_handshake(
    ws_rx: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
    timeout: Duration,
) -> Result<Option<String>, &'static str> {
    let first = tokio::time::timeout(timeout, async {
        // Skip control frames while waiting for the opening frame.
        loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(t))) => return Some(t.to_string()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) | Some(Err(_)) | None => return None,
            }
        }
    })
    .await;

    let text = match first {
        Ok(Some(text)) => text,
        Ok(None) => return Err("handshake_required"),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "handshake deadline passed");
            return Err("handshake_timeout");
        }
    };
    match serde_json::from_str::<ClientEvent>(&text) {
        Ok(ClientEvent::Handshake { token }) => Ok(token),
        Ok(_) | Err(_) => Err("handshake_required"),
    }
}

/// Drain the outbound queue into the socket until either side closes.
async fn forward_outbound(
    mut ws_tx: impl Sink<Message> + Unpin + Send + 'static,
    mut send_rx: mpsc::Receiver<Arc<String>>,
) {
    while let Some(payload) = send_rx.recv().await {
        if ws_tx
            .send(Message::Text(payload.as_str().to_owned().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Dispatch one inbound text frame.
async fn handle_frame(text: &str, connection: &Arc<ClientConnection>, router: &Router) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            warn!(conn_id = %connection.id, %err, "dropping unparseable frame");
            return;
        }
    };
    match event {
        ClientEvent::Handshake { .. } => {
            warn!(conn_id = %connection.id, "ignoring repeat handshake");
        }
        ClientEvent::Join { room_name } => {
            if let Err(err) = router.join(connection, &room_name) {
                warn!(conn_id = %connection.id, %err, "join refused");
            }
        }
        ClientEvent::Message {
            room_name,
            message,
            ack_id,
        } => match ack_id {
            Some(ack_id) => {
                let (ack, ack_rx) = Ack::new();
                let _ = router.route(connection, &room_name, &message, Some(ack));
                // Resolution happened inside route; relay it to the sender.
                let status = ack_rx.recv().await;
                let _ = connection.send_event(&ServerEvent::Ack { ack_id, status });
            }
            None => {
                if let Err(err) = router.route(connection, &room_name, &message, None) {
                    warn!(conn_id = %connection.id, %err, "message dropped");
                }
            }
        },
        ClientEvent::Broadcast { text } => {
            if let Err(err) = router.route_broadcast(connection, &text) {
                warn!(conn_id = %connection.id, %err, "broadcast dropped");
            }
        }
    }
}

/// Best-effort close frame with a machine-readable reason.
async fn close_with_reason(ws_tx: &mut (impl Sink<Message> + Unpin), reason: &'static str) {
    info!(reason, "closing channel before admission");
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}
