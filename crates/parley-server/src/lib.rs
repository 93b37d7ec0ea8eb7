//! # parley-server
//!
//! Axum HTTP + `WebSocket` server for the Parley real-time messaging core.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-channel state machine and outbound delivery handle |
//! | `gateway` | Handshake verification, registration, disconnect cleanup |
//! | `rooms` | Room registry: membership sets keyed by room name |
//! | `router` | Inbound event dispatch: join, room send, legacy broadcast, acks |
//! | `fanout` | Connection table and best-effort payload fan-out |
//! | `session` | WebSocket upgrade, read/write loops, handshake timeout |
//! | `server` | Axum router: `/`, `/health`, `/metrics`, `/ws` |
//! | `config` | Server configuration with production defaults |
//! | `health` | `/health` endpoint payload |
//! | `shutdown` | Graceful shutdown via `CancellationToken` |
//! | `metrics` | Prometheus recorder and metric-name constants |
//!
//! ## Data Flow
//!
//! channel opens → `session` → `gateway` (verify, register, personal room)
//! → `router` dispatches per-event → `fanout` delivers → ack to sender.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod fanout;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod rooms;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;
