//! # parley-core
//!
//! Foundation types for the Parley real-time messaging server.
//!
//! This crate provides the shared vocabulary the server crate builds on:
//!
//! - **Branded IDs**: [`ids::ConnectionId`], [`ids::UserId`], [`ids::RoomName`] as newtypes
//! - **Credentials**: [`auth::verify`] for signed-token verification, [`auth::Identity`]
//! - **Wire events**: [`events::ClientEvent`] and [`events::ServerEvent`] tagged JSON enums
//! - **Acknowledgements**: [`ack::Ack`], a single-use completion value
//! - **Errors**: [`errors::AuthError`] and [`errors::RouteError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber
//!
//! ## Crate Position
//!
//! Foundation crate. No I/O; everything here is pure data and small
//! synchronization primitives.

#![deny(unsafe_code)]

pub mod ack;
pub mod auth;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
