//! Rendezvous over WebSockets.
//!
//! - [`Beacon`]: axum server that mints one-time invitations and relays the
//!   negotiation exchange between the two sockets that meet on one of them.
//! - [`WsRendezvous`]: client side, implements [`mesh_protocol::Rendezvous`].
//! - [`RelayTransport`]: a [`mesh_protocol::Transport`] that keeps using the
//!   beacon's relayed socket as the control channel once negotiated.

mod client;
mod protocol;
mod relay;
mod server;

pub use client::WsRendezvous;
pub use protocol::{BeaconMessage, ERROR_UNSUPPORTED, ERROR_VOID};
pub use relay::RelayTransport;
pub use server::{Beacon, BeaconConfig, router};
