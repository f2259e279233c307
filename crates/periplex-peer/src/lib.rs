//! Duplex connection management for periplex.
//!
//! A device process runs a [`DuplexClient`] that keeps one connection to the
//! control process alive, redialing on a fixed interval. The control process
//! runs a [`DuplexServer`] that accepts any number of devices, tracks them by
//! the name each announces in its greeting, and hands out a [`Transporter`]
//! for addressing a device by name. Both sides route inbound packets through
//! a [`ScopeTable`].

pub mod client;
pub mod dispatch;
pub mod error;
pub mod handle_set;
pub mod handler;
pub mod handshake;
pub mod holder;
pub mod server;
pub mod transporter;

pub use client::{ClientConfig, ClientState, DuplexClient};
pub use dispatch::{
    CommandHandler, DispatchError, DispatchOutcome, HandlerResult, ScopeItem, ScopeRegistrar,
    ScopeTable,
};
pub use error::{PeerError, Result};
pub use handle_set::{HandleSet, RemovedLink};
pub use handler::{DeviceIdentity, DuplexHandler};
pub use handshake::{
    Greeting, HandshakeConfig, Welcome, GREETING_COMMAND, PROTOCOL_NAME, PROTOCOL_VERSION,
    WELCOME_COMMAND,
};
pub use holder::ConnectionHolder;
pub use server::{DuplexServer, LinkEvent, ServerConfig};
pub use transporter::Transporter;

pub use periplex_frame::{Packet, PacketKind, Scope, ScopeSet};
