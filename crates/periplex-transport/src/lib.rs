//! TCP transport for periplex.
//!
//! This is the lowest layer of periplex. It owns socket setup only: binding a
//! listener, accepting peers, dialing a server with a bounded connect
//! timeout, and applying TCP keep-alive. Framing lives one layer up in
//! `periplex-frame`.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::{apply_keepalive, connect, KeepAlive, TcpAcceptor};
