//! Duplex TCP transport between a control process and peripheral devices.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP bind, accept, dial and keep-alive
//! - [`frame`]: packet codec and magic-prefixed framing
//! - [`peer`]: duplex client and server, scope dispatch

/// Re-export transport types.
pub mod transport {
    pub use periplex_transport::*;
}

/// Re-export frame and packet types.
pub mod frame {
    pub use periplex_frame::*;
}

/// Re-export client and server types.
pub mod peer {
    pub use periplex_peer::*;
}
