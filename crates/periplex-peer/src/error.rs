use periplex_frame::Scope;

/// Errors that can occur in duplex client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] periplex_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] periplex_frame::FrameError),

    /// Packet encoding or decoding error.
    #[error("packet error: {0}")]
    Packet(#[from] periplex_frame::PacketError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Greeting or welcome rejected.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The client holds no live connection.
    #[error("not connected")]
    NotConnected,

    /// No live connection is registered for the device.
    #[error("device '{0}' is not connected")]
    DeviceNotConnected(String),

    /// The device did not declare the scope in its greeting.
    #[error("device '{device}' does not support scope {scope}")]
    UnsupportedScope { device: String, scope: Scope },

    /// `start` / `start_listen` was called twice.
    #[error("already started")]
    AlreadyStarted,

    /// The endpoint has been stopped.
    #[error("stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, PeerError>;
