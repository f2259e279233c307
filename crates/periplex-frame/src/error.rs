/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header does not start with the magic number.
    #[error("invalid frame magic (expected 0x397BA25F)")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed, locally or by the peer, before a complete
    /// frame was transferred.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the connection is unusable after this error.
    ///
    /// `PayloadTooLarge` on the send side is raised before any byte is
    /// written, so the connection stays intact.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed | Self::InvalidMagic)
    }
}

/// Errors produced by the packet codec.
///
/// Every decode error means the peer sent bytes this side cannot trust; the
/// owning read loop drops the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Fewer bytes than the fixed packet header.
    #[error("packet too short: {len} bytes (header is 16)")]
    FrameTooShort { len: usize },

    /// The header declares more name/command/content bytes than are present.
    #[error("packet truncated: header declares {needed} bytes, {available} available")]
    FrameTruncated { needed: usize, available: usize },

    /// Bytes remain after the declared content.
    #[error("packet has {extra} trailing bytes after content")]
    TrailingBytes { extra: usize },

    /// The packet kind byte is not a known kind.
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),

    /// The scope byte is not a known scope.
    #[error("unknown scope {0}")]
    UnknownScope(u8),

    /// A name field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// The device name does not fit its one-byte length field.
    #[error("device name too long ({len} bytes, max 255)")]
    NameTooLong { len: usize },

    /// The command name does not fit its one-byte length field.
    #[error("command name too long ({len} bytes, max 255)")]
    CommandTooLong { len: usize },

    /// The content does not fit its four-byte length field.
    #[error("content too large ({len} bytes)")]
    ContentTooLarge { len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
