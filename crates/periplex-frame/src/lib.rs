//! Length-prefixed framing and the scoped packet codec for periplex.
//!
//! Every message on the wire is one frame:
//! - A 4-byte magic number (`39 7B A2 5F`) marking the frame boundary
//! - A 4-byte little-endian payload length
//! - The payload: exactly one encoded [`Packet`]
//!
//! A packet names a capability [`Scope`], a command within that scope, the
//! addressed device and an opaque content body. The frame layer never looks
//! inside the content.

pub mod codec;
pub mod connection;
pub mod error;
pub mod packet;
pub mod reader;
pub mod scope;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, FrameCodec, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC,
};
pub use connection::FramedConnection;
pub use error::{FrameError, PacketError, Result};
pub use packet::{
    decode_packet, encode_packet, Packet, PacketKind, MAX_NAME_LEN, PACKET_HEADER_SIZE,
    PACKET_VERSION,
};
pub use reader::FrameReader;
pub use scope::{Scope, ScopeSet};
pub use writer::FrameWriter;
