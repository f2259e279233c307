use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PacketError;
use crate::scope::Scope;

/// Packet header: kind, scope, two name lengths, options, counter, content
/// length.
pub const PACKET_HEADER_SIZE: usize = 16;

/// Maximum byte length of the device and command names.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Protocol version of this codec. It is not part of the packet layout; peers
/// exchange it in the greeting.
pub const PACKET_VERSION: u8 = 0;

/// Role of a packet. Informational only, the transport routes on scope and
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Notify = 0,
    Request = 1,
    Response = 2,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Notify),
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            _ => None,
        }
    }
}

/// The unit of communication between a server and a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub scope: Scope,
    /// Correlation field, carried but not interpreted.
    pub counter: u32,
    /// Flag field, carried but not interpreted.
    pub options: u32,
    /// Logical name of the addressed device.
    pub dev_name: String,
    /// Command name, unique within `scope`.
    pub command: String,
    /// Opaque body.
    pub content: Bytes,
}

impl Packet {
    pub fn new(
        kind: PacketKind,
        scope: Scope,
        dev_name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            scope,
            counter: 0,
            options: 0,
            dev_name: dev_name.into(),
            command: command.into(),
            content: Bytes::new(),
        }
    }

    pub fn request(scope: Scope, dev_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(PacketKind::Request, scope, dev_name, command)
    }

    pub fn notify(scope: Scope, dev_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(PacketKind::Notify, scope, dev_name, command)
    }

    pub fn response(scope: Scope, dev_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(PacketKind::Response, scope, dev_name, command)
    }

    /// A response to this packet: same scope, device and counter.
    pub fn reply(&self, command: impl Into<String>) -> Self {
        Self::response(self.scope, self.dev_name.clone(), command).with_counter(self.counter)
    }

    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = content.into();
        self
    }

    /// Serialize `value` as JSON into the content.
    pub fn with_json<T: Serialize>(self, value: &T) -> serde_json::Result<Self> {
        let content = serde_json::to_vec(value)?;
        Ok(self.with_content(content))
    }

    pub fn with_counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_options(mut self, options: u32) -> Self {
        self.options = options;
        self
    }

    /// Deserialize the content as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.content)
    }

    /// Encoded size of this packet.
    pub fn wire_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.dev_name.len() + self.command.len() + self.content.len()
    }

    /// Encode into a standalone buffer.
    pub fn encode(&self) -> Result<Bytes, PacketError> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_packet(self, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one packet; see [`decode_packet`].
    pub fn decode(src: Bytes) -> Result<Self, PacketError> {
        decode_packet(src)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}/{} dev={} counter={} content={}B",
            self.kind,
            self.scope,
            self.command,
            self.dev_name,
            self.counter,
            self.content.len()
        )
    }
}

/// Encode a packet.
///
/// Layout:
/// ```text
/// byte 0      kind
/// byte 1      scope
/// byte 2      len(dev_name)
/// byte 3      len(command)
/// bytes 4-7   options (u32 LE)
/// bytes 8-11  counter (u32 LE)
/// bytes 12-15 len(content) (u32 LE)
/// bytes 16..  dev_name | command | content
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<(), PacketError> {
    if packet.dev_name.len() > MAX_NAME_LEN {
        return Err(PacketError::NameTooLong {
            len: packet.dev_name.len(),
        });
    }
    if packet.command.len() > MAX_NAME_LEN {
        return Err(PacketError::CommandTooLong {
            len: packet.command.len(),
        });
    }
    if packet.content.len() > u32::MAX as usize {
        return Err(PacketError::ContentTooLarge {
            len: packet.content.len(),
        });
    }

    dst.reserve(packet.wire_size());
    dst.put_u8(packet.kind as u8);
    dst.put_u8(packet.scope.as_u8());
    dst.put_u8(packet.dev_name.len() as u8);
    dst.put_u8(packet.command.len() as u8);
    dst.put_u32_le(packet.options);
    dst.put_u32_le(packet.counter);
    dst.put_u32_le(packet.content.len() as u32);
    dst.put_slice(packet.dev_name.as_bytes());
    dst.put_slice(packet.command.as_bytes());
    dst.put_slice(&packet.content);
    Ok(())
}

/// Decode exactly one packet from a frame payload.
///
/// The input comes from a network peer: every length is checked against the
/// bytes actually present before anything is sliced. The content is a
/// zero-copy slice of `src`.
pub fn decode_packet(src: Bytes) -> Result<Packet, PacketError> {
    if src.len() < PACKET_HEADER_SIZE {
        return Err(PacketError::FrameTooShort { len: src.len() });
    }

    let mut header = &src[..PACKET_HEADER_SIZE];
    let kind_byte = header.get_u8();
    let scope_byte = header.get_u8();
    let name_len = header.get_u8() as usize;
    let command_len = header.get_u8() as usize;
    let options = header.get_u32_le();
    let counter = header.get_u32_le();
    let content_len = header.get_u32_le() as usize;

    let needed = PACKET_HEADER_SIZE
        .checked_add(name_len + command_len)
        .and_then(|n| n.checked_add(content_len))
        .ok_or(PacketError::FrameTruncated {
            needed: usize::MAX,
            available: src.len(),
        })?;
    if src.len() < needed {
        return Err(PacketError::FrameTruncated {
            needed,
            available: src.len(),
        });
    }
    if src.len() > needed {
        return Err(PacketError::TrailingBytes {
            extra: src.len() - needed,
        });
    }

    let kind = PacketKind::from_u8(kind_byte).ok_or(PacketError::UnknownKind(kind_byte))?;
    let scope = Scope::from_u8(scope_byte).ok_or(PacketError::UnknownScope(scope_byte))?;

    let name_end = PACKET_HEADER_SIZE + name_len;
    let command_end = name_end + command_len;
    let dev_name = utf8_field(&src[PACKET_HEADER_SIZE..name_end], "dev_name")?;
    let command = utf8_field(&src[name_end..command_end], "command")?;
    let content = src.slice(command_end..);

    Ok(Packet {
        kind,
        scope,
        counter,
        options,
        dev_name,
        command,
        content,
    })
}

fn utf8_field(raw: &[u8], field: &'static str) -> Result<String, PacketError> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| PacketError::InvalidUtf8 { field })
}
