use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Frame header: magic (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes opening every frame.
pub const MAGIC: [u8; 4] = [0x39, 0x7B, 0xA2, 0x5F];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode one payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬───────────┬─────────────────┐
/// │ Magic (4B)       │ Length    │ Payload         │
/// │ 39 7B A2 5F      │ (4B LE)   │ (Length bytes)  │
/// └──────────────────┴───────────┴─────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame payload from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() >= MAGIC.len() && src[..MAGIC.len()] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = (&src[MAGIC.len()..HEADER_SIZE]).get_u32_le() as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec over [`encode_frame`] / [`decode_frame`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl FrameCodec {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
        }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, periplex!";

        encode_frame(payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());
        assert_eq!(&buf[..4], &MAGIC);
        assert_eq!(&buf[4..8], &(payload.len() as u32).to_le_bytes());

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x39, 0x7B, 0xA2][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());

        let mut buf = BytesMut::from(&[0x39, 0x7B, 0xA2, 0x5F, 0x01][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2, "partial frame must stay buffered");
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_invalid_magic_before_full_header() {
        let mut buf = BytesMut::from(&[0x39, 0x7B, 0x00, 0x5F][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024 * 1024 * 32);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", &mut buf).unwrap();
        encode_frame(b"second", &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(f1.as_ref(), b"first");

        let f2 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(f2.as_ref(), b"second");

        assert!(buf.is_empty());
    }

    #[test]
    fn codec_decode_eof_with_partial_frame_is_closed() {
        let mut buf = BytesMut::new();
        encode_frame(b"partial", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 3);

        let mut codec = FrameCodec::default();
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn codec_decode_eof_on_empty_buffer_ends_stream() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn codec_encoder_enforces_max_payload() {
        let mut codec = FrameCodec::new(&FrameConfig {
            max_payload_size: 4,
        });
        let mut buf = BytesMut::new();

        let err = codec
            .encode(Bytes::from_static(b"oversized"), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(buf.is_empty());
    }
}
