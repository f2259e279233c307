use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::{FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};

/// Reads complete frame payloads from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Dropping a pending [`read_frame`](Self::read_frame) future loses no data:
/// bytes already received stay buffered for the next call.
pub struct FrameReader<T> {
    inner: FramedRead<T, FrameCodec>,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner: FramedRead::new(inner, FrameCodec::new(&config)),
        }
    }

    /// Read the next complete frame payload.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        match self.inner.next().await {
            Some(frame) => frame,
            None => Err(FrameError::ConnectionClosed),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.inner.decoder_mut().set_max_payload_size(max_payload_size);
    }

    /// Current maximum payload size.
    pub fn max_payload_size(&self) -> usize {
        self.inner.decoder().max_payload_size()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use bytes::{BufMut, BytesMut};
    use tokio::io::{AsyncWriteExt, ReadBuf};

    use super::*;
    use crate::codec::{encode_frame, MAGIC};

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn read_single_frame() {
        let bytes = wire(&[b"hello"]);
        let mut reader = FrameReader::new(bytes.as_slice());

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn read_multiple_frames() {
        let bytes = wire(&[b"one", b"two", b"three"]);
        let mut reader = FrameReader::new(bytes.as_slice());

        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"one");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"two");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"three");
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 1024 * 1024];
        let bytes = wire(&[&payload]);
        let mut reader = FrameReader::new(bytes.as_slice());

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn partial_read_handling() {
        let bytes = wire(&[b"slow"]);
        let mut reader = FrameReader::new(ByteByByteReader { bytes, pos: 0 });

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.as_ref(), b"slow");
    }

    #[tokio::test]
    async fn frames_split_across_writes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let bytes = wire(&[b"across", b"writes"]);

        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(3) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"across");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"writes");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(&b""[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(&partial[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn invalid_magic_in_stream() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic));
    }

    #[tokio::test]
    async fn oversized_frame_in_stream() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&MAGIC);
        bytes.put_u32_le(1024);

        let cfg = FrameConfig {
            max_payload_size: 16,
        };
        let mut reader = FrameReader::with_config(&bytes[..], cfg);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn io_error_propagates() {
        let mut reader = FrameReader::new(BrokenReader);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn max_payload_is_adjustable() {
        let mut reader = FrameReader::new(&b""[..]);
        reader.set_max_payload_size(32);
        assert_eq!(reader.max_payload_size(), 32);
        let _ = reader.get_ref();
        let _inner = reader.into_inner();
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for ByteByByteReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.pos < self.bytes.len() && buf.remaining() > 0 {
                let byte = self.bytes[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
        }
    }
}
