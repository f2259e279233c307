use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// A TCP stream carrying frames in both directions.
///
/// Reads and writes each hold their own lock, so one task can sit in
/// [`read_frame`](Self::read_frame) while others send. The write lock spans a
/// whole frame: concurrent senders never interleave partial frames.
///
/// [`close`](Self::close) is synchronous and wakes every pending read or write
/// with [`FrameError::ConnectionClosed`]. The socket itself, and with it the
/// FIN to the peer, goes when the last reference to the connection is
/// dropped; the holders and read loops release theirs as soon as they see
/// the close.
pub struct FramedConnection {
    reader: Mutex<FrameReader<OwnedReadHalf>>,
    writer: Mutex<FrameWriter<OwnedWriteHalf>>,
    peer_addr: SocketAddr,
    max_payload_size: usize,
    closed: CancellationToken,
}

impl FramedConnection {
    /// Wrap a connected stream.
    pub fn new(stream: TcpStream, config: FrameConfig) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let max_payload_size = config.max_payload_size;
        Ok(Self {
            reader: Mutex::new(FrameReader::with_config(read_half, config.clone())),
            writer: Mutex::new(FrameWriter::with_config(write_half, config)),
            peer_addr,
            max_payload_size,
            closed: CancellationToken::new(),
        })
    }

    /// Read the next frame payload.
    ///
    /// Returns `ConnectionClosed` as soon as the connection is closed, even
    /// while waiting for data.
    pub async fn read_frame(&self) -> Result<Bytes> {
        let mut reader = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(FrameError::ConnectionClosed),
            reader = self.reader.lock() => reader,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(FrameError::ConnectionClosed),
            frame = reader.read_frame() => frame,
        }
    }

    /// Write one frame. Empty payloads are not sent.
    ///
    /// An oversized payload fails with `PayloadTooLarge` before the write
    /// lock is taken; nothing reaches the socket.
    pub async fn write_frame(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        let mut writer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(FrameError::ConnectionClosed),
            writer = self.writer.lock() => writer,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(FrameError::ConnectionClosed),
            sent = writer.send(payload) => sent,
        }
    }

    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(peer = %self.peer_addr, "closing framed connection");
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl fmt::Debug for FramedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedConnection")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    async fn pair() -> (FramedConnection, FramedConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            FramedConnection::new(client.unwrap(), FrameConfig::default()).unwrap(),
            FramedConnection::new(accepted.unwrap().0, FrameConfig::default()).unwrap(),
        )
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (left, right) = pair().await;

        left.write_frame(&b"to-right"[..]).await.unwrap();
        right.write_frame(&b"to-left"[..]).await.unwrap();

        assert_eq!(right.read_frame().await.unwrap().as_ref(), b"to-right");
        assert_eq!(left.read_frame().await.unwrap().as_ref(), b"to-left");
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_interleave() {
        let (left, right) = pair().await;
        let left = Arc::new(left);

        let mut senders = Vec::new();
        for writer_id in 0..8u8 {
            let conn = Arc::clone(&left);
            senders.push(tokio::spawn(async move {
                for _ in 0..16 {
                    conn.write_frame(vec![writer_id; 64 * 1024]).await.unwrap();
                }
            }));
        }

        for _ in 0..(8 * 16) {
            let frame = right.read_frame().await.unwrap();
            assert_eq!(frame.len(), 64 * 1024);
            let first = frame[0];
            assert!(frame.iter().all(|b| *b == first), "frame mixes writers");
        }

        for sender in senders {
            sender.await.unwrap();
        }
    }

    #[tokio::test]
    async fn close_wakes_pending_reader() {
        let (left, _right) = pair().await;
        let left = Arc::new(left);

        let reader = {
            let conn = Arc::clone(&left);
            tokio::spawn(async move { conn.read_frame().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        left.close();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should wake on close")
            .unwrap();
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
        assert!(left.is_closed());
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (left, _right) = pair().await;
        left.close();
        left.close();

        let err = left.write_frame(&b"late"[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn peer_drop_surfaces_as_closed() {
        let (left, right) = pair().await;
        drop(right);

        let err = left.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::ConnectionClosed | FrameError::Io(_)
        ));
    }

    #[tokio::test]
    async fn oversized_write_leaves_connection_usable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let small = FrameConfig {
            max_payload_size: 8,
        };
        let left = FramedConnection::new(client.unwrap(), small).unwrap();
        let right = FramedConnection::new(accepted.unwrap().0, FrameConfig::default()).unwrap();

        let err = left.write_frame(vec![0u8; 9]).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 8 }));
        assert!(!err.breaks_connection());
        assert!(!left.is_closed());

        left.write_frame(&b"fits"[..]).await.unwrap();
        assert_eq!(right.read_frame().await.unwrap().as_ref(), b"fits");
    }

    #[tokio::test]
    async fn empty_write_is_noop() {
        let (left, right) = pair().await;

        left.write_frame(Bytes::new()).await.unwrap();
        left.write_frame(&b"real"[..]).await.unwrap();

        assert_eq!(right.read_frame().await.unwrap().as_ref(), b"real");
    }
}
