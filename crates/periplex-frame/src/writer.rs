use bytes::Bytes;
use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::codec::{FrameCodec, FrameConfig};
use crate::error::Result;

/// Writes complete frames to any `AsyncWrite` stream.
pub struct FrameWriter<T> {
    inner: FramedWrite<T, FrameCodec>,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner: FramedWrite::new(inner, FrameCodec::new(&config)),
        }
    }

    /// Encode, write and flush one frame.
    ///
    /// An empty payload is not sent: a frame must carry a packet.
    pub async fn send(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.is_empty() {
            return Ok(());
        }
        self.inner.send(payload).await
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.inner.encoder_mut().set_max_payload_size(max_payload_size);
    }
}
