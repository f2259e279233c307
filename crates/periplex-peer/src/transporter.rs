use std::future::Future;

use periplex_frame::Packet;

use crate::error::Result;

/// Send side of one connection.
///
/// Implemented by [`DuplexClient`](crate::DuplexClient) for the device side
/// and by [`DuplexHandler`](crate::DuplexHandler) for each device connection
/// on the server side.
pub trait Transporter: Send + Sync {
    /// Encode `packet` and write it as one frame, immediately.
    fn send_packet(&self, packet: Packet) -> impl Future<Output = Result<()>> + Send;
}
