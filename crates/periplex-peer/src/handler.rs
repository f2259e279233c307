use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use periplex_frame::{FrameError, FramedConnection, Packet, ScopeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::handshake::{accept_greeting, is_greeting, welcome_packet};
use crate::holder::ConnectionHolder;
use crate::server::{LinkEvent, ServerShared};
use crate::transporter::Transporter;

/// Who is on the other end of a link, as announced in its greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    /// Negotiated scopes: declared by the device and served by the server.
    pub scopes: ScopeSet,
}

/// Server side of one accepted device connection.
pub struct DuplexHandler {
    link_id: String,
    peer_addr: SocketAddr,
    identity: RwLock<Option<DeviceIdentity>>,
    holder: ConnectionHolder,
    stop: CancellationToken,
}

impl DuplexHandler {
    pub(crate) fn new(link_id: String, conn: Arc<FramedConnection>, stop: CancellationToken) -> Self {
        let peer_addr = conn.peer_addr();
        let holder = ConnectionHolder::new();
        holder.set(conn);
        Self {
            link_id,
            peer_addr,
            identity: RwLock::new(None),
            holder,
            stop,
        }
    }

    pub fn link_id(&self) -> &str {
        &self.link_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Device name, once the greeting has arrived.
    pub fn device_name(&self) -> Option<String> {
        self.identity().map(|identity| identity.name)
    }

    /// Scopes this link may carry. Only System before the greeting.
    pub fn scopes(&self) -> ScopeSet {
        self.identity()
            .map(|identity| identity.scopes)
            .unwrap_or_default()
    }

    /// Close the connection and end the read loop.
    pub fn stop(&self) {
        self.stop.cancel();
        self.holder.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) fn identify(&self, name: String, scopes: ScopeSet) {
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(DeviceIdentity { name, scopes });
    }

    fn is_identified(&self) -> bool {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Read loop for this link. Runs until the connection fails, the greeting
    /// is invalid or late, or the handler is stopped.
    pub(crate) async fn run(self: Arc<Self>, conn: Arc<FramedConnection>, shared: Arc<ServerShared>) {
        let greeting_deadline = tokio::time::sleep(shared.config.handshake.timeout);
        tokio::pin!(greeting_deadline);

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = &mut greeting_deadline, if !self.is_identified() => {
                    warn!(timeout = ?shared.config.handshake.timeout, "no greeting received; closing link");
                    break;
                }
                frame = conn.read_frame() => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => {
                    debug!("connection closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "frame read failed; closing link");
                    break;
                }
            };

            let packet = match Packet::decode(frame) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!(error = %err, "malformed packet; closing link");
                    break;
                }
            };
            debug!(%packet, "packet received");

            if is_greeting(&packet) {
                if let Err(err) = self.handle_greeting(&packet, &shared).await {
                    warn!(error = %err, "greeting rejected; closing link");
                    break;
                }
                continue;
            }

            shared.table.dispatch(&packet);
        }

        self.stop.cancel();
        self.holder.close_if(&conn);
        // A superseded link no longer speaks for its device.
        let device = shared
            .handles
            .remove(&self.link_id)
            .and_then(|removed| removed.device);
        info!(
            device = self.device_name().as_deref().unwrap_or("-"),
            released = device.is_some(),
            "link closed"
        );
        shared.emit(LinkEvent::Detached {
            link_id: self.link_id.clone(),
            device,
        });
    }

    async fn handle_greeting(&self, packet: &Packet, shared: &ServerShared) -> Result<()> {
        if self.is_identified() {
            return Err(PeerError::HandshakeFailed("duplicate greeting".to_string()));
        }

        let (greeting, scopes) = accept_greeting(&shared.config.handshake, packet, shared.config.scopes)?;
        let device = packet.dev_name.clone();
        self.identify(device.clone(), scopes);

        if let Some(previous) = shared.handles.bind_device(&device, &self.link_id) {
            info!(
                device = %device,
                previous = %previous.link_id(),
                "device reconnected; superseding previous link"
            );
            previous.stop();
            shared.emit(LinkEvent::Superseded {
                link_id: previous.link_id().to_string(),
                device: device.clone(),
            });
        }

        info!(device = %device, %scopes, version = %greeting.version, "device attached");
        shared.emit(LinkEvent::Attached {
            link_id: self.link_id.clone(),
            device,
            scopes,
        });

        let welcome = welcome_packet(packet, &self.link_id, scopes)?;
        self.send_packet(welcome).await
    }
}

impl Transporter for DuplexHandler {
    /// Fails with `UnsupportedScope` if the device did not declare the
    /// packet's scope. A socket write failure stops the handler; an oversized
    /// packet is refused and the link stays up.
    async fn send_packet(&self, packet: Packet) -> Result<()> {
        if !self.scopes().contains(packet.scope) {
            return Err(PeerError::UnsupportedScope {
                device: self.device_name().unwrap_or_else(|| self.link_id.clone()),
                scope: packet.scope,
            });
        }

        let Some(conn) = self.holder.get() else {
            return Err(PeerError::DeviceNotConnected(
                self.device_name().unwrap_or_else(|| self.link_id.clone()),
            ));
        };

        let payload = packet.encode()?;
        debug!(link_id = %self.link_id, %packet, "sending packet");
        if let Err(err) = conn.write_frame(payload).await {
            if err.breaks_connection() {
                warn!(link_id = %self.link_id, error = %err, "write failed; stopping link");
                self.stop();
            }
            return Err(err.into());
        }
        Ok(())
    }
}

impl fmt::Debug for DuplexHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexHandler")
            .field("link_id", &self.link_id)
            .field("peer_addr", &self.peer_addr)
            .field("identity", &self.identity())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
