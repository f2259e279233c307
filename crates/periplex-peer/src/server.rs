use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use periplex_frame::{FrameConfig, FramedConnection, Packet, Scope, ScopeSet};
use periplex_transport::{apply_keepalive, KeepAlive, TcpAcceptor};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::dispatch::{ScopeItem, ScopeRegistrar, ScopeTable};
use crate::error::{PeerError, Result};
use crate::handle_set::HandleSet;
use crate::handler::DuplexHandler;
use crate::handshake::HandshakeConfig;
use crate::transporter::Transporter;

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for [`DuplexServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on. Port 0 picks a free port.
    pub listen_addr: String,
    /// Scopes this server is willing to talk to devices about.
    pub scopes: ScopeSet,
    pub keepalive: KeepAlive,
    pub frame: FrameConfig,
    pub handshake: HandshakeConfig,
    /// Pause after a failed accept before trying again.
    pub accept_retry_delay: Duration,
    /// Buffered [`LinkEvent`]s per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl ServerConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepAlive) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_accept_retry_delay(mut self, delay: Duration) -> Self {
        self.accept_retry_delay = delay;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            scopes: Scope::ALL.into_iter().collect(),
            keepalive: KeepAlive::default(),
            frame: FrameConfig::default(),
            handshake: HandshakeConfig::default(),
            accept_retry_delay: Duration::from_millis(100),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Lifecycle of server-side links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection was accepted; no greeting yet.
    Accepted { link_id: String, peer: SocketAddr },
    /// The link greeted as `device`.
    Attached {
        link_id: String,
        device: String,
        scopes: ScopeSet,
    },
    /// `link_id` was replaced by a newer link for the same device.
    Superseded { link_id: String, device: String },
    /// The link's read loop ended. `device` is set only when the device
    /// lost its route with it, not when a newer link had superseded it.
    Detached {
        link_id: String,
        device: Option<String>,
    },
}

pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) table: Arc<ScopeTable>,
    pub(crate) handles: HandleSet,
    events: broadcast::Sender<LinkEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    local_addr: Mutex<Option<SocketAddr>>,
    next_link_id: AtomicU64,
    started: AtomicBool,
    span: Span,
}

impl ServerShared {
    pub(crate) fn emit(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = apply_keepalive(&stream, &self.config.keepalive) {
            warn!(%peer, error = %err, "failed to enable keep-alive");
        }

        let conn = match FramedConnection::new(stream, self.config.frame.clone()) {
            Ok(conn) => Arc::new(conn),
            Err(err) => {
                warn!(%peer, error = %err, "dropping accepted connection");
                return;
            }
        };

        let link_id = format!("link-{}", self.next_link_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handler = Arc::new(DuplexHandler::new(
            link_id.clone(),
            Arc::clone(&conn),
            self.shutdown.child_token(),
        ));
        self.handles.insert(Arc::clone(&handler));

        info!(%link_id, %peer, "connection accepted");
        self.emit(LinkEvent::Accepted {
            link_id: link_id.clone(),
            peer,
        });

        let span = info_span!(parent: &self.span, "link", %link_id, %peer);
        self.tracker
            .spawn(handler.run(conn, Arc::clone(self)).instrument(span));
    }
}

/// Accepts device connections and routes packets to them by device name.
pub struct DuplexServer {
    shared: Arc<ServerShared>,
}

impl DuplexServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::build(config, CancellationToken::new())
    }

    /// A server that also stops when `parent` is cancelled.
    pub fn with_shutdown(config: ServerConfig, parent: &CancellationToken) -> Self {
        Self::build(config, parent.child_token())
    }

    fn build(config: ServerConfig, shutdown: CancellationToken) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let span = info_span!("duplex_server", listen = %config.listen_addr);
        Self {
            shared: Arc::new(ServerShared {
                config,
                table: Arc::new(ScopeTable::new()),
                handles: HandleSet::new(),
                events,
                shutdown,
                tracker: TaskTracker::new(),
                local_addr: Mutex::new(None),
                next_link_id: AtomicU64::new(0),
                started: AtomicBool::new(false),
                span,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Handlers for packets arriving from any device.
    pub fn table(&self) -> &ScopeTable {
        &self.shared.table
    }

    /// Bind the listener and start accepting. Returns the bound address.
    pub async fn start_listen(&self) -> Result<SocketAddr> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(PeerError::Stopped);
        }
        if shared.started.swap(true, Ordering::SeqCst) {
            return Err(PeerError::AlreadyStarted);
        }

        let acceptor = match TcpAcceptor::bind(&shared.config.listen_addr)
            .instrument(shared.span.clone())
            .await
        {
            Ok(acceptor) => acceptor,
            Err(err) => {
                shared.started.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        let local_addr = acceptor.local_addr();
        *shared
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(local_addr);

        shared
            .tracker
            .spawn(accept_loop(Arc::clone(shared), acceptor).instrument(shared.span.clone()));
        Ok(local_addr)
    }

    /// Stop accepting, close every link, and wait for all link tasks to end.
    /// Idempotent.
    pub async fn stop_listen(&self) {
        let shared = &self.shared;
        shared.shutdown.cancel();
        for handler in shared.handles.handlers() {
            handler.stop();
        }
        shared.tracker.close();
        shared.tracker.wait().await;
        shared.handles.clear();
        shared.span.in_scope(|| info!("server stopped"));
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .shared
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The live handler serving `device`, if any.
    pub fn get_transporter(&self, device: &str) -> Option<Arc<DuplexHandler>> {
        self.shared.handles.by_device(device)
    }

    /// Send `packet` to the device named by its `dev_name`.
    pub async fn send_to_device(&self, packet: Packet) -> Result<()> {
        let handler = self
            .get_transporter(&packet.dev_name)
            .ok_or_else(|| PeerError::DeviceNotConnected(packet.dev_name.clone()))?;
        handler.send_packet(packet).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Names of attached devices, sorted.
    pub fn devices(&self) -> Vec<String> {
        self.shared.handles.devices()
    }

    /// Live links, including ones that have not greeted yet.
    pub fn link_count(&self) -> usize {
        self.shared.handles.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

impl ScopeRegistrar for DuplexServer {
    fn add_scope_item(&self, item: ScopeItem) {
        self.shared.table.add_scope_item(item);
    }
}

impl Drop for DuplexServer {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn accept_loop(shared: Arc<ServerShared>, acceptor: TcpAcceptor) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => shared.admit(stream, peer),
            Err(err) => {
                warn!(
                    error = %err,
                    retry_in = ?shared.config.accept_retry_delay,
                    "accept failed"
                );
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(shared.config.accept_retry_delay) => {}
                }
            }
        }
    }
    debug!("accept loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serves_all_scopes() {
        let config = ServerConfig::new("0.0.0.0:7000");
        assert_eq!(config.listen_addr, "0.0.0.0:7000");
        for scope in Scope::ALL {
            assert!(config.scopes.contains(scope));
        }
        assert_eq!(config.accept_retry_delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn start_listen_twice_fails() {
        let server = DuplexServer::new(ServerConfig::default());
        let addr = server.start_listen().await.unwrap();
        assert_eq!(server.local_addr(), Some(addr));
        assert!(matches!(
            server.start_listen().await,
            Err(PeerError::AlreadyStarted)
        ));
        server.stop_listen().await;
        server.stop_listen().await;
        assert!(matches!(server.start_listen().await, Err(PeerError::Stopped)));
    }

    #[tokio::test]
    async fn bind_failure_allows_retry() {
        let taken = DuplexServer::new(ServerConfig::default());
        let addr = taken.start_listen().await.unwrap();

        let server = DuplexServer::new(ServerConfig::new(addr.to_string()));
        assert!(matches!(
            server.start_listen().await,
            Err(PeerError::Transport(_))
        ));
        taken.stop_listen().await;
    }

    #[tokio::test]
    async fn parent_token_stops_server() {
        let parent = CancellationToken::new();
        let server = DuplexServer::with_shutdown(ServerConfig::default(), &parent);
        server.start_listen().await.unwrap();
        parent.cancel();
        assert!(server.is_stopped());
        server.stop_listen().await;
    }

    #[tokio::test]
    async fn send_to_unknown_device() {
        let server = DuplexServer::new(ServerConfig::default());
        let packet = Packet::request(Scope::Device, "ghost", "Status");
        assert!(matches!(
            server.send_to_device(packet).await,
            Err(PeerError::DeviceNotConnected(name)) if name == "ghost"
        ));
    }
}
