use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use periplex_frame::{FrameConfig, FrameError, FramedConnection, Packet, ScopeSet};
use periplex_transport::{apply_keepalive, connect, KeepAlive};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::dispatch::{ScopeItem, ScopeRegistrar, ScopeTable};
use crate::error::{PeerError, Result};
use crate::handshake::{greeting_packet, is_welcome, read_welcome, HandshakeConfig};
use crate::holder::ConnectionHolder;
use crate::transporter::Transporter;

/// Configuration for [`DuplexClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub server_addr: String,
    /// Name announced in the greeting; the server routes to this device by it.
    pub device_name: String,
    /// Scopes declared in the greeting, in addition to every scope with a
    /// registered handler.
    pub scopes: ScopeSet,
    /// Period of the redial timer.
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub keepalive: KeepAlive,
    pub frame: FrameConfig,
    pub handshake: HandshakeConfig,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            device_name: device_name.into(),
            scopes: ScopeSet::system_only(),
            reconnect_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            keepalive: KeepAlive::default(),
            frame: FrameConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }

    pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
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
}

/// Connection state of a [`DuplexClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Dialing,
    Connected,
    /// Terminal.
    Stopped,
}

struct ClientShared {
    config: ClientConfig,
    table: Arc<ScopeTable>,
    holder: ConnectionHolder,
    state: watch::Sender<ClientState>,
    link_id: RwLock<Option<String>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
    span: Span,
}

impl ClientShared {
    /// Publish `next` unless the client has stopped.
    fn set_state(&self, next: ClientState) {
        self.state.send_if_modified(|state| {
            if *state == ClientState::Stopped || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn set_link_id(&self, link_id: Option<String>) {
        *self.link_id.write().unwrap_or_else(PoisonError::into_inner) = link_id;
    }

    fn declared_scopes(&self) -> ScopeSet {
        self.config.scopes.union(self.table.scopes())
    }

    /// Connect and greet. The greeting is the first frame on every connection.
    async fn dial(&self) -> Result<Arc<FramedConnection>> {
        let stream = connect(&self.config.server_addr, self.config.connect_timeout).await?;
        if let Err(err) = apply_keepalive(&stream, &self.config.keepalive) {
            warn!(error = %err, "failed to enable keep-alive");
        }
        let conn = Arc::new(FramedConnection::new(stream, self.config.frame.clone())?);

        let greeting = greeting_packet(
            &self.config.handshake,
            &self.config.device_name,
            self.declared_scopes(),
        )?;
        conn.write_frame(greeting.encode()?).await?;
        Ok(conn)
    }

    /// Clear `conn` from the holder if it is still current.
    fn drop_connection(&self, conn: &Arc<FramedConnection>) {
        if self.holder.close_if(conn) {
            self.set_link_id(None);
            self.set_state(ClientState::Disconnected);
        }
    }
}

/// Device side of a duplex link.
///
/// Keeps one connection to the server, redialing every
/// [`reconnect_interval`](ClientConfig::reconnect_interval) while none is
/// held. Packets sent while disconnected fail with
/// [`PeerError::NotConnected`]; nothing is queued.
pub struct DuplexClient {
    shared: Arc<ClientShared>,
}

impl DuplexClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::build(config, CancellationToken::new())
    }

    /// A client that also stops when `parent` is cancelled.
    pub fn with_shutdown(config: ClientConfig, parent: &CancellationToken) -> Self {
        Self::build(config, parent.child_token())
    }

    fn build(config: ClientConfig, shutdown: CancellationToken) -> Self {
        let span = info_span!(
            "duplex_client",
            server = %config.server_addr,
            device = %config.device_name
        );
        let (state, _) = watch::channel(ClientState::Disconnected);
        Self {
            shared: Arc::new(ClientShared {
                config,
                table: Arc::new(ScopeTable::new()),
                holder: ConnectionHolder::new(),
                state,
                link_id: RwLock::new(None),
                shutdown,
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
                span,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Handlers for packets arriving from the server.
    pub fn table(&self) -> &ScopeTable {
        &self.shared.table
    }

    /// Start the redial timer. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(PeerError::Stopped);
        }
        if shared.started.swap(true, Ordering::SeqCst) {
            return Err(PeerError::AlreadyStarted);
        }
        shared
            .tracker
            .spawn(reconnect_loop(Arc::clone(shared)).instrument(shared.span.clone()));
        Ok(())
    }

    /// Stop redialing, close the connection, and wait for the client's tasks
    /// to end. Idempotent.
    pub async fn stop(&self) {
        let shared = &self.shared;
        shared.shutdown.cancel();
        shared.holder.close();
        shared.tracker.close();
        shared.tracker.wait().await;
        shared.set_link_id(None);
        shared.state.send_if_modified(|state| {
            let changed = *state != ClientState::Stopped;
            *state = ClientState::Stopped;
            changed
        });
        shared.span.in_scope(|| info!("client stopped"));
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Wait until the client reaches `target`.
    ///
    /// Fails with [`PeerError::Stopped`] if the client stops first (unless
    /// `target` is `Stopped`).
    pub async fn wait_for_state(&self, target: ClientState) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        let reached = rx
            .wait_for(|state| *state == target || *state == ClientState::Stopped)
            .await
            .map(|state| *state)
            .map_err(|_| PeerError::Stopped)?;
        if reached == target {
            Ok(())
        } else {
            Err(PeerError::Stopped)
        }
    }

    /// Link id assigned by the server in its welcome, for the current
    /// connection.
    pub fn link_id(&self) -> Option<String> {
        self.shared
            .link_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.holder.is_connected()
    }
}

impl Transporter for DuplexClient {
    /// An empty `dev_name` is filled in with this client's device name. A
    /// socket write failure drops the connection and the timer redials. An
    /// oversized packet is refused without touching the connection.
    async fn send_packet(&self, mut packet: Packet) -> Result<()> {
        let shared = &self.shared;
        let conn = shared.holder.get().ok_or(PeerError::NotConnected)?;

        if packet.dev_name.is_empty() {
            packet.dev_name = shared.config.device_name.clone();
        }
        let payload = packet.encode()?;

        debug!(%packet, "sending packet");
        if let Err(err) = conn.write_frame(payload).await {
            if err.breaks_connection() {
                shared
                    .span
                    .in_scope(|| warn!(error = %err, "write failed; dropping connection"));
                shared.drop_connection(&conn);
            }
            return Err(err.into());
        }
        Ok(())
    }
}

impl ScopeRegistrar for DuplexClient {
    fn add_scope_item(&self, item: ScopeItem) {
        self.shared.table.add_scope_item(item);
    }
}

impl Drop for DuplexClient {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.holder.close();
    }
}

async fn reconnect_loop(shared: Arc<ClientShared>) {
    // tokio intervals reject a zero period.
    let period = shared.config.reconnect_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if shared.holder.get().is_some() {
            continue;
        }

        shared.set_state(ClientState::Dialing);
        let dialed = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            dialed = shared.dial() => dialed,
        };

        match dialed {
            Ok(conn) => {
                shared.holder.set(Arc::clone(&conn));
                if shared.shutdown.is_cancelled() {
                    shared.holder.close();
                    break;
                }
                shared.set_state(ClientState::Connected);
                info!(peer = %conn.peer_addr(), "connected");
                shared.tracker.spawn(
                    read_loop(Arc::clone(&shared), conn).instrument(Span::current()),
                );
            }
            Err(err) => {
                shared.set_state(ClientState::Disconnected);
                warn!(error = %err, retry_in = ?period, "dial failed");
            }
        }
    }

    shared.holder.close();
    debug!("reconnect loop exited");
}

async fn read_loop(shared: Arc<ClientShared>, conn: Arc<FramedConnection>) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            frame = conn.read_frame() => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => {
                info!("connection closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "frame read failed; dropping connection");
                break;
            }
        };

        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, "malformed packet; dropping connection");
                break;
            }
        };
        debug!(%packet, "packet received");

        if is_welcome(&packet) {
            match read_welcome(&packet) {
                Ok(welcome) => {
                    info!(link_id = %welcome.link_id, scopes = %welcome.scopes, "welcomed by server");
                    shared.set_link_id(Some(welcome.link_id));
                }
                Err(err) => warn!(error = %err, "ignoring malformed welcome"),
            }
            continue;
        }

        shared.table.dispatch(&packet);
    }

    shared.drop_connection(&conn);
}
