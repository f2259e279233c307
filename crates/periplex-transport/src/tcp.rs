use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// TCP keep-alive settings applied to every dialed or accepted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Idle time before the first keep-alive probe.
    pub idle: Duration,
    /// Interval between unanswered probes.
    pub interval: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(30),
            interval: Duration::from_secs(10),
        }
    }
}

/// A bound TCP listener that hands out configured peer streams.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind and listen on `addr` (`host:port`; port 0 picks a free port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        Ok((stream, peer))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Dial `addr`, giving up after `timeout`.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(TransportError::Connect {
                addr: addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            })
        }
    };
    debug!(addr, "connected to tcp endpoint");
    Ok(stream)
}

/// Enable TCP keep-alive and disable Nagle on an established stream.
pub fn apply_keepalive(stream: &TcpStream, keepalive: &KeepAlive) -> Result<()> {
    let peer = stream.peer_addr()?;
    let option_err = |source| TransportError::SocketOption { peer, source };

    stream.set_nodelay(true).map_err(option_err)?;

    let params = TcpKeepalive::new().with_time(keepalive.idle);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        windows
    ))]
    let params = params.with_interval(keepalive.interval);

    SockRef::from(stream)
        .set_tcp_keepalive(&params)
        .map_err(option_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn bind_accept_connect() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().to_string();

        let client = tokio::spawn(async move {
            let mut stream = connect(&addr, Duration::from_secs(2)).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let (mut server, peer) = acceptor.accept().await.unwrap();
        assert!(peer.ip().is_loopback());
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        client.await.unwrap();
    }

    #[tokio::test]
    async fn bind_rejects_address_in_use() {
        let first = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();

        let result = TcpAcceptor::bind(&taken).await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        let addr = {
            let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
            acceptor.local_addr().to_string()
        };

        let result = connect(&addr, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn keepalive_is_enabled_on_stream() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().to_string();

        let client = connect(&addr, Duration::from_secs(2)).await.unwrap();
        let (_server, _) = acceptor.accept().await.unwrap();

        apply_keepalive(&client, &KeepAlive::default()).unwrap();

        assert!(SockRef::from(&client).keepalive().unwrap());
        assert!(client.nodelay().unwrap());
    }
}
