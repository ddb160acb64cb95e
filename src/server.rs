//! Proxy server
//!
//! Owns the listening socket and the accept loop. Each accepted
//! connection is served by a spawned [`ConnectionSession`]; the server
//! itself only tracks lifecycle state and shutdown.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::chain::ProxyChain;
use crate::dns::{DnsResolver, SystemResolver};
use crate::error::SockdError;
use crate::monitor::{NullMonitor, TrafficMonitor};
use crate::session::{ConnectionSession, SessionParams};
use crate::Result;

/// Default inactivity limit for handshakes and relays.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(180);
/// Default wait for the inbound half of a BIND.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(180);
/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 128;

/// Lifecycle state of a [`ProxyServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Not serving
    Stopped,
    /// Listener bound, accept loop running
    Started,
    /// Failed to bind or accept fatally
    Error,
}

/// Socket options applied to every accepted connection.
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Apply the options to a TCP stream.
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// A SOCKS4/SOCKS5 proxy server.
pub struct ProxyServer {
    params: SessionParams,
    socket_opts: SocketOpts,
    backlog: i32,
    status: watch::Sender<ServerStatus>,
    shutdown: Arc<Notify>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ProxyServer {
    /// Create a server with the given admission policy and defaults
    /// everywhere else: no chain, system DNS, no traffic metering.
    pub fn new(auth: Arc<dyn Authenticator>) -> Self {
        let (status, _) = watch::channel(ServerStatus::Stopped);
        ProxyServer {
            params: SessionParams {
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
                udp_datagram_size: crate::proto::consts::DEFAULT_UDP_DATAGRAM_SIZE,
                chain: Arc::new(ProxyChain::default()),
                auth,
                resolver: Arc::new(SystemResolver),
                monitor: Arc::new(NullMonitor),
            },
            socket_opts: SocketOpts::default(),
            backlog: DEFAULT_BACKLOG,
            status,
            shutdown: Arc::new(Notify::new()),
            local_addr: Mutex::new(None),
        }
    }

    /// Route outbound connections through an upstream chain.
    pub fn with_chain(mut self, chain: ProxyChain) -> Self {
        self.params.chain = Arc::new(chain);
        self
    }

    /// Replace the hostname resolution policy.
    pub fn with_resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.params.resolver = resolver;
        self
    }

    /// Attach a traffic monitor.
    pub fn with_monitor(mut self, monitor: Arc<dyn TrafficMonitor>) -> Self {
        self.params.monitor = monitor;
        self
    }

    /// Override socket options for accepted connections.
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set the idle timeout; zero disables it.
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.params.idle_timeout = timeout;
    }

    /// Set the BIND accept timeout; zero disables it.
    pub fn set_accept_timeout(&mut self, timeout: Duration) {
        self.params.accept_timeout = timeout;
    }

    /// Set the UDP receive buffer size.
    pub fn set_udp_datagram_size(&mut self, size: usize) {
        self.params.udp_datagram_size = size;
    }

    /// Set the listen backlog.
    pub fn set_backlog(&mut self, backlog: i32) {
        self.backlog = backlog;
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ServerStatus {
        *self.status.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    /// The bound listening address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind and serve until [`ProxyServer::stop`] is called.
    pub async fn start(&self, bind_addr: Option<IpAddr>, port: u16) -> Result<()> {
        let bind = SocketAddr::new(
            bind_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port,
        );
        let listener = match self.bind_listener(bind) {
            Ok(listener) => listener,
            Err(err) => {
                error!(%bind, error = %err, "failed to bind");
                self.status.send_replace(ServerStatus::Error);
                return Err(err);
            }
        };
        let local = listener.local_addr().map_err(SockdError::network)?;
        *self
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(local);
        // send_replace: the state must advance even with no subscribers
        self.status.send_replace(ServerStatus::Started);
        info!(addr = %local, "proxy server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        if let Err(err) = self.socket_opts.apply(&stream) {
                            warn!(%peer, error = %err, "failed to apply socket options");
                        }
                        let params = self.params.clone();
                        tokio::spawn(ConnectionSession::run(params, stream));
                    }
                    Err(err) => {
                        // Transient accept failures (EMFILE and friends)
                        warn!(error = %err, "accept failed");
                    }
                },
            }
        }

        self.status.send_replace(ServerStatus::Stopped);
        *self
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        info!(addr = %local, "proxy server stopped");
        Ok(())
    }

    /// Ask the accept loop to wind down.
    ///
    /// In-flight sessions are not interrupted.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Wait until the server reports the given status.
    pub async fn await_status(&self, wanted: ServerStatus) -> Result<()> {
        let mut receiver = self.status.subscribe();
        loop {
            if *receiver.borrow_and_update() == wanted {
                return Ok(());
            }
            receiver.changed().await.map_err(|_| {
                SockdError::Handshake("server status channel closed".to_string())
            })?;
        }
    }

    /// Build the listener with an explicit backlog.
    fn bind_listener(&self, bind: SocketAddr) -> Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(bind), Type::STREAM, None)
            .map_err(SockdError::network)?;
        socket.set_reuse_address(true).map_err(SockdError::network)?;
        socket.set_nonblocking(true).map_err(SockdError::network)?;
        socket.bind(&bind.into()).map_err(SockdError::network)?;
        socket.listen(self.backlog).map_err(SockdError::network)?;
        TcpListener::from_std(socket.into()).map_err(SockdError::network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PermitAll;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_server() -> Arc<ProxyServer> {
        Arc::new(ProxyServer::new(Arc::new(PermitAll)))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = test_server();
        assert_eq!(server.status(), ServerStatus::Stopped);

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move {
            runner
                .start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0)
                .await
        });

        server.await_status(ServerStatus::Started).await.unwrap();
        let addr = server.local_addr().expect("bound address");
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(addr.port(), 0);

        server.stop();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_status_advances_without_subscribers() {
        let server = test_server();
        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move {
            runner
                .start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0)
                .await
        });

        // Poll status() directly; nothing ever subscribes
        let mut started = false;
        for _ in 0..100 {
            if server.status() == ServerStatus::Started {
                started = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(started, "server never reported Started");

        server.stop();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_bind_failure_reports_error_status() {
        // Take a port, then ask a second server for it
        let first = test_server();
        let holder = Arc::clone(&first);
        let task = tokio::spawn(async move {
            holder
                .start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0)
                .await
        });
        first.await_status(ServerStatus::Started).await.unwrap();
        let taken = first.local_addr().unwrap();

        let second = test_server();
        let outcome = second
            .start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), taken.port())
            .await;
        assert!(outcome.is_err());
        assert_eq!(second.status(), ServerStatus::Error);

        first.stop();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }

    #[tokio::test]
    async fn test_serves_socks5_connect() {
        // Echo target
        let target = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
        });

        let server = test_server();
        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move {
            runner
                .start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0)
                .await
        });
        server.await_status(ServerStatus::Started).await.unwrap();
        let proxy_addr = server.local_addr().unwrap();

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [5, 0]);

        let mut req = vec![5u8, 1, 0, 1, 127, 0, 0, 1];
        req.extend_from_slice(&target_addr.port().to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.stop();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }
}
