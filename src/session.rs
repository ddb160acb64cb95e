//! Client session handling
//!
//! One [`ConnectionSession`] drives an accepted connection end to end:
//! authentication, request parsing, command dispatch, and the data
//! relay. Failures before the relay starts are answered with an error
//! reply in the client's protocol version; after that the session
//! simply winds down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::chain::{BindListener, ProxyChain};
use crate::dns::DnsResolver;
use crate::error::{NetworkErrorKind, SockdError};
use crate::monitor::{Endpoint, TrafficMonitor};
use crate::proto::consts::RELAY_BUFFER_SIZE;
use crate::proto::{Command, Reply, ReplyCode, Request, TargetAddr, Version};
use crate::relay::{relay, AbortHandle, UdpRelay};
use crate::{BoxedStream, Result};

/// Shared knobs and collaborators for every session.
#[derive(Clone)]
pub struct SessionParams {
    /// Relay and handshake inactivity limit; zero disables it
    pub idle_timeout: Duration,
    /// How long a BIND waits for the inbound connection
    pub accept_timeout: Duration,
    /// Receive buffer for UDP associations
    pub udp_datagram_size: usize,
    /// Upstream proxy chain
    pub chain: Arc<ProxyChain>,
    /// Admission policy
    pub auth: Arc<dyn Authenticator>,
    /// Hostname resolution policy
    pub resolver: Arc<dyn DnsResolver>,
    /// Traffic accounting
    pub monitor: Arc<dyn TrafficMonitor>,
}

/// A single client connection being served.
pub struct ConnectionSession {
    params: SessionParams,
    peer: SocketAddr,
    /// Address the client connected to, advertised in UDP replies
    local: SocketAddr,
    abort: AbortHandle,
}

impl ConnectionSession {
    /// Serve one accepted connection to completion.
    pub async fn run(params: SessionParams, stream: TcpStream) {
        let (peer, local) = match (stream.peer_addr(), stream.local_addr()) {
            (Ok(peer), Ok(local)) => (peer, local),
            _ => return,
        };
        let session = ConnectionSession {
            params,
            peer,
            local,
            abort: AbortHandle::new(),
        };
        session.serve(stream).await;
    }

    async fn serve(self, stream: TcpStream) {
        let client: BoxedStream =
            self.params
                .monitor
                .wrap(Endpoint::Client, Box::new(stream), self.peer, None);

        let negotiated = match self
            .with_idle(self.params.auth.start_session(client))
            .await
        {
            Ok(Some(negotiated)) => negotiated,
            Ok(None) => {
                debug!(peer = %self.peer, "session refused during negotiation");
                return;
            }
            Err(err) => {
                debug!(peer = %self.peer, error = %err, "negotiation failed");
                return;
            }
        };
        let version = negotiated.version;
        let user = negotiated.user;
        let mut client = negotiated.stream;

        let outcome = self
            .handle_request(&mut client, version, user.as_deref())
            .await;
        if let Err(err) = outcome {
            debug!(peer = %self.peer, error = %err, "session failed");
            let reply = Reply::new(version, err.reply_code(version), None);
            // Best effort; the client may already be gone
            let _ = reply.write(&mut client).await;
        }

        self.params.auth.end_session(user.as_deref());
    }

    async fn handle_request(
        &self,
        client: &mut BoxedStream,
        version: Version,
        user: Option<&str>,
    ) -> Result<()> {
        let request = self
            .with_idle(Request::read(client, version))
            .await?;
        info!(
            peer = %self.peer,
            %version,
            command = %request.command,
            target = %request.addr,
            user = user.unwrap_or("-"),
            "request received"
        );

        if !self.params.auth.check_request(&request, self.peer) {
            return Err(SockdError::protocol(
                ReplyCode::RulesetRejected,
                "request rejected",
            ));
        }

        // Resolve the destination; the hostname sticks around for
        // direct-connection matching
        let hostname = request.addr.hostname().map(str::to_string);
        let target = self.resolve_target(&request.addr).await?;

        match request.command {
            Command::Connect => {
                self.on_connect(client, version, target, hostname.as_deref(), user)
                    .await
            }
            Command::Bind => self.on_bind(client, version, target, user).await,
            Command::UdpAssociate => self.on_udp(client, version, target).await,
        }
    }

    async fn resolve_target(&self, addr: &TargetAddr) -> Result<SocketAddr> {
        match addr {
            TargetAddr::Ip(addr) => Ok(*addr),
            TargetAddr::Domain(host, port) => {
                let ip = self.params.resolver.resolve(host).await?;
                Ok(SocketAddr::new(ip, *port))
            }
        }
    }

    /// CONNECT: open the outbound side, grant, relay.
    async fn on_connect(
        &self,
        client: &mut BoxedStream,
        version: Version,
        target: SocketAddr,
        hostname: Option<&str>,
        user: Option<&str>,
    ) -> Result<()> {
        let remote = self.params.chain.connect(target, hostname).await?;
        let local_addr = remote.local_addr().ok();

        Reply::new(version, ReplyCode::Granted, local_addr)
            .write(client)
            .await?;

        let mut remote =
            self.params
                .monitor
                .wrap(Endpoint::Remote, Box::new(remote), target, user);
        let (up, down) = relay(
            client,
            &mut remote,
            self.params.idle_timeout,
            &self.abort,
        )
        .await;
        info!(peer = %self.peer, %target, bytes_up = up, bytes_down = down, "connect session done");
        Ok(())
    }

    /// BIND: grant with the listening address, wait for the peer,
    /// grant again with the peer's address, relay.
    ///
    /// Data the client sends while the accept is pending is buffered
    /// and delivered to the peer once it connects.
    async fn on_bind(
        &self,
        client: &mut BoxedStream,
        version: Version,
        target: SocketAddr,
        user: Option<&str>,
    ) -> Result<()> {
        let mut listener = self.params.chain.listen(target).await?;
        let mut bound = listener.local_addr()?;
        // Advertise the address the client already reaches us on
        if bound.ip().is_unspecified() {
            bound.set_ip(self.local.ip());
        }

        Reply::new(version, ReplyCode::Granted, Some(bound))
            .write(client)
            .await?;

        let accept = accept_expected(&mut listener, target, self.params.accept_timeout);
        tokio::pin!(accept);

        // Buffer at most one relay chunk of early data; once full the
        // client is no longer polled and TCP backpressure holds the rest
        let mut early_data = Vec::new();
        let mut buf = [0u8; 1024];
        let (inbound, peer) = loop {
            let room = (RELAY_BUFFER_SIZE - early_data.len()).min(buf.len());
            tokio::select! {
                accepted = &mut accept => break accepted?,
                read = client.read(&mut buf[..room]), if room > 0 => match read? {
                    // Client hung up while waiting
                    0 => return Ok(()),
                    n => early_data.extend_from_slice(&buf[..n]),
                },
                _ = self.abort.aborted() => return Ok(()),
            }
        };

        Reply::new(version, ReplyCode::Granted, Some(peer))
            .write(client)
            .await?;

        let mut inbound =
            self.params
                .monitor
                .wrap(Endpoint::Remote, Box::new(inbound), peer, user);
        if !early_data.is_empty() {
            inbound.write_all(&early_data).await?;
            inbound.flush().await?;
        }

        let (up, down) = relay(
            client,
            &mut inbound,
            self.params.idle_timeout,
            &self.abort,
        )
        .await;
        info!(peer = %self.peer, bind_peer = %peer, bytes_up = up, bytes_down = down, "bind session done");
        Ok(())
    }

    /// UDP ASSOCIATE: stand up a datagram relay and keep it alive for
    /// as long as the control connection stays open.
    async fn on_udp(
        &self,
        client: &mut BoxedStream,
        version: Version,
        expected: SocketAddr,
    ) -> Result<()> {
        if version == Version::Socks4 {
            return Err(SockdError::protocol(
                ReplyCode::CommandNotSupported,
                "UDP ASSOCIATE requires SOCKS5",
            ));
        }

        // An unspecified client address means "same host as the
        // control connection"
        let mut expected = expected;
        if expected.ip().is_unspecified() {
            expected.set_ip(self.peer.ip());
        }

        let udp = UdpRelay::bind(
            expected,
            self.params.udp_datagram_size,
            Arc::clone(&self.params.resolver),
        )
        .await?;
        let mut relay_addr = udp.local_addr()?;
        // Advertise the address the client already reaches us on
        if relay_addr.ip().is_unspecified() {
            relay_addr.set_ip(self.local.ip());
        }

        Reply::new(version, ReplyCode::Granted, Some(relay_addr))
            .write(client)
            .await?;
        info!(peer = %self.peer, relay = %relay_addr, "udp association established");

        tokio::select! {
            _ = udp.run(self.abort.clone()) => {}
            _ = drain_control(client) => {}
        }
        self.abort.abort();
        info!(peer = %self.peer, "udp association ended");
        Ok(())
    }

    /// Bound a future by the idle timeout; zero disables the bound.
    async fn with_idle<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        if self.params.idle_timeout.is_zero() {
            return fut.await;
        }
        match timeout(self.params.idle_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SockdError::network(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "session idle timeout",
            ))),
        }
    }
}

/// Wait for the inbound BIND connection from the expected host.
///
/// On a direct listener, connections from other hosts are dropped and
/// the wait continues on the remaining time budget. On a chained
/// listener there is exactly one delivery; a mismatched peer fails
/// the request.
async fn accept_expected(
    listener: &mut BindListener,
    target: SocketAddr,
    accept_timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    if listener.is_single_shot() {
        let (stream, peer) = bounded_accept(listener, accept_timeout).await?;
        if !peer.ip().is_unspecified() && peer.ip() != target.ip() {
            return Err(SockdError::protocol(
                ReplyCode::GeneralFailure,
                format!("unexpected bind peer: {}", peer),
            ));
        }
        return Ok((stream, peer));
    }

    let deadline = Instant::now() + accept_timeout;
    loop {
        let remaining = if accept_timeout.is_zero() {
            Duration::ZERO
        } else {
            deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or_else(accept_timed_out)?
        };
        let (stream, peer) = bounded_accept(listener, remaining).await?;
        if peer.ip() == target.ip() {
            return Ok((stream, peer));
        }
        warn!(%peer, expected = %target.ip(), "dropping bind connection from unexpected host");
    }
}

async fn bounded_accept(
    listener: &mut BindListener,
    remaining: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    if remaining.is_zero() {
        return listener.accept().await;
    }
    match timeout(remaining, listener.accept()).await {
        Ok(result) => result,
        Err(_) => Err(accept_timed_out()),
    }
}

fn accept_timed_out() -> SockdError {
    SockdError::Network {
        kind: NetworkErrorKind::Timeout,
        source: std::io::Error::new(std::io::ErrorKind::TimedOut, "bind accept timed out"),
    }
}

/// Watch the UDP control connection; the association lives until the
/// client closes it.
async fn drain_control(client: &mut BoxedStream) {
    let mut buf = [0u8; 64];
    loop {
        match client.read(&mut buf).await {
            Ok(0) => {
                debug!("control stream closed, terminating udp association");
                return;
            }
            Ok(_) => warn!("unexpected data on udp control stream"),
            Err(err) => {
                debug!(error = %err, "control stream error");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PermitAll;
    use crate::dns::SystemResolver;
    use crate::monitor::NullMonitor;
    use tokio::net::TcpListener;

    fn params() -> SessionParams {
        SessionParams {
            idle_timeout: Duration::from_secs(5),
            accept_timeout: Duration::from_secs(5),
            udp_datagram_size: 65535,
            chain: Arc::new(ProxyChain::default()),
            auth: Arc::new(PermitAll),
            resolver: Arc::new(SystemResolver),
            monitor: Arc::new(NullMonitor),
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_socks4_connect_roundtrip() {
        // Echo target
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
        });

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(ConnectionSession::run(params(), server));

        // SOCKS4 CONNECT to the echo target
        let mut req = vec![4u8, 1];
        req.extend_from_slice(&target_addr.port().to_be_bytes());
        match target_addr.ip() {
            std::net::IpAddr::V4(ip) => req.extend_from_slice(&ip.octets()),
            _ => unreachable!(),
        }
        req.extend_from_slice(b"tester\0");
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], 0);
        assert_eq!(reply[1], 90);

        client.write_all(b"echo").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo");

        drop(client);
        let _ = tokio::time::timeout(Duration::from_secs(2), session).await;
    }

    #[tokio::test]
    async fn test_socks4_connect_refused_gets_91() {
        // A port that refuses connections
        let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(ConnectionSession::run(params(), server));

        let mut req = vec![4u8, 1];
        req.extend_from_slice(&dead_addr.port().to_be_bytes());
        req.extend_from_slice(&[127, 0, 0, 1]);
        req.push(0);
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], 0);
        assert_eq!(reply[1], 91);

        let _ = tokio::time::timeout(Duration::from_secs(2), session).await;
    }

    #[tokio::test]
    async fn test_socks5_udp_over_socks4_rejected() {
        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(ConnectionSession::run(params(), server));

        // SOCKS4 has no UDP ASSOCIATE; command 3 is unknown there
        let mut req = vec![4u8, 3, 0x00, 0x35, 127, 0, 0, 1];
        req.push(0);
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 91);

        let _ = tokio::time::timeout(Duration::from_secs(2), session).await;
    }

    #[tokio::test]
    async fn test_socks5_connect_domain_localhost() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = target.accept().await.unwrap();
            conn.write_all(b"hi").await.unwrap();
        });

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(ConnectionSession::run(params(), server));

        // Greeting, then CONNECT to "localhost"
        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [5, 0]);

        let mut req = vec![5u8, 1, 0, 3, 9];
        req.extend_from_slice(b"localhost");
        req.extend_from_slice(&target_addr.port().to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut head = [0u8; 4];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(head[1], 0x00);
        // Skip the bound address
        let skip = match head[3] {
            1 => 6,
            4 => 18,
            other => panic!("unexpected atyp {}", other),
        };
        let mut rest = vec![0u8; skip];
        client.read_exact(&mut rest).await.unwrap();

        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        drop(client);
        let _ = tokio::time::timeout(Duration::from_secs(2), session).await;
    }

    #[tokio::test]
    async fn test_bind_accept_drops_unexpected_peer_and_keeps_waiting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut bind = BindListener::Direct(listener);
        // The client expects a peer we will never be
        let target: SocketAddr = "10.9.9.9:80".parse().unwrap();

        let started = Instant::now();
        let waiter = tokio::spawn(async move {
            accept_expected(&mut bind, target, Duration::from_millis(400)).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut stranger = TcpStream::connect(addr).await.unwrap();
        let mut byte = [0u8; 1];
        let read = stranger.read(&mut byte).await.unwrap();
        assert_eq!(read, 0, "mismatched peer should be dropped");

        let err = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            SockdError::Network {
                kind: NetworkErrorKind::Timeout,
                ..
            }
        ));
        assert!(started.elapsed() >= Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_bind_early_data_is_bounded() {
        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(ConnectionSession::run(params(), server));

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await.unwrap();

        // BIND expecting a loopback peer
        let mut req = vec![5u8, 2, 0, 1, 127, 0, 0, 1];
        req.extend_from_slice(&9999u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);

        // Flood early data while the accept is pending: the session
        // stops draining after one relay chunk, so the writes must
        // back up long before the accept timeout
        let chunk = vec![0u8; 64 * 1024];
        let mut accepted = 0usize;
        loop {
            match timeout(Duration::from_millis(200), client.write_all(&chunk)).await {
                Ok(Ok(())) => accepted += chunk.len(),
                _ => break,
            }
            assert!(
                accepted <= 32 * 1024 * 1024,
                "early data kept draining instead of backing up"
            );
        }

        drop(client);
        let _ = tokio::time::timeout(Duration::from_secs(2), session).await;
    }

    #[tokio::test]
    async fn test_request_rejection_replies_before_any_outbound() {
        struct RejectAll;

        #[async_trait::async_trait]
        impl Authenticator for RejectAll {
            async fn start_session(
                &self,
                stream: BoxedStream,
            ) -> Result<Option<crate::auth::Negotiated>> {
                PermitAll.start_session(stream).await
            }

            fn check_request(&self, _request: &Request, _peer: SocketAddr) -> bool {
                false
            }
        }

        let mut p = params();
        p.auth = Arc::new(RejectAll);

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(ConnectionSession::run(p, server));

        let mut req = vec![4u8, 1, 0x00, 0x50, 127, 0, 0, 1];
        req.push(0);
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 91);

        let _ = tokio::time::timeout(Duration::from_secs(2), session).await;
    }
}
