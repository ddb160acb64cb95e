//! UDP relay for the SOCKS5 UDP ASSOCIATE command
//!
//! A single socket carries both halves of the association: datagrams
//! arriving from the client's address are unwrapped and forwarded to
//! their destination, and datagrams from anywhere else are wrapped in
//! the SOCKS5 header and returned to the client.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::AbortHandle;
use crate::dns::DnsResolver;
use crate::error::SockdError;
use crate::proto::{TargetAddr, UdpPacket};
use crate::Result;

/// A running UDP association.
pub struct UdpRelay {
    socket: UdpSocket,
    expected_ip: IpAddr,
    /// Port the client said it would send from; 0 means unknown
    expected_port: u16,
    /// Learned client address once traffic arrives
    client: Option<SocketAddr>,
    datagram_size: usize,
    resolver: Arc<dyn DnsResolver>,
}

impl UdpRelay {
    /// Bind the relay socket.
    ///
    /// `expected` is the address the client declared in the request;
    /// a zero port means the client did not know it yet and the first
    /// datagram from the expected IP pins it.
    pub async fn bind(
        expected: SocketAddr,
        datagram_size: usize,
        resolver: Arc<dyn DnsResolver>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(SockdError::network)?;
        let client = if expected.port() != 0 {
            Some(expected)
        } else {
            None
        };
        Ok(UdpRelay {
            socket,
            expected_ip: expected.ip(),
            expected_port: expected.port(),
            client,
            datagram_size,
            resolver,
        })
    }

    /// The address clients should send their datagrams to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(SockdError::network)
    }

    /// Pump datagrams until aborted.
    ///
    /// Malformed or fragmented datagrams and per-datagram send
    /// failures are dropped; only the abort signal ends the relay.
    pub async fn run(mut self, abort: AbortHandle) {
        let mut buf = vec![0u8; self.datagram_size];
        loop {
            let (len, from) = tokio::select! {
                _ = abort.aborted() => {
                    debug!("udp relay aborted");
                    return;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(err) => {
                        warn!(error = %err, "udp receive failed");
                        continue;
                    }
                },
            };

            if self.is_from_client(from) {
                self.forward_outbound(&buf[..len], from).await;
            } else {
                self.return_inbound(&buf[..len], from).await;
            }
        }
    }

    fn is_from_client(&mut self, from: SocketAddr) -> bool {
        if from.ip() != self.expected_ip {
            return false;
        }
        match self.client {
            Some(client) => from == client,
            // First datagram from the expected IP pins the port
            None if self.expected_port == 0 => {
                debug!(client = %from, "learned udp client address");
                self.client = Some(from);
                true
            }
            None => false,
        }
    }

    /// Client-to-remote direction: strip the header, forward payload.
    async fn forward_outbound(&self, raw: &[u8], from: SocketAddr) {
        let packet = match UdpPacket::parse(raw) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%from, error = %err, "dropping malformed udp datagram");
                return;
            }
        };
        if packet.is_fragmented() {
            warn!(%from, "dropping fragmented udp datagram");
            return;
        }

        let target = match &packet.addr {
            TargetAddr::Ip(addr) => *addr,
            TargetAddr::Domain(host, port) => match self.resolver.resolve(host).await {
                Ok(ip) => SocketAddr::new(ip, *port),
                Err(err) => {
                    warn!(host = %host, error = %err, "dropping udp datagram for unresolvable host");
                    return;
                }
            },
        };

        if let Err(err) = self.socket.send_to(&packet.data, target).await {
            warn!(%target, error = %err, "udp forward failed");
        }
    }

    /// Remote-to-client direction: wrap with the sender's address.
    async fn return_inbound(&self, raw: &[u8], from: SocketAddr) {
        let Some(client) = self.client else {
            debug!(%from, "udp reply before client address known, dropping");
            return;
        };

        let packet = UdpPacket::new(TargetAddr::Ip(from), Bytes::copy_from_slice(raw));
        if let Err(err) = self.socket.send_to(&packet.encode(), client).await {
            warn!(%client, error = %err, "udp return failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolver;
    use std::collections::HashMap;
    use std::time::Duration;

    fn resolver() -> Arc<dyn DnsResolver> {
        Arc::new(StaticResolver::new(HashMap::new()))
    }

    #[tokio::test]
    async fn test_relay_roundtrip() {
        // Client and remote peers
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let remote_addr = remote.local_addr().unwrap();

        let relay = UdpRelay::bind(client_addr, 65535, resolver()).await.unwrap();
        // The relay binds to the wildcard address; reach it via loopback
        let relay_addr = SocketAddr::new(
            Ipv4Addr::LOCALHOST.into(),
            relay.local_addr().unwrap().port(),
        );

        let abort = AbortHandle::new();
        let handle = tokio::spawn(relay.run(abort.clone()));

        // Client sends an encapsulated datagram to the remote
        let packet = UdpPacket::new(
            TargetAddr::Ip(remote_addr),
            Bytes::from_static(b"question"),
        );
        client.send_to(&packet.encode(), relay_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = tokio::time::timeout(
            Duration::from_secs(2),
            remote.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&buf[..len], b"question");
        assert_eq!(from.port(), relay_addr.port());

        // Remote answers; the client gets it wrapped
        remote.send_to(b"answer", relay_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(
            Duration::from_secs(2),
            client.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        let reply = UdpPacket::parse(&buf[..len]).unwrap();
        assert_eq!(reply.addr, TargetAddr::Ip(remote_addr));
        assert_eq!(&reply.data[..], b"answer");

        abort.abort();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_fragmented_datagrams_dropped() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let remote_addr = remote.local_addr().unwrap();

        let relay = UdpRelay::bind(client_addr, 65535, resolver()).await.unwrap();
        let relay_addr = SocketAddr::new(
            Ipv4Addr::LOCALHOST.into(),
            relay.local_addr().unwrap().port(),
        );
        let abort = AbortHandle::new();
        let handle = tokio::spawn(relay.run(abort.clone()));

        let mut packet = UdpPacket::new(
            TargetAddr::Ip(remote_addr),
            Bytes::from_static(b"fragment"),
        );
        packet.frag = 1;
        client.send_to(&packet.encode(), relay_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let outcome =
            tokio::time::timeout(Duration::from_millis(200), remote.recv_from(&mut buf)).await;
        assert!(outcome.is_err(), "fragmented datagram must not be forwarded");

        abort.abort();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn test_port_learned_from_first_datagram() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        // Client declared its IP but not its port
        let declared = SocketAddr::new(client_addr.ip(), 0);
        let mut relay = UdpRelay::bind(declared, 65535, resolver()).await.unwrap();

        assert!(relay.client.is_none());
        assert!(relay.is_from_client(client_addr));
        assert_eq!(relay.client, Some(client_addr));

        // A different port from the same IP is no longer the client
        let other = SocketAddr::new(client_addr.ip(), client_addr.port().wrapping_add(1));
        assert!(!relay.is_from_client(other));
    }
}
