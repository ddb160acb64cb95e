//! Upstream proxy chaining
//!
//! Outbound connections can be forwarded through a chain of upstream
//! SOCKS proxies instead of opened directly. The chain dials the first
//! hop, then issues a CONNECT through each hop to reach the next,
//! speaking each hop's own protocol version, until the final hop
//! connects (or binds) on behalf of the requested destination.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::SockdError;
use crate::proto::{consts, Command, Reply, ReplyCode, Request, TargetAddr, Version};
use crate::range::AddressRange;
use crate::Result;

/// One upstream proxy in the chain.
#[derive(Debug, Clone)]
pub struct ProxyHop {
    /// Proxy hostname or IP
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Protocol spoken to this proxy
    pub version: Version,
    /// Credentials for SOCKS5 password auth, or the SOCKS4 USERID
    pub credentials: Option<(String, String)>,
    /// Destinations that bypass the chain entirely
    pub direct: AddressRange,
}

impl ProxyHop {
    /// A hop with no credentials and no direct-connection rules.
    pub fn new(host: impl Into<String>, port: u16, version: Version) -> Self {
        ProxyHop {
            host: host.into(),
            port,
            version,
            credentials: None,
            direct: AddressRange::default(),
        }
    }

    /// Attach credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), pass.into()));
        self
    }

    /// Attach direct-connection rules.
    pub fn with_direct(mut self, direct: AddressRange) -> Self {
        self.direct = direct;
        self
    }

    /// The hop as a request destination for the previous hop.
    fn as_target(&self) -> Result<TargetAddr> {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => Ok(TargetAddr::Ip(SocketAddr::new(ip, self.port))),
            Err(_) => TargetAddr::domain(self.host.as_str(), self.port),
        }
    }
}

/// An ordered list of upstream proxies.
///
/// An empty chain connects directly; that is the default.
#[derive(Debug, Clone, Default)]
pub struct ProxyChain {
    hops: Vec<ProxyHop>,
}

impl ProxyChain {
    /// Build a chain from hops in traversal order.
    pub fn new(hops: Vec<ProxyHop>) -> Self {
        ProxyChain { hops }
    }

    /// Whether this destination skips the chain.
    pub fn is_direct(&self, ip: Option<IpAddr>, hostname: Option<&str>) -> bool {
        match self.hops.first() {
            None => true,
            Some(hop) => hop.direct.matches(ip, hostname),
        }
    }

    /// Open a TCP connection to the destination, through the chain
    /// unless the destination matches a direct-connection rule.
    pub async fn connect(
        &self,
        target: SocketAddr,
        hostname: Option<&str>,
    ) -> Result<TcpStream> {
        if self.is_direct(Some(target.ip()), hostname) {
            debug!(%target, "connecting directly");
            return TcpStream::connect(target).await.map_err(SockdError::network);
        }

        let mut stream = self.dial_last_hop().await?;
        let last = self.hops.last().ok_or_else(|| {
            SockdError::ChainConfig("chain unexpectedly empty".to_string())
        })?;
        issue_request(&mut stream, last, Command::Connect, TargetAddr::Ip(target)).await?;
        Ok(stream)
    }

    /// Arrange an inbound listener for a BIND request.
    pub async fn listen(&self, target: SocketAddr) -> Result<BindListener> {
        if self.is_direct(Some(target.ip()), None) {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
                .await
                .map_err(SockdError::network)?;
            return Ok(BindListener::Direct(listener));
        }

        let mut stream = self.dial_last_hop().await?;
        let last = self.hops.last().ok_or_else(|| {
            SockdError::ChainConfig("chain unexpectedly empty".to_string())
        })?;
        handshake(&mut stream, last).await?;
        Request {
            version: last.version,
            command: Command::Bind,
            addr: TargetAddr::Ip(target),
            user: socks4_user(last),
        }
        .write(&mut stream)
        .await?;

        let first = Reply::read(&mut stream, last.version).await?;
        first.check_granted()?;
        let mut bound = match first.addr {
            TargetAddr::Ip(addr) => addr,
            TargetAddr::Domain(_, port) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port),
        };
        // An unspecified bound IP means "the proxy's own address"
        if bound.ip().is_unspecified() {
            let peer = stream.peer_addr().map_err(SockdError::network)?;
            bound.set_ip(peer.ip());
        }

        Ok(BindListener::Chained(ChainedAccept {
            stream: Some(stream),
            version: last.version,
            bound,
        }))
    }

    /// Connect to the first hop and tunnel through intermediate hops
    /// until the stream speaks to the last hop.
    async fn dial_last_hop(&self) -> Result<TcpStream> {
        let first = self.hops.first().ok_or_else(|| {
            SockdError::ChainConfig("chain unexpectedly empty".to_string())
        })?;
        debug!(host = %first.host, port = first.port, "dialing first hop");
        let mut stream = TcpStream::connect((first.host.as_str(), first.port))
            .await
            .map_err(SockdError::network)?;

        for window in self.hops.windows(2) {
            let (current, next) = (&window[0], &window[1]);
            debug!(from = %current.host, to = %next.host, "extending chain");
            issue_request(&mut stream, current, Command::Connect, next.as_target()?).await?;
        }
        Ok(stream)
    }
}

/// Run the hop's opening negotiation, then a command request.
async fn issue_request(
    stream: &mut TcpStream,
    hop: &ProxyHop,
    command: Command,
    addr: TargetAddr,
) -> Result<()> {
    handshake(stream, hop).await?;
    Request {
        version: hop.version,
        command,
        addr,
        user: socks4_user(hop),
    }
    .write(stream)
    .await?;
    let reply = Reply::read(stream, hop.version).await?;
    reply.check_granted()
}

/// Client-side method negotiation with a hop. SOCKS4 has none.
async fn handshake(stream: &mut TcpStream, hop: &ProxyHop) -> Result<()> {
    if hop.version == Version::Socks4 {
        return Ok(());
    }

    let methods: &[u8] = if hop.credentials.is_some() {
        &[
            consts::SOCKS5_AUTH_METHOD_NONE,
            consts::SOCKS5_AUTH_METHOD_PASSWORD,
        ]
    } else {
        &[consts::SOCKS5_AUTH_METHOD_NONE]
    };
    let mut hello = vec![consts::SOCKS5_VERSION, methods.len() as u8];
    hello.extend_from_slice(methods);
    stream.write_all(&hello).await?;
    stream.flush().await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != consts::SOCKS5_VERSION {
        return Err(SockdError::Handshake(format!(
            "bad method selection version from {}: {:#04x}",
            hop.host, choice[0]
        )));
    }
    match choice[1] {
        consts::SOCKS5_AUTH_METHOD_NONE => Ok(()),
        consts::SOCKS5_AUTH_METHOD_PASSWORD => {
            let (user, pass) = hop.credentials.as_ref().ok_or_else(|| {
                SockdError::Handshake(format!(
                    "{} demands credentials but none are configured",
                    hop.host
                ))
            })?;
            sub_negotiate(stream, user, pass).await
        }
        other => Err(SockdError::Handshake(format!(
            "no acceptable auth method with {}: {:#04x}",
            hop.host, other
        ))),
    }
}

/// Client side of the RFC 1929 sub-negotiation.
async fn sub_negotiate(stream: &mut TcpStream, user: &str, pass: &str) -> Result<()> {
    let mut request = vec![consts::SOCKS5_AUTH_VERSION, user.len() as u8];
    request.extend_from_slice(user.as_bytes());
    request.push(pass.len() as u8);
    request.extend_from_slice(pass.as_bytes());
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[1] != consts::SOCKS5_AUTH_SUCCESS {
        return Err(SockdError::Handshake(
            "upstream proxy rejected credentials".to_string(),
        ));
    }
    Ok(())
}

/// SOCKS4 carries the username inline in the request.
fn socks4_user(hop: &ProxyHop) -> Option<String> {
    match hop.version {
        Version::Socks4 => hop.credentials.as_ref().map(|(user, _)| user.clone()),
        Version::Socks5 => None,
    }
}

/// Where an inbound BIND connection will arrive.
pub enum BindListener {
    /// A locally bound listener; any number of peers may knock
    Direct(TcpListener),
    /// A chained BIND; the proxy delivers exactly one connection
    Chained(ChainedAccept),
}

/// Pending accept on an upstream proxy's BIND.
pub struct ChainedAccept {
    stream: Option<TcpStream>,
    version: Version,
    bound: SocketAddr,
}

impl BindListener {
    /// The address the client should advertise to its peer.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            BindListener::Direct(listener) => {
                listener.local_addr().map_err(SockdError::network)
            }
            BindListener::Chained(chained) => Ok(chained.bound),
        }
    }

    /// Chained BINDs deliver a single connection; a direct listener
    /// can be polled repeatedly.
    pub fn is_single_shot(&self) -> bool {
        matches!(self, BindListener::Chained(_))
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&mut self) -> Result<(TcpStream, SocketAddr)> {
        match self {
            BindListener::Direct(listener) => {
                listener.accept().await.map_err(SockdError::network)
            }
            BindListener::Chained(chained) => {
                let mut stream = chained.stream.take().ok_or_else(|| {
                    SockdError::protocol(
                        ReplyCode::GeneralFailure,
                        "chained BIND accepts a single connection",
                    )
                })?;
                let second = Reply::read(&mut stream, chained.version).await?;
                second.check_granted()?;
                let peer = match second.addr {
                    TargetAddr::Ip(addr) => addr,
                    TargetAddr::Domain(_, port) => {
                        SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port)
                    }
                };
                Ok((stream, peer))
            }
        }
    }
}
