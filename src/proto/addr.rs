//! Target address handling
//!
//! Defines the destination address carried by SOCKS requests and
//! replies. Can be an IP address (v4 or v6) or a domain name.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

use super::consts;
use crate::error::SockdError;
use crate::proto::ReplyCode;
use crate::Result;

/// Target address for SOCKS requests
///
/// Represents the destination address in a SOCKS request.
/// Can be an IP address (v4 or v6) or a domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port
    ///
    /// The domain is lowercased and length-checked; hostnames longer
    /// than the wire limit cannot be forwarded to an upstream proxy.
    pub fn domain(domain: impl Into<String>, port: u16) -> Result<Self> {
        let domain = domain.into().to_ascii_lowercase();
        if domain.is_empty() || domain.len() > consts::MAX_DOMAIN_LEN {
            return Err(SockdError::protocol(
                ReplyCode::AddressTypeNotSupported,
                format!("invalid domain name length: {}", domain.len()),
            ));
        }
        Ok(TargetAddr::Domain(domain, port))
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Get the address type byte for the SOCKS5 wire format
    pub fn addr_type(&self) -> u8 {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => consts::SOCKS5_ADDR_TYPE_IPV4,
            TargetAddr::Ip(SocketAddr::V6(_)) => consts::SOCKS5_ADDR_TYPE_IPV6,
            TargetAddr::Domain(_, _) => consts::SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }

    /// Returns the hostname if this address is a domain name
    pub fn hostname(&self) -> Option<&str> {
        match self {
            TargetAddr::Domain(domain, _) => Some(domain),
            TargetAddr::Ip(_) => None,
        }
    }

    /// Read a SOCKS5 address (ATYP + ADDR + PORT) from the stream
    pub async fn read<S>(stream: &mut S) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let atyp = stream.read_u8().await?;
        match atyp {
            consts::SOCKS5_ADDR_TYPE_IPV4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                Ok(TargetAddr::ipv4(Ipv4Addr::from(octets), port))
            }
            consts::SOCKS5_ADDR_TYPE_IPV6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await?;
                let port = stream.read_u16().await?;
                Ok(TargetAddr::ipv6(Ipv6Addr::from(octets), port))
            }
            consts::SOCKS5_ADDR_TYPE_DOMAIN => {
                let len = stream.read_u8().await? as usize;
                let mut buf = vec![0u8; len];
                stream.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf).map_err(|_| {
                    SockdError::protocol(
                        ReplyCode::AddressTypeNotSupported,
                        "domain name is not valid UTF-8",
                    )
                })?;
                let port = stream.read_u16().await?;
                TargetAddr::domain(domain, port)
            }
            other => Err(SockdError::protocol(
                ReplyCode::AddressTypeNotSupported,
                format!("unsupported address type: {:#04x}", other),
            )),
        }
    }

    /// Serialize the address to the SOCKS5 wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                bytes.push(consts::SOCKS5_ADDR_TYPE_IPV4);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                bytes.push(consts::SOCKS5_ADDR_TYPE_IPV6);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Domain(domain, port) => {
                bytes.push(consts::SOCKS5_ADDR_TYPE_DOMAIN);
                bytes.push(domain.len() as u8);
                bytes.extend_from_slice(domain.as_bytes());
                bytes.extend_from_slice(&port.to_be_bytes());
            }
        }

        bytes
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl Default for TargetAddr {
    fn default() -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 0))
    }
}
