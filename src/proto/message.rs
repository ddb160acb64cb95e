//! SOCKS request and reply codecs
//!
//! Reads and writes the command request and its reply in both the
//! SOCKS4/4A and SOCKS5 wire formats. [`Request::read`] is handed the
//! [`Version`] determined during method negotiation: the SOCKS4
//! request shares its message with the version byte already consumed
//! there, while the SOCKS5 request is a separate message that opens
//! with its own VER byte.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{consts, Command, ReplyCode, TargetAddr, Version};
use crate::error::SockdError;
use crate::Result;

/// Maximum bytes accepted for a NUL-terminated SOCKS4 field.
const MAX_SOCKS4_FIELD_LEN: usize = 256;

/// A SOCKS command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Protocol version the request arrived in
    pub version: Version,
    /// Requested operation
    pub command: Command,
    /// Destination address
    pub addr: TargetAddr,
    /// SOCKS4 USERID field, absent for SOCKS5
    pub user: Option<String>,
}

impl Request {
    /// Create a CONNECT request for the given target.
    pub fn connect(version: Version, addr: TargetAddr) -> Self {
        Request {
            version,
            command: Command::Connect,
            addr,
            user: None,
        }
    }

    /// Read a request in the negotiated version's framing.
    pub async fn read<S>(stream: &mut S, version: Version) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        match version {
            Version::Socks4 => Self::read_socks4(stream).await,
            Version::Socks5 => Self::read_socks5(stream).await,
        }
    }

    /// SOCKS4 request: CD, DSTPORT, DSTIP, USERID NUL [HOSTNAME NUL].
    ///
    /// A DSTIP of 0.0.0.x with x != 0 marks the SOCKS4A extension: the
    /// real destination follows as a NUL-terminated hostname.
    async fn read_socks4<S>(stream: &mut S) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let command = Command::from_byte(stream.read_u8().await?)?;
        let port = stream.read_u16().await?;
        let mut octets = [0u8; 4];
        stream.read_exact(&mut octets).await?;

        let user = read_nul_terminated(stream).await?;
        let user = if user.is_empty() { None } else { Some(user) };

        let ip = Ipv4Addr::from(octets);
        let addr = if octets[0] == 0 && octets[1] == 0 && octets[2] == 0 && octets[3] != 0 {
            let hostname = read_nul_terminated(stream).await?;
            TargetAddr::domain(hostname, port)?
        } else {
            TargetAddr::ipv4(ip, port)
        };

        Ok(Request {
            version: Version::Socks4,
            command,
            addr,
            user,
        })
    }

    /// SOCKS5 request: VER, CMD, RSV, ATYP, DST.ADDR, DST.PORT.
    ///
    /// Unlike SOCKS4, the request is its own message after the method
    /// negotiation, so it opens with another version byte.
    async fn read_socks5<S>(stream: &mut S) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let ver = stream.read_u8().await?;
        if ver != consts::SOCKS5_VERSION {
            return Err(SockdError::Handshake(format!(
                "invalid request version: {:#04x}",
                ver
            )));
        }
        let command = Command::from_byte(stream.read_u8().await?)?;
        let _reserved = stream.read_u8().await?;
        let addr = TargetAddr::read(stream).await?;

        Ok(Request {
            version: Version::Socks5,
            command,
            addr,
            user: None,
        })
    }

    /// Write the full request, version byte included.
    ///
    /// Used when this server acts as a client towards an upstream
    /// proxy.
    pub async fn write<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(32);
        match self.version {
            Version::Socks4 => {
                buf.push(consts::SOCKS4_VERSION);
                buf.push(self.command.to_byte());
                buf.extend_from_slice(&self.addr.port().to_be_bytes());
                match &self.addr {
                    TargetAddr::Ip(SocketAddr::V4(v4)) => {
                        buf.extend_from_slice(&v4.ip().octets());
                        push_user(&mut buf, self.user.as_deref());
                    }
                    TargetAddr::Domain(domain, _) => {
                        // SOCKS4A: impossible destination IP, hostname trails
                        buf.extend_from_slice(&[0, 0, 0, 1]);
                        push_user(&mut buf, self.user.as_deref());
                        buf.extend_from_slice(domain.as_bytes());
                        buf.push(0);
                    }
                    TargetAddr::Ip(SocketAddr::V6(_)) => {
                        return Err(SockdError::protocol(
                            ReplyCode::AddressTypeNotSupported,
                            "SOCKS4 cannot carry an IPv6 destination",
                        ));
                    }
                }
            }
            Version::Socks5 => {
                buf.push(consts::SOCKS5_VERSION);
                buf.push(self.command.to_byte());
                buf.push(consts::SOCKS5_RESERVED);
                buf.extend_from_slice(&self.addr.to_bytes());
            }
        }
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// A SOCKS reply to a command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Protocol version negotiated with the client
    pub version: Version,
    /// Result code
    pub code: ReplyCode,
    /// Bound or connected address reported to the client
    pub addr: TargetAddr,
}

impl Reply {
    /// Create a reply; a missing address encodes as 0.0.0.0:0.
    pub fn new(version: Version, code: ReplyCode, addr: Option<SocketAddr>) -> Self {
        Reply {
            version,
            code,
            addr: addr.map(TargetAddr::from).unwrap_or_default(),
        }
    }

    /// Read a reply from an upstream proxy.
    pub async fn read<S>(stream: &mut S, version: Version) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        match version {
            Version::Socks4 => {
                let vn = stream.read_u8().await?;
                if vn != consts::SOCKS4_REPLY_VERSION {
                    return Err(SockdError::Handshake(format!(
                        "bad SOCKS4 reply version: {:#04x}",
                        vn
                    )));
                }
                let code = ReplyCode::from_wire(Version::Socks4, stream.read_u8().await?);
                let port = stream.read_u16().await?;
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                Ok(Reply {
                    version,
                    code,
                    addr: TargetAddr::ipv4(Ipv4Addr::from(octets), port),
                })
            }
            Version::Socks5 => {
                let ver = stream.read_u8().await?;
                if ver != consts::SOCKS5_VERSION {
                    return Err(SockdError::Handshake(format!(
                        "bad SOCKS5 reply version: {:#04x}",
                        ver
                    )));
                }
                let code = ReplyCode::from_wire(Version::Socks5, stream.read_u8().await?);
                let _reserved = stream.read_u8().await?;
                let addr = TargetAddr::read(stream).await?;
                Ok(Reply {
                    version,
                    code,
                    addr,
                })
            }
        }
    }

    /// Error out unless the reply granted the request.
    pub fn check_granted(&self) -> Result<()> {
        if self.code == ReplyCode::Granted {
            return Ok(());
        }
        let reason = match self.version {
            Version::Socks4 => {
                ReplyCode::socks4_reason(self.code.to_wire(Version::Socks4)).to_string()
            }
            Version::Socks5 => format!("upstream proxy refused the request: {:?}", self.code),
        };
        Err(SockdError::protocol(self.code, reason))
    }

    /// Write the reply to the client.
    pub async fn write<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(22);
        match self.version {
            Version::Socks4 => {
                buf.push(consts::SOCKS4_REPLY_VERSION);
                buf.push(self.code.to_wire(Version::Socks4));
                buf.extend_from_slice(&self.addr.port().to_be_bytes());
                match &self.addr {
                    TargetAddr::Ip(SocketAddr::V4(v4)) => {
                        buf.extend_from_slice(&v4.ip().octets());
                    }
                    // Non-IPv4 addresses cannot be expressed; zero-fill
                    _ => buf.extend_from_slice(&[0, 0, 0, 0]),
                }
            }
            Version::Socks5 => {
                buf.push(consts::SOCKS5_VERSION);
                buf.push(self.code.to_wire(Version::Socks5));
                buf.push(consts::SOCKS5_RESERVED);
                buf.extend_from_slice(&self.addr.to_bytes());
            }
        }
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Read a NUL-terminated field, capped to keep malformed clients from
/// pinning the session.
async fn read_nul_terminated<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == 0 {
            break;
        }
        if buf.len() >= MAX_SOCKS4_FIELD_LEN {
            return Err(SockdError::Handshake(
                "SOCKS4 field exceeds maximum length".to_string(),
            ));
        }
        buf.push(byte);
    }
    String::from_utf8(buf)
        .map_err(|_| SockdError::Handshake("SOCKS4 field is not valid UTF-8".to_string()))
}

fn push_user(buf: &mut Vec<u8>, user: Option<&str>) {
    if let Some(user) = user {
        buf.extend_from_slice(user.as_bytes());
    }
    buf.push(0);
}
