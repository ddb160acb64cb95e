//! SOCKS protocol primitives
//!
//! Wire-level types shared by the server, the relay handlers and the
//! upstream proxy chain: protocol versions, commands, reply codes,
//! target addresses, request/reply codecs and UDP encapsulation.

pub mod addr;
pub mod consts;
pub mod message;
pub mod udp;

pub use addr::TargetAddr;
pub use message::{Reply, Request};
pub use udp::UdpPacket;

use crate::error::SockdError;
use crate::Result;

/// SOCKS protocol version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// SOCKS4 / SOCKS4A
    Socks4,
    /// SOCKS5 (RFC 1928)
    Socks5,
}

impl Version {
    /// Parses a version byte taken from the first octet of a request.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            consts::SOCKS4_VERSION => Ok(Version::Socks4),
            consts::SOCKS5_VERSION => Ok(Version::Socks5),
            other => Err(SockdError::Handshake(format!(
                "unsupported protocol version: {:#04x}",
                other
            ))),
        }
    }

    /// Returns the version byte as it appears in a request.
    pub fn to_byte(self) -> u8 {
        match self {
            Version::Socks4 => consts::SOCKS4_VERSION,
            Version::Socks5 => consts::SOCKS5_VERSION,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::Socks4 => write!(f, "SOCKS4"),
            Version::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

/// SOCKS request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Establish an outbound TCP connection
    Connect,
    /// Wait for an inbound TCP connection
    Bind,
    /// Set up a UDP relay (SOCKS5 only)
    UdpAssociate,
}

impl Command {
    /// Parses a command byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            consts::SOCKS_CMD_CONNECT => Ok(Command::Connect),
            consts::SOCKS_CMD_BIND => Ok(Command::Bind),
            consts::SOCKS_CMD_UDP_ASSOCIATE => Ok(Command::UdpAssociate),
            other => Err(SockdError::protocol(
                ReplyCode::CommandNotSupported,
                format!("unsupported command: {:#04x}", other),
            )),
        }
    }

    /// Returns the command byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Connect => consts::SOCKS_CMD_CONNECT,
            Command::Bind => consts::SOCKS_CMD_BIND,
            Command::UdpAssociate => consts::SOCKS_CMD_UDP_ASSOCIATE,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect => write!(f, "CONNECT"),
            Command::Bind => write!(f, "BIND"),
            Command::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Result code carried in a SOCKS reply.
///
/// The variants follow the SOCKS5 code space; [`ReplyCode::to_wire`]
/// collapses them onto the SOCKS4 code space when replying to a
/// SOCKS4 client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// Request granted
    Granted,
    /// General server failure
    GeneralFailure,
    /// Connection not allowed by ruleset
    RulesetRejected,
    /// Network unreachable
    NetworkUnreachable,
    /// Host unreachable
    HostUnreachable,
    /// Connection refused by the destination
    ConnectionRefused,
    /// TTL expired / operation timed out
    TtlExpired,
    /// Command not supported
    CommandNotSupported,
    /// Address type not supported
    AddressTypeNotSupported,
    /// SOCKS4: server cannot connect to the client's identd
    NoIdentd,
    /// SOCKS4: identd reports a different user-id
    BadIdentd,
    /// Unassigned code received from a remote proxy
    Other(u8),
}

impl ReplyCode {
    /// Encodes the code for the given protocol version.
    ///
    /// Every SOCKS5 failure maps to the single SOCKS4 "rejected or
    /// failed" code; SOCKS4 clients get no finer diagnostics.
    pub fn to_wire(self, version: Version) -> u8 {
        match version {
            Version::Socks5 => match self {
                ReplyCode::Granted => consts::SOCKS5_REPLY_SUCCEEDED,
                ReplyCode::GeneralFailure => consts::SOCKS5_REPLY_GENERAL_FAILURE,
                ReplyCode::RulesetRejected => consts::SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
                ReplyCode::NetworkUnreachable => consts::SOCKS5_REPLY_NETWORK_UNREACHABLE,
                ReplyCode::HostUnreachable => consts::SOCKS5_REPLY_HOST_UNREACHABLE,
                ReplyCode::ConnectionRefused => consts::SOCKS5_REPLY_CONNECTION_REFUSED,
                ReplyCode::TtlExpired => consts::SOCKS5_REPLY_TTL_EXPIRED,
                ReplyCode::CommandNotSupported => consts::SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
                ReplyCode::AddressTypeNotSupported => {
                    consts::SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED
                }
                ReplyCode::NoIdentd | ReplyCode::BadIdentd => {
                    consts::SOCKS5_REPLY_GENERAL_FAILURE
                }
                ReplyCode::Other(code) => code,
            },
            Version::Socks4 => match self {
                ReplyCode::Granted => consts::SOCKS4_REPLY_GRANTED,
                ReplyCode::NoIdentd => consts::SOCKS4_REPLY_NO_IDENTD,
                ReplyCode::BadIdentd => consts::SOCKS4_REPLY_BAD_IDENTD,
                _ => consts::SOCKS4_REPLY_REJECTED,
            },
        }
    }

    /// Decodes a reply code received from an upstream proxy.
    pub fn from_wire(version: Version, byte: u8) -> Self {
        match version {
            Version::Socks5 => match byte {
                consts::SOCKS5_REPLY_SUCCEEDED => ReplyCode::Granted,
                consts::SOCKS5_REPLY_GENERAL_FAILURE => ReplyCode::GeneralFailure,
                consts::SOCKS5_REPLY_CONNECTION_NOT_ALLOWED => ReplyCode::RulesetRejected,
                consts::SOCKS5_REPLY_NETWORK_UNREACHABLE => ReplyCode::NetworkUnreachable,
                consts::SOCKS5_REPLY_HOST_UNREACHABLE => ReplyCode::HostUnreachable,
                consts::SOCKS5_REPLY_CONNECTION_REFUSED => ReplyCode::ConnectionRefused,
                consts::SOCKS5_REPLY_TTL_EXPIRED => ReplyCode::TtlExpired,
                consts::SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => ReplyCode::CommandNotSupported,
                consts::SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => {
                    ReplyCode::AddressTypeNotSupported
                }
                other => ReplyCode::Other(other),
            },
            Version::Socks4 => match byte {
                consts::SOCKS4_REPLY_GRANTED => ReplyCode::Granted,
                consts::SOCKS4_REPLY_REJECTED => ReplyCode::GeneralFailure,
                consts::SOCKS4_REPLY_NO_IDENTD => ReplyCode::NoIdentd,
                consts::SOCKS4_REPLY_BAD_IDENTD => ReplyCode::BadIdentd,
                other => ReplyCode::Other(other),
            },
        }
    }

    /// Human-readable description of a SOCKS4 reply code.
    pub fn socks4_reason(byte: u8) -> &'static str {
        match byte {
            consts::SOCKS4_REPLY_GRANTED => "Request Granted",
            consts::SOCKS4_REPLY_REJECTED => "Request Rejected or Failed",
            consts::SOCKS4_REPLY_NO_IDENTD => "Failed request, can't connect to Identd",
            consts::SOCKS4_REPLY_BAD_IDENTD => "Failed request, bad user name",
            _ => "Unknown Reply Code",
        }
    }
}
