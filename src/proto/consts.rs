//! SOCKS protocol constants
//!
//! Defines all wire-level constants for SOCKS4 and SOCKS5.

/// SOCKS4 protocol version
pub const SOCKS4_VERSION: u8 = 0x04;
/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;
/// Version field of a SOCKS4 reply (always 0)
pub const SOCKS4_REPLY_VERSION: u8 = 0x00;

/// SOCKS5 authentication sub-negotiation version (RFC 1929)
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;
/// Sub-negotiation success status
pub const SOCKS5_AUTH_SUCCESS: u8 = 0x00;
/// Sub-negotiation failure status
pub const SOCKS5_AUTH_FAILURE: u8 = 0x01;

// Commands
/// TCP CONNECT command
pub const SOCKS_CMD_CONNECT: u8 = 0x01;
/// TCP BIND command
pub const SOCKS_CMD_BIND: u8 = 0x02;
/// UDP ASSOCIATE command (SOCKS5 only)
pub const SOCKS_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types (SOCKS5)
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// SOCKS5 reply codes
/// Succeeded
pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
/// General SOCKS server failure
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
/// Connection not allowed by ruleset
pub const SOCKS5_REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
/// Network unreachable
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
/// Host unreachable
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
/// TTL expired
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
/// Command not supported
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

// SOCKS4 reply codes
/// Request granted
pub const SOCKS4_REPLY_GRANTED: u8 = 90;
/// Request rejected or failed
pub const SOCKS4_REPLY_REJECTED: u8 = 91;
/// Request failed, server cannot connect to client's identd
pub const SOCKS4_REPLY_NO_IDENTD: u8 = 92;
/// Request failed, identd reports a different user-id
pub const SOCKS4_REPLY_BAD_IDENTD: u8 = 93;

// Reserved byte
/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

// Limits
/// Maximum domain name length on the wire
pub const MAX_DOMAIN_LEN: usize = 255;
/// Relay copy buffer size
pub const RELAY_BUFFER_SIZE: usize = 8192;
/// Default UDP datagram buffer, a bit more than the largest possible datagram
pub const DEFAULT_UDP_DATAGRAM_SIZE: usize = 65535;
