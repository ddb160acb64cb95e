//! Server configuration types
//!
//! Defines the main configuration structures for the proxy server.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::HopConfig;

/// Default SOCKS port
fn default_port() -> u16 {
    1080
}

/// Default listen backlog
fn default_backlog() -> i32 {
    128
}

/// Default inactivity limit in milliseconds
fn default_idle_timeout_ms() -> u64 {
    180_000
}

/// Default BIND accept limit in milliseconds
fn default_accept_timeout_ms() -> u64 {
    180_000
}

/// Default UDP receive buffer in bytes
fn default_udp_datagram_size() -> usize {
    crate::proto::consts::DEFAULT_UDP_DATAGRAM_SIZE
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upstream proxy chain, in traversal order
    #[serde(default)]
    pub chain: Vec<HopConfig>,

    /// DNS configuration
    #[serde(default)]
    pub dns: DnsConfig,
}

impl Config {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        self.auth.validate()?;
        for hop in &self.chain {
            hop.validate()?;
        }
        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to listen on; all interfaces when unset
    #[serde(default)]
    pub listen: Option<IpAddr>,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,

    /// Inactivity limit for handshakes and relays; 0 disables it
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// How long a BIND waits for its inbound connection; 0 disables it
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,

    /// UDP receive buffer size
    #[serde(default = "default_udp_datagram_size")]
    pub udp_datagram_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: None,
            port: default_port(),
            backlog: default_backlog(),
            idle_timeout_ms: default_idle_timeout_ms(),
            accept_timeout_ms: default_accept_timeout_ms(),
            udp_datagram_size: default_udp_datagram_size(),
        }
    }
}

/// Admission policy selection
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Admit everyone
    None,
    /// RFC 1929 username/password (SOCKS5 only)
    Password,
}

/// Authentication configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// Selected scheme
    #[serde(default = "default_scheme")]
    pub scheme: AuthScheme,

    /// Credential table for the password scheme
    #[serde(default)]
    pub users: HashMap<String, String>,
}

fn default_scheme() -> AuthScheme {
    AuthScheme::None
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            scheme: default_scheme(),
            users: HashMap::new(),
        }
    }
}

impl AuthConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.scheme == AuthScheme::Password && self.users.is_empty() {
            return Err("Password authentication selected but no users configured".to_string());
        }
        Ok(())
    }
}

/// DNS configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DnsConfig {
    /// Fixed hostname table consulted instead of system DNS
    #[serde(default)]
    pub static_hosts: HashMap<String, IpAddr>,
}
