//! Hostname resolution
//!
//! Resolution sits behind a trait so sessions, the UDP relay and the
//! proxy chain share one policy, and tests can pin hostnames without
//! touching real DNS.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SockdError;
use crate::Result;

/// Resolves hostnames to IP addresses.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolve a hostname to a single address.
    async fn resolve(&self, host: &str) -> Result<IpAddr>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        let addr = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|err| SockdError::HostResolution {
                host: host.to_string(),
                reason: err.to_string(),
            })?
            .next()
            .ok_or_else(|| SockdError::HostResolution {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            })?;
        debug!(host, ip = %addr.ip(), "resolved hostname");
        Ok(addr.ip())
    }
}

/// Resolver answering from a fixed table.
///
/// Backs the `[dns.static_hosts]` configuration section and the test
/// suite.
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
}

impl StaticResolver {
    /// Build a resolver from a hostname table. Keys are lowercased.
    pub fn new(hosts: HashMap<String, IpAddr>) -> Self {
        let hosts = hosts
            .into_iter()
            .map(|(host, ip)| (host.to_ascii_lowercase(), ip))
            .collect();
        StaticResolver { hosts }
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| SockdError::HostResolution {
                host: host.to_string(),
                reason: "not in static host table".to_string(),
            })
    }
}
