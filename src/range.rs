//! Destination matching for direct-connection rules
//!
//! A proxy hop may carry a list of destinations that should bypass it.
//! Entries are CIDR blocks (`10.0.0.0/8`), single IPs, exact hostnames
//! (`db.internal`) or domain suffixes (`.example.com`).

use std::net::IpAddr;

use crate::error::SockdError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    /// Network with prefix length
    Cidr { net: IpAddr, prefix: u8 },
    /// Exact hostname, lowercased
    Host(String),
    /// Domain suffix, lowercased, leading dot stripped
    Suffix(String),
}

/// A set of destination patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressRange {
    entries: Vec<Entry>,
}

impl AddressRange {
    /// Parse a list of pattern strings.
    pub fn parse(patterns: &[String]) -> Result<Self> {
        let mut entries = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            entries.push(Self::parse_entry(pattern)?);
        }
        Ok(AddressRange { entries })
    }

    fn parse_entry(pattern: &str) -> Result<Entry> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(SockdError::ChainConfig(
                "empty destination pattern".to_string(),
            ));
        }

        if let Some((net, prefix)) = pattern.split_once('/') {
            let net: IpAddr = net.parse().map_err(|_| {
                SockdError::ChainConfig(format!("bad network in pattern: {}", pattern))
            })?;
            let prefix: u8 = prefix.parse().map_err(|_| {
                SockdError::ChainConfig(format!("bad prefix in pattern: {}", pattern))
            })?;
            let max = if net.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(SockdError::ChainConfig(format!(
                    "prefix out of range in pattern: {}",
                    pattern
                )));
            }
            return Ok(Entry::Cidr { net, prefix });
        }

        if let Ok(ip) = pattern.parse::<IpAddr>() {
            let prefix = if ip.is_ipv4() { 32 } else { 128 };
            return Ok(Entry::Cidr { net: ip, prefix });
        }

        if let Some(suffix) = pattern.strip_prefix('.') {
            if suffix.is_empty() {
                return Err(SockdError::ChainConfig(
                    "empty domain suffix pattern".to_string(),
                ));
            }
            return Ok(Entry::Suffix(suffix.to_ascii_lowercase()));
        }

        Ok(Entry::Host(pattern.to_ascii_lowercase()))
    }

    /// Whether this range is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a destination against the range.
    ///
    /// IPs are checked against the CIDR entries; the hostname, when the
    /// client supplied one, is checked against host and suffix entries.
    pub fn matches(&self, ip: Option<IpAddr>, hostname: Option<&str>) -> bool {
        self.entries.iter().any(|entry| match entry {
            Entry::Cidr { net, prefix } => {
                ip.map(|ip| cidr_contains(*net, *prefix, ip)).unwrap_or(false)
            }
            Entry::Host(host) => hostname
                .map(|h| h.eq_ignore_ascii_case(host))
                .unwrap_or(false),
            Entry::Suffix(suffix) => hostname
                .map(|h| {
                    let h = h.to_ascii_lowercase();
                    h == *suffix || h.ends_with(&format!(".{}", suffix))
                })
                .unwrap_or(false),
        })
    }
}

/// Prefix comparison over the numeric form of both addresses.
fn cidr_contains(net: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            if prefix == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - prefix as u32);
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            if prefix == 0 {
                return true;
            }
            let mask = u128::MAX << (128 - prefix as u32);
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}
