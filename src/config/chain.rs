//! Proxy chain configuration types

use serde::{Deserialize, Serialize};

use crate::chain::ProxyHop;
use crate::proto::Version;
use crate::range::AddressRange;
use crate::Result;

/// One `[[chain]]` entry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HopConfig {
    /// Proxy hostname or IP
    pub host: String,

    /// Proxy port
    pub port: u16,

    /// Protocol spoken to this proxy
    pub version: Version,

    /// Username for SOCKS5 password auth, or the SOCKS4 USERID
    #[serde(default)]
    pub username: Option<String>,

    /// Password for SOCKS5 password auth
    #[serde(default)]
    pub password: Option<String>,

    /// Destinations that bypass the chain (CIDR, IP, hostname or
    /// `.suffix` patterns); only honored on the first hop
    #[serde(default)]
    pub direct: Vec<String>,
}

impl HopConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.host.is_empty() {
            return Err("chain hop host must not be empty".to_string());
        }
        if self.version == Version::Socks5 && self.username.is_some() != self.password.is_some() {
            return Err(format!(
                "chain hop {} needs both username and password, or neither",
                self.host
            ));
        }
        AddressRange::parse(&self.direct).map_err(|err| err.to_string())?;
        Ok(())
    }

    /// Build the runtime hop.
    pub fn build(&self) -> Result<ProxyHop> {
        let mut hop = ProxyHop::new(self.host.clone(), self.port, self.version);
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                hop = hop.with_credentials(user.clone(), pass.clone());
            }
            // SOCKS4 carries only a USERID
            (Some(user), None) if self.version == Version::Socks4 => {
                hop = hop.with_credentials(user.clone(), String::new());
            }
            _ => {}
        }
        hop = hop.with_direct(AddressRange::parse(&self.direct)?);
        Ok(hop)
    }
}
