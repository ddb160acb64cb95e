//! Configuration module
//!
//! TOML configuration for the proxy server: listener settings,
//! authentication, the upstream chain and static DNS entries.

mod chain;
mod server;

pub use chain::HopConfig;
pub use server::{AuthConfig, AuthScheme, Config, DnsConfig, ServerConfig};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Version;

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 1080);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.auth.scheme, AuthScheme::None);
        assert!(config.chain.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[server]
listen = "0.0.0.0"
port = 1080
backlog = 256
idle_timeout_ms = 60000
accept_timeout_ms = 30000
udp_datagram_size = 32768

[auth]
scheme = "password"

[auth.users]
alice = "wonderland"
bob = "builder"

[[chain]]
host = "gateway.example"
port = 1080
version = "socks5"
username = "relay"
password = "secret"
direct = ["10.0.0.0/8", ".internal"]

[[chain]]
host = "exit.example"
port = 1080
version = "socks4"

[dns.static_hosts]
"app.internal" = "10.0.0.42"
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.server.backlog, 256);
        assert_eq!(config.server.idle_timeout_ms, 60_000);
        assert_eq!(config.auth.scheme, AuthScheme::Password);
        assert_eq!(config.auth.users.len(), 2);
        assert_eq!(config.chain.len(), 2);
        assert_eq!(config.chain[0].version, Version::Socks5);
        assert_eq!(config.chain[1].version, Version::Socks4);
        assert_eq!(config.dns.static_hosts.len(), 1);
    }

    #[test]
    fn test_password_scheme_requires_users() {
        let config_str = r#"
[auth]
scheme = "password"
"#;
        assert!(parse_config(config_str).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sockd.toml");
        std::fs::write(&path, "[server]\nport = 9050\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9050);

        assert!(load_config(dir.path().join("missing.toml")).is_err());
    }
}
