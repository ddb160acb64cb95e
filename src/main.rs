//! sockd - SOCKS4/SOCKS5 proxy server
//!
//! This is the main entry point for the sockd daemon.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sockd::config::{load_config, AuthScheme, Config};
use sockd::{
    Authenticator, DnsResolver, LogMonitor, Password, PermitAll, ProxyChain, ProxyServer,
    StaticResolver, SystemResolver,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// sockd - SOCKS4/SOCKS5 proxy server with upstream chaining
#[derive(Parser, Debug)]
#[command(name = "sockd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    listen: Option<IpAddr>,

    /// Log per-stream traffic totals
    #[arg(long)]
    log_traffic: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };

    info!("sockd v{}", sockd::VERSION);

    let listen = args.listen.or(config.server.listen);
    let port = args.port.unwrap_or(config.server.port);

    let server = Arc::new(build_server(&config, args.log_traffic)?);

    // Handle Ctrl+C and termination signals
    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received Ctrl+C, shutting down...");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, shutting down...");
                        }
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        stopper.stop();
    });

    server.start(listen, port).await?;
    Ok(())
}

/// Assemble the server from the loaded configuration.
fn build_server(config: &Config, log_traffic: bool) -> Result<ProxyServer> {
    let auth: Arc<dyn Authenticator> = match config.auth.scheme {
        AuthScheme::None => Arc::new(PermitAll),
        AuthScheme::Password => Arc::new(Password::new(config.auth.users.clone())),
    };

    let hops = config
        .chain
        .iter()
        .map(|hop| hop.build())
        .collect::<sockd::Result<Vec<_>>>()
        .context("invalid chain configuration")?;

    let resolver: Arc<dyn DnsResolver> = if config.dns.static_hosts.is_empty() {
        Arc::new(SystemResolver)
    } else {
        let hosts: HashMap<String, IpAddr> = config.dns.static_hosts.clone();
        Arc::new(StaticResolver::new(hosts))
    };

    let mut server = ProxyServer::new(auth)
        .with_chain(ProxyChain::new(hops))
        .with_resolver(resolver);
    if log_traffic {
        server = server.with_monitor(Arc::new(LogMonitor));
    }
    server.set_idle_timeout(std::time::Duration::from_millis(
        config.server.idle_timeout_ms,
    ));
    server.set_accept_timeout(std::time::Duration::from_millis(
        config.server.accept_timeout_ms,
    ));
    server.set_udp_datagram_size(config.server.udp_datagram_size);
    server.set_backlog(config.server.backlog);

    Ok(server)
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
