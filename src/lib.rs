//! # Sockd - SOCKS4/SOCKS5 Proxy Server
//!
//! Sockd is a SOCKS proxy server that speaks both SOCKS4 (including the
//! SOCKS4A hostname extension) and SOCKS5. It implements all three SOCKS
//! commands - CONNECT, two-phase BIND, and UDP ASSOCIATE - and can forward
//! sessions through a chain of upstream SOCKS proxies, translating the
//! command to each hop's protocol version.
//!
//! ## Features
//!
//! - **Dual Protocol**: SOCKS4, SOCKS4A and SOCKS5 on the same port
//! - **Full Command Set**: CONNECT, two-phase BIND and UDP ASSOCIATE
//! - **Proxy Chaining**: forward through zero or more upstream SOCKS hops,
//!   with per-hop direct-routing bypass ranges
//! - **Pluggable Authentication**: no-auth and RFC 1929 username/password
//!   schemes included; bring your own via the [`Authenticator`] trait
//! - **Traffic Accounting**: byte counters via the [`TrafficMonitor`] trait
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sockd::{auth::PermitAll, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Arc::new(ProxyServer::new(Arc::new(PermitAll)));
//!     server.start(None, 1080).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The server accepts TCP connections and runs one session task per client.
//! A session negotiates the handshake through the configured authenticator,
//! decodes a single request message, and dispatches on the command:
//!
//! ```text
//! Client -> Session -> [ProxyChain] -> Target
//!                   \-> UdpRelay   <-> UDP peers
//! ```

#![warn(rust_2018_idioms)]

pub mod auth;
pub mod chain;
pub mod config;
pub mod dns;
pub mod error;
pub mod monitor;
pub mod proto;
pub mod range;
pub mod relay;
pub mod server;
pub mod session;

// Re-export commonly used items
pub use auth::{Authenticator, Negotiated, Password, PermitAll};
pub use chain::{BindListener, ProxyChain, ProxyHop};
pub use config::{load_config, Config};
pub use dns::{DnsResolver, StaticResolver, SystemResolver};
pub use error::{NetworkErrorKind, SockdError};
pub use monitor::{Endpoint, LogMonitor, NullMonitor, TrafficMonitor};
pub use range::AddressRange;
pub use relay::AbortHandle;
pub use server::{ProxyServer, ServerStatus, SocketOpts};

use tokio::io::{AsyncRead, AsyncWrite};

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, SockdError>;

/// Object-safe alias for the byte streams a session works on.
///
/// The authenticator is allowed to wrap the raw client socket (and the
/// traffic monitor wraps both ends), so everything past the accept loop
/// handles streams through this trait object.
pub trait StreamDyn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamDyn for T {}

/// A boxed [`StreamDyn`].
pub type BoxedStream = Box<dyn StreamDyn>;

/// Version of the Sockd library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
