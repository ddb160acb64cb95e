//! Session authentication
//!
//! An [`Authenticator`] owns the opening exchange of every session: it
//! reads the version byte, runs whatever method negotiation the chosen
//! policy requires, and hands back the stream for command processing.
//! It is consulted again for each parsed request, and notified when
//! the session ends.

pub mod password;
pub mod permit_all;

pub use password::Password;
pub use permit_all::PermitAll;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::proto::{Request, Version};
use crate::{BoxedStream, Result};

/// Outcome of a successful opening negotiation.
pub struct Negotiated {
    /// The client stream, possibly replaced by a wrapping decorator
    pub stream: BoxedStream,
    /// Protocol version announced by the client
    pub version: Version,
    /// Authenticated username, when the method produced one
    pub user: Option<String>,
}

/// Admission policy for client sessions.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run the opening negotiation.
    ///
    /// `Ok(None)` means the client was turned away cleanly (refusal
    /// already written to the wire where the protocol calls for one);
    /// the session closes without further output.
    async fn start_session(&self, stream: BoxedStream) -> Result<Option<Negotiated>>;

    /// Authorize a parsed request. Default: allow everything.
    fn check_request(&self, _request: &Request, _peer: SocketAddr) -> bool {
        true
    }

    /// Called once when a session it admitted finishes.
    fn end_session(&self, _user: Option<&str>) {}
}

/// Read the version byte and the SOCKS5 method list, if any.
///
/// For SOCKS4 there is no negotiation; the caller proceeds straight to
/// the request. For SOCKS5 the offered method bytes are returned.
pub(crate) async fn read_methods(
    stream: &mut BoxedStream,
) -> Result<(Version, Option<Vec<u8>>)> {
    use tokio::io::AsyncReadExt;

    let version = Version::from_byte(stream.read_u8().await?)?;
    match version {
        Version::Socks4 => Ok((version, None)),
        Version::Socks5 => {
            let nmethods = stream.read_u8().await? as usize;
            let mut methods = vec![0u8; nmethods];
            stream.read_exact(&mut methods).await?;
            Ok((version, Some(methods)))
        }
    }
}

/// Write the SOCKS5 method selection message.
pub(crate) async fn write_method_choice(stream: &mut BoxedStream, method: u8) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    stream
        .write_all(&[crate::proto::consts::SOCKS5_VERSION, method])
        .await?;
    stream.flush().await?;
    Ok(())
}
