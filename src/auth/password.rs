//! Username/password authentication
//!
//! Implements RFC 1929 username/password authentication for SOCKS5.
//! SOCKS4 clients carry no password and are turned away when this
//! policy is active.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{read_methods, write_method_choice, Authenticator, Negotiated};
use crate::error::SockdError;
use crate::proto::consts;
use crate::{BoxedStream, Result};

/// Authenticator backed by a username/password table.
#[derive(Debug, Default)]
pub struct Password {
    users: HashMap<String, String>,
}

impl Password {
    /// Build the authenticator from a credential table.
    pub fn new(users: HashMap<String, String>) -> Self {
        Password { users }
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map(|expected| expected == password)
            .unwrap_or(false)
    }

    /// RFC 1929 sub-negotiation.
    ///
    /// Client sends:
    /// ```text
    /// +----+------+----------+------+----------+
    /// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    /// +----+------+----------+------+----------+
    /// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    /// +----+------+----------+------+----------+
    /// ```
    ///
    /// Server responds:
    /// ```text
    /// +----+--------+
    /// |VER | STATUS |
    /// +----+--------+
    /// | 1  |   1    |
    /// +----+--------+
    /// ```
    async fn sub_negotiate(&self, stream: &mut BoxedStream) -> Result<Option<String>> {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;

        let version = head[0];
        let username_len = head[1] as usize;

        if version != consts::SOCKS5_AUTH_VERSION {
            send_status(stream, consts::SOCKS5_AUTH_FAILURE).await?;
            return Err(SockdError::Handshake(format!(
                "invalid auth sub-negotiation version: {}",
                version
            )));
        }
        if username_len == 0 {
            send_status(stream, consts::SOCKS5_AUTH_FAILURE).await?;
            return Err(SockdError::Handshake("empty username".to_string()));
        }

        let mut username = vec![0u8; username_len];
        stream.read_exact(&mut username).await?;
        let username = String::from_utf8(username)
            .map_err(|_| SockdError::Handshake("username is not valid UTF-8".to_string()))?;

        let password_len = stream.read_u8().await? as usize;
        if password_len == 0 {
            send_status(stream, consts::SOCKS5_AUTH_FAILURE).await?;
            return Err(SockdError::Handshake("empty password".to_string()));
        }

        let mut password = vec![0u8; password_len];
        stream.read_exact(&mut password).await?;
        let password = String::from_utf8(password)
            .map_err(|_| SockdError::Handshake("password is not valid UTF-8".to_string()))?;

        if self.verify(&username, &password) {
            send_status(stream, consts::SOCKS5_AUTH_SUCCESS).await?;
            debug!(user = %username, "authentication successful");
            Ok(Some(username))
        } else {
            send_status(stream, consts::SOCKS5_AUTH_FAILURE).await?;
            debug!(user = %username, "authentication failed");
            Ok(None)
        }
    }
}

#[async_trait]
impl Authenticator for Password {
    async fn start_session(&self, mut stream: BoxedStream) -> Result<Option<Negotiated>> {
        let (version, methods) = match read_methods(&mut stream).await? {
            // SOCKS4 carries no credentials
            (crate::proto::Version::Socks4, _) => return Ok(None),
            (version, methods) => (version, methods),
        };

        let methods = methods.unwrap_or_default();
        if !methods.contains(&consts::SOCKS5_AUTH_METHOD_PASSWORD) {
            write_method_choice(&mut stream, consts::SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE).await?;
            return Ok(None);
        }
        write_method_choice(&mut stream, consts::SOCKS5_AUTH_METHOD_PASSWORD).await?;

        match self.sub_negotiate(&mut stream).await? {
            Some(user) => Ok(Some(Negotiated {
                stream,
                version,
                user: Some(user),
            })),
            None => Ok(None),
        }
    }
}

/// Send the sub-negotiation status byte.
async fn send_status(stream: &mut BoxedStream, status: u8) -> Result<()> {
    stream
        .write_all(&[consts::SOCKS5_AUTH_VERSION, status])
        .await?;
    stream.flush().await?;
    Ok(())
}
