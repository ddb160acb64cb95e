//! Open-access authenticator
//!
//! Admits every client. SOCKS4 requests proceed immediately; SOCKS5
//! clients must offer the no-authentication method.

use async_trait::async_trait;

use super::{read_methods, write_method_choice, Authenticator, Negotiated};
use crate::proto::consts;
use crate::{BoxedStream, Result};

/// Authenticator that admits everyone.
#[derive(Debug, Default)]
pub struct PermitAll;

#[async_trait]
impl Authenticator for PermitAll {
    async fn start_session(&self, mut stream: BoxedStream) -> Result<Option<Negotiated>> {
        let (version, methods) = read_methods(&mut stream).await?;

        if let Some(methods) = methods {
            if !methods.contains(&consts::SOCKS5_AUTH_METHOD_NONE) {
                write_method_choice(&mut stream, consts::SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE)
                    .await?;
                return Ok(None);
            }
            write_method_choice(&mut stream, consts::SOCKS5_AUTH_METHOD_NONE).await?;
        }

        Ok(Some(Negotiated {
            stream,
            version,
            user: None,
        }))
    }
}
