//! Error types for Sockd
//!
//! This module defines the error taxonomy used throughout the server and
//! the mapping from errors to SOCKS wire reply codes.

use std::io;
use thiserror::Error;

use crate::proto::{consts, ReplyCode, Version};

/// Classification of outbound network failures.
///
/// Connection and listen operations return this tag instead of relying on
/// platform error hierarchies; the session maps it directly to a wire
/// reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The target actively refused the connection
    Refused,
    /// No route to the target host or network
    Unreachable,
    /// The operation timed out or was interrupted
    Timeout,
    /// Anything else
    Other,
}

impl NetworkErrorKind {
    /// Classify an IO error from a connect/accept/read operation.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetworkErrorKind::Refused,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                NetworkErrorKind::Unreachable
            }
            io::ErrorKind::AddrNotAvailable => NetworkErrorKind::Unreachable,
            io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => NetworkErrorKind::Timeout,
            _ => NetworkErrorKind::Other,
        }
    }
}

/// Main error type for Sockd operations
#[derive(Error, Debug)]
pub enum SockdError {
    /// Malformed or unsupported SOCKS message, carries a wire reply code
    #[error("protocol error: {reason}")]
    Protocol {
        /// SOCKS5 reply code describing the failure
        code: ReplyCode,
        /// Human-readable reason
        reason: String,
    },

    /// Handshake rejected or malformed; no reply is owed to the client
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Host name could not be resolved
    #[error("cannot resolve host {host}: {reason}")]
    HostResolution {
        /// The host name that failed to resolve
        host: String,
        /// Resolver-provided reason
        reason: String,
    },

    /// Outbound network operation failed
    #[error("network error: {source}")]
    Network {
        /// Failure classification used for reply-code selection
        kind: NetworkErrorKind,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Bad proxy-chain specification
    #[error("proxy chain configuration error: {0}")]
    ChainConfig(String),

    /// IO error on the client control connection
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SockdError {
    /// Build a [`SockdError::Protocol`] with the given code and reason.
    pub fn protocol(code: ReplyCode, reason: impl Into<String>) -> Self {
        SockdError::Protocol {
            code,
            reason: reason.into(),
        }
    }

    /// Tag an IO error from an outbound connect/listen operation.
    pub fn network(source: io::Error) -> Self {
        SockdError::Network {
            kind: NetworkErrorKind::classify(&source),
            source,
        }
    }

    /// A [`SockdError::Network`] with an explicit classification.
    pub fn network_kind(kind: NetworkErrorKind, source: io::Error) -> Self {
        SockdError::Network { kind, source }
    }

    /// The reply code to send for this error, by protocol version.
    ///
    /// SOCKS4 has a single failure code (91, request rejected); the richer
    /// taxonomy only maps onto SOCKS5 codes.
    pub fn reply_code(&self, version: Version) -> ReplyCode {
        if version == Version::Socks4 {
            return ReplyCode::from_wire(Version::Socks4, consts::SOCKS4_REPLY_REJECTED);
        }
        match self {
            SockdError::Protocol { code, .. } => *code,
            SockdError::HostResolution { .. } => ReplyCode::HostUnreachable,
            SockdError::Network { kind, .. } => match kind {
                NetworkErrorKind::Refused => ReplyCode::ConnectionRefused,
                NetworkErrorKind::Unreachable => ReplyCode::HostUnreachable,
                NetworkErrorKind::Timeout => ReplyCode::TtlExpired,
                NetworkErrorKind::Other => ReplyCode::GeneralFailure,
            },
            _ => ReplyCode::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_refused() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(NetworkErrorKind::classify(&err), NetworkErrorKind::Refused);
    }

    #[test]
    fn test_classify_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(NetworkErrorKind::classify(&err), NetworkErrorKind::Timeout);

        let err = io::Error::new(io::ErrorKind::Interrupted, "interrupted");
        assert_eq!(NetworkErrorKind::classify(&err), NetworkErrorKind::Timeout);
    }

    #[test]
    fn test_classify_other() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(NetworkErrorKind::classify(&err), NetworkErrorKind::Other);
    }

    #[test]
    fn test_reply_code_socks5_mapping() {
        let refused = SockdError::network_kind(
            NetworkErrorKind::Refused,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(
            refused.reply_code(Version::Socks5),
            ReplyCode::ConnectionRefused
        );

        let unreachable = SockdError::network_kind(
            NetworkErrorKind::Unreachable,
            io::Error::new(io::ErrorKind::HostUnreachable, "no route"),
        );
        assert_eq!(
            unreachable.reply_code(Version::Socks5),
            ReplyCode::HostUnreachable
        );

        let timeout = SockdError::network_kind(
            NetworkErrorKind::Timeout,
            io::Error::new(io::ErrorKind::TimedOut, "timeout"),
        );
        assert_eq!(timeout.reply_code(Version::Socks5), ReplyCode::TtlExpired);

        let other = SockdError::ChainConfig("bad hop".to_string());
        assert_eq!(other.reply_code(Version::Socks5), ReplyCode::GeneralFailure);
    }

    #[test]
    fn test_reply_code_socks4_always_rejected() {
        let err = SockdError::network_kind(
            NetworkErrorKind::Refused,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(
            err.reply_code(Version::Socks4).to_wire(Version::Socks4),
            consts::SOCKS4_REPLY_REJECTED
        );
    }

    #[test]
    fn test_protocol_error_keeps_code() {
        let err = SockdError::protocol(ReplyCode::CommandNotSupported, "bad command");
        assert_eq!(
            err.reply_code(Version::Socks5),
            ReplyCode::CommandNotSupported
        );
        assert_eq!(format!("{}", err), "protocol error: bad command");
    }

    #[test]
    fn test_host_resolution_display() {
        let err = SockdError::HostResolution {
            host: "nowhere.invalid".to_string(),
            reason: "no records".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "cannot resolve host nowhere.invalid: no records"
        );
        assert_eq!(err.reply_code(Version::Socks5), ReplyCode::HostUnreachable);
    }
}
