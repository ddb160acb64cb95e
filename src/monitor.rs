//! Traffic accounting
//!
//! Sessions hand every stream they open to a [`TrafficMonitor`], which
//! may return it wrapped in a metering decorator. The default monitor
//! passes streams through untouched.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::info;

use crate::BoxedStream;

/// Which side of a session a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The accepted client connection
    Client,
    /// The outbound connection to the destination or upstream proxy
    Remote,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Client => write!(f, "client"),
            Endpoint::Remote => write!(f, "remote"),
        }
    }
}

/// Observes session traffic by decorating streams.
pub trait TrafficMonitor: Send + Sync {
    /// Wrap a stream; return it unchanged to opt out.
    fn wrap(
        &self,
        endpoint: Endpoint,
        stream: BoxedStream,
        peer: SocketAddr,
        user: Option<&str>,
    ) -> BoxedStream;
}

/// Monitor that observes nothing.
#[derive(Debug, Default)]
pub struct NullMonitor;

impl TrafficMonitor for NullMonitor {
    fn wrap(
        &self,
        _endpoint: Endpoint,
        stream: BoxedStream,
        _peer: SocketAddr,
        _user: Option<&str>,
    ) -> BoxedStream {
        stream
    }
}

/// Monitor that logs per-stream byte totals when the stream closes.
#[derive(Debug, Default)]
pub struct LogMonitor;

impl TrafficMonitor for LogMonitor {
    fn wrap(
        &self,
        endpoint: Endpoint,
        stream: BoxedStream,
        peer: SocketAddr,
        user: Option<&str>,
    ) -> BoxedStream {
        Box::new(MeteredStream {
            inner: stream,
            endpoint,
            peer,
            user: user.map(str::to_string),
            bytes_in: 0,
            bytes_out: 0,
        })
    }
}

/// Counts bytes moving through a wrapped stream.
struct MeteredStream {
    inner: BoxedStream,
    endpoint: Endpoint,
    peer: SocketAddr,
    user: Option<String>,
    bytes_in: u64,
    bytes_out: u64,
}

impl AsyncRead for MeteredStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            this.bytes_in += (buf.filled().len() - before) as u64;
        }
        result
    }
}

impl AsyncWrite for MeteredStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &result {
            this.bytes_out += *written as u64;
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        info!(
            endpoint = %self.endpoint,
            peer = %self.peer,
            user = self.user.as_deref().unwrap_or("-"),
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            "stream closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_null_monitor_passes_through() {
        let (a, b) = tokio::io::duplex(64);
        let monitor = NullMonitor;
        let peer = "127.0.0.1:1234".parse().unwrap();
        let mut wrapped = monitor.wrap(Endpoint::Client, Box::new(a), peer, None);

        let mut other = b;
        other.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        wrapped.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_metered_stream_counts_both_directions() {
        let (a, b) = tokio::io::duplex(64);
        let peer = "127.0.0.1:1234".parse().unwrap();
        let mut metered = MeteredStream {
            inner: Box::new(a),
            endpoint: Endpoint::Remote,
            peer,
            user: Some("alice".to_string()),
            bytes_in: 0,
            bytes_out: 0,
        };

        let mut other = b;
        metered.write_all(b"hello").await.unwrap();
        other.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        metered.read_exact(&mut buf).await.unwrap();

        assert_eq!(metered.bytes_out, 5);
        assert_eq!(metered.bytes_in, 2);
    }
}
