//! TCP relay
//!
//! Copies data bidirectionally between the client and the remote,
//! enforcing the idle timeout per direction and honoring session
//! aborts between chunks.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use super::AbortHandle;
use crate::proto::consts::RELAY_BUFFER_SIZE;

/// Copy one direction until EOF, idle timeout, error or abort.
///
/// Returns the number of bytes moved, even when the copy ends in an
/// I/O error. An idle timeout or abort is a normal end of the stream.
pub async fn pipe<R, W>(
    src: &mut R,
    dst: &mut W,
    idle: Duration,
    abort: &AbortHandle,
) -> (u64, io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = tokio::select! {
            _ = abort.aborted() => return (total, Ok(())),
            read = read_with_idle(src, &mut buf, idle) => match read {
                Ok(read) => read,
                Err(err) => return (total, Err(err)),
            },
        };

        let n = match read {
            // Idle timeout or EOF: stop quietly
            None | Some(0) => return (total, Ok(())),
            Some(n) => n,
        };

        if let Err(err) = dst.write_all(&buf[..n]).await {
            return (total, Err(err));
        }
        total += n as u64;
        if let Err(err) = dst.flush().await {
            return (total, Err(err));
        }
    }
}

/// One read, bounded by the idle timeout. `Ok(None)` marks a timeout;
/// a zero idle duration disables the bound.
async fn read_with_idle<R>(
    src: &mut R,
    buf: &mut [u8],
    idle: Duration,
) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    if idle.is_zero() {
        return src.read(buf).await.map(Some);
    }
    match timeout(idle, src.read(buf)).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

/// Relay both directions concurrently.
///
/// When either direction finishes, the other is aborted so the whole
/// relay winds down together. Returns (client-to-remote bytes,
/// remote-to-client bytes).
pub async fn relay<A, B>(
    client: &mut A,
    remote: &mut B,
    idle: Duration,
    abort: &AbortHandle,
) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let upstream = async {
        let (moved, outcome) = pipe(&mut client_read, &mut remote_write, idle, abort).await;
        if let Err(err) = outcome {
            debug!(error = %err, "client-to-remote relay error");
        }
        abort.abort();
        moved
    };
    let downstream = async {
        let (moved, outcome) = pipe(&mut remote_read, &mut client_write, idle, abort).await;
        if let Err(err) = outcome {
            debug!(error = %err, "remote-to-client relay error");
        }
        abort.abort();
        moved
    };

    tokio::join!(upstream, downstream)
}
