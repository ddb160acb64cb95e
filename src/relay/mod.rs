//! Data relaying
//!
//! Once a request is granted, a session becomes a relay: bytes are
//! pumped between the client and the remote until one side closes,
//! the idle timeout elapses, or the session is aborted. TCP and UDP
//! relays share the [`AbortHandle`] cancellation primitive.

pub mod tcp;
pub mod udp;

pub use tcp::{pipe, relay};
pub use udp::UdpRelay;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cooperative cancellation shared across a session's tasks.
///
/// Cloned handles observe the same flag; aborting is idempotent and
/// wakes every task parked in [`AbortHandle::aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortHandle {
    /// Create a fresh, un-aborted handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Subsequent calls are no-ops.
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    pub async fn aborted(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Flag may have flipped between the check and registration
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}
