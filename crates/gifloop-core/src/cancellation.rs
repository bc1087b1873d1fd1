//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a clonable flag shared between a controller and
//! a background loop. Besides polling [`is_cancelled`](CancellationToken::is_cancelled),
//! the loop can park on [`wait_timeout`](CancellationToken::wait_timeout), which
//! doubles as an interruptible sleep: it returns early as soon as the token is
//! cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A cancellation token for cooperative shutdown of background loops.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    cancelled: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                cancelled: AtomicBool::new(false),
                condvar: Condvar::new(),
                mutex: Mutex::new(()),
            }),
        }
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation and wake every thread parked in `wait_timeout`.
    ///
    /// Returns `true` if this call performed the cancellation, `false` if the
    /// token was already cancelled.
    pub fn cancel(&self) -> bool {
        // Hold the lock while flipping the flag to avoid a lost wakeup.
        let _guard = self.inner.mutex.lock();
        let first = !self.inner.cancelled.swap(true, Ordering::Release);
        self.inner.condvar.notify_all();
        if first {
            crate::gifloop_trace!("cancellation requested");
        }
        first
    }

    /// Sleep for up to `timeout`, returning early if the token is cancelled.
    ///
    /// Returns `true` if the token is cancelled when the wait ends.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.mutex.lock();
        while !self.is_cancelled() {
            if self
                .inner
                .condvar
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                break;
            }
        }
        self.is_cancelled()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
