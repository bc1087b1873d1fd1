//! Periodic background tasks.
//!
//! [`PeriodicTask`] runs a closure on a dedicated, named thread at a fixed
//! interval until it is stopped, dropped, or the closure asks to stop by
//! returning [`ControlFlow::Break`]. The wait between runs is an
//! interruptible [`CancellationToken::wait_timeout`], so `stop()` takes effect
//! immediately rather than after the current interval.
//!
//! # Example
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use std::time::Duration;
//! use gifloop_core::PeriodicTask;
//!
//! let task = PeriodicTask::spawn("cache-purge", Duration::from_secs(30), || {
//!     println!("purging");
//!     ControlFlow::Continue(())
//! });
//!
//! // ... later
//! task.stop_and_join();
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancellation::CancellationToken;
use crate::logging::targets;

/// A closure run repeatedly on a background thread.
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    token: CancellationToken,
    runs: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn a new periodic task.
    ///
    /// The first run happens one `interval` after spawning.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut task: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let runs = Arc::new(AtomicU64::new(0));

        let thread_token = token.clone();
        let thread_runs = runs.clone();
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!(target: targets::PERIODIC, task = %thread_name, ?interval, "periodic task started");
                while !thread_token.wait_timeout(interval) {
                    thread_runs.fetch_add(1, Ordering::AcqRel);
                    if task().is_break() {
                        break;
                    }
                }
                tracing::debug!(target: targets::PERIODIC, task = %thread_name, "periodic task finished");
            })
            .expect("failed to spawn periodic task thread");

        Self {
            name,
            interval,
            token,
            runs,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The thread name this task was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The interval between runs.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of times the closure has been invoked so far.
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    /// Check if the task thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Request the task to stop. Non-blocking.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for the task thread to exit.
    ///
    /// Returns `true` if the thread was joined, `false` if it was already
    /// joined or panicked.
    pub fn join(&self) -> bool {
        let handle = self.handle.lock().take();
        match handle {
            Some(h) => h.join().is_ok(),
            None => false,
        }
    }

    /// Stop the task and wait for its thread to exit.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // Request shutdown only; joining is left to `join`.
        self.stop();
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("runs", &self.run_count())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
