//! Core runtime primitives for gifloop.
//!
//! This crate provides the small set of concurrency and diagnostics building
//! blocks the GIF engine is assembled from:
//!
//! - **Signals**: [`Signal`] notification channels with connect/disconnect
//! - **Cancellation**: [`CancellationToken`] with an interruptible wait
//! - **Periodic tasks**: [`PeriodicTask`] for background maintenance loops
//! - **Logging**: `tracing` targets, span names and convenience macros
//!
//! # Example
//!
//! ```
//! use gifloop_core::{CancellationToken, Signal};
//! use std::time::Duration;
//!
//! let stopped = Signal::<()>::new();
//! stopped.connect(|_| println!("stopped"));
//!
//! let token = CancellationToken::new();
//! token.cancel();
//! assert!(token.wait_timeout(Duration::from_secs(1)));
//! stopped.emit(());
//! ```

pub mod cancellation;
pub mod logging;
pub mod periodic;
pub mod signal;

pub use cancellation::CancellationToken;
pub use logging::PerfSpan;
pub use periodic::PeriodicTask;
pub use signal::{ConnectionId, Signal};
