//! Logging facilities for gifloop.
//!
//! gifloop uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("gifloop=debug,gifloop_core=info")
//!         .init();
//! }
//! ```
//!
//! Every event is emitted with one of the [`targets`] so that subsystems can be
//! filtered independently, e.g. `gifloop::lzw=trace`.

/// Span names used throughout gifloop for tracing.
pub mod span_names {
    /// Container parsing span.
    pub const PARSE: &str = "gifloop::parse";
    /// Single frame decompression span.
    pub const DECODE_FRAME: &str = "gifloop::decode_frame";
    /// Frame compositing span.
    pub const COMPOSITE: &str = "gifloop::composite";
    /// Seek replay span.
    pub const SEEK: &str = "gifloop::seek";
}

/// Target names for log filtering.
pub mod targets {
    /// Core runtime target.
    pub const CORE: &str = "gifloop_core";
    /// Signal emission target.
    pub const SIGNAL: &str = "gifloop_core::signal";
    /// Periodic task target.
    pub const PERIODIC: &str = "gifloop_core::periodic";
    /// Container parser target.
    pub const PARSER: &str = "gifloop::parser";
    /// LZW decompressor target.
    pub const LZW: &str = "gifloop::lzw";
    /// Frame compositor target.
    pub const COMPOSITOR: &str = "gifloop::compositor";
    /// Color table cache target.
    pub const PALETTE: &str = "gifloop::palette";
    /// Playback scheduler target.
    pub const PLAYBACK: &str = "gifloop::playback";
}

/// A guard for performance tracing spans.
///
/// The span stays entered until the guard is dropped.
///
/// ```
/// use gifloop_core::logging::PerfSpan;
///
/// fn expensive_operation() {
///     let _span = PerfSpan::new("expensive_operation");
///     // ... work happens here, timed by the span
/// }
/// ```
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create and enter a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "gifloop::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Macros for common tracing patterns.
///
/// These are thin wrappers around the `tracing` macros with the core target.
#[macro_export]
macro_rules! gifloop_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "gifloop_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! gifloop_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "gifloop_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! gifloop_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "gifloop_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! gifloop_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "gifloop_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! gifloop_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "gifloop_core", $($arg)*)
    };
}
