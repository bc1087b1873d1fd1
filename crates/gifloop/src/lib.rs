//! Animated GIF decoding and playback.
//!
//! gifloop turns a seekable GIF87a/GIF89a byte stream into a sequence of
//! composited BGRA frames and plays them back on a background thread:
//!
//! - [`container`]: one pass over the block structure, recording frame
//!   metadata and stream offsets without decoding pixels
//! - [`lzw`]: on-demand expansion of a frame's LZW data into palette indices
//! - [`compositor`]: disposal, transparency and interlacing onto a persistent
//!   canvas
//! - [`color_table`]: a shared, content-addressed palette cache with idle
//!   expiry
//! - [`decoder`]: a synchronous decoding session with exact seeking
//! - [`playback`]: the background scheduler and its consumer handle
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use gifloop::{GifPlayer, RepeatBehavior};
//!
//! let player = GifPlayer::builder()
//!     .repeat(RepeatBehavior::Forever)
//!     .open(File::open("spinner.gif")?)?;
//!
//! player.on_error(|err| eprintln!("{err}"));
//! player.play()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Logging
//!
//! All events go through `tracing` under the `gifloop::*` targets listed in
//! [`gifloop_core::logging::targets`].

pub mod bitstream;
pub mod color_table;
pub mod compositor;
pub mod container;
pub mod decoder;
pub mod error;
pub mod lzw;
pub mod playback;
pub mod types;

pub use bitstream::BitstreamReader;
pub use color_table::{
    ColorTable, ColorTableCache, ColorTableCacheConfig, ColorTableCacheStats, ColorTableRef,
    hash_table_bytes,
};
pub use compositor::{Canvas, composite};
pub use container::{
    DEFAULT_FRAME_DELAY, DisposalMethod, Frame, GifHeader, GifVersion, MIN_FRAME_DELAY, ParsedGif,
    parse,
};
pub use decoder::{FrameSurface, GifDecoder};
pub use error::{ErrorKind, GifError, LzwError, ParseError, PlaybackError, Result};
pub use lzw::{LzwScratch, decompress_frame, interlaced_rows};
pub use playback::{GifPlayer, PlaybackState, PlayerBuilder, PlayerConfig, RepeatBehavior};
pub use types::{Bgra8, Rect, Rgb8};

pub use gifloop_core::{CancellationToken, ConnectionId, PeriodicTask, Signal};
