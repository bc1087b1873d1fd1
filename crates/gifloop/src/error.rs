//! Error types for the GIF engine.

use std::io;

use thiserror::Error;

/// Errors raised while parsing the GIF container. Fatal to opening a session.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The stream does not start with the `GIF` magic.
    #[error("invalid signature: not a GIF stream")]
    InvalidSignature,

    /// The magic is `GIF` but the version is neither `87a` nor `89a`.
    #[error("unsupported GIF version {0:?}")]
    UnsupportedVersion(String),

    /// A block introducer or extension label that cannot be handled.
    #[error("unexpected block introducer 0x{0:02x}")]
    UnexpectedBlock(u8),

    /// The stream ended before the trailer and before any frame was found.
    #[error("stream ended before the trailer")]
    UnterminatedStream,

    /// A fixed-size block declared the wrong size.
    #[error("invalid size for {block} block: expected {expected}, found {found}")]
    InvalidBlockSize {
        block: &'static str,
        expected: u8,
        found: u8,
    },

    /// The logical screen has zero width or height.
    #[error("logical screen has an empty canvas")]
    EmptyCanvas,

    /// Underlying I/O failure other than end-of-stream.
    #[error("i/o error while parsing: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnterminatedStream
        } else {
            Self::Io(err)
        }
    }
}

/// Errors raised while expanding a frame's LZW stream.
///
/// Fatal to the current render only; the session stays usable.
#[derive(Error, Debug)]
pub enum LzwError {
    /// The minimum code size is outside `1..=11`.
    #[error("invalid LZW minimum code size {0}")]
    InvalidCodeSize(u8),

    /// Resolving a code needed more than the pixel stack can hold.
    #[error("LZW pixel stack overflow")]
    StackOverflow,

    /// A dictionary entry whose prefix chain loops back on itself.
    #[error("self-referential LZW code {0}")]
    SelfReferentialCode(u16),

    /// A code past the next free dictionary slot.
    #[error("LZW code {code} out of range (next free slot {available})")]
    CodeOutOfRange { code: u16, available: u16 },

    /// Underlying I/O failure.
    #[error("i/o error while decompressing: {0}")]
    Io(#[from] io::Error),
}

impl LzwError {
    /// Whether this error means the compressed data itself is corrupt, as
    /// opposed to a configuration or I/O problem.
    pub fn is_corrupt_stream(&self) -> bool {
        matches!(
            self,
            Self::StackOverflow | Self::SelfReferentialCode(_) | Self::CodeOutOfRange { .. }
        )
    }
}

/// The umbrella error type returned by public entry points.
#[derive(Error, Debug)]
pub enum GifError {
    /// The container could not be parsed.
    #[error("failed to parse GIF: {0}")]
    Parse(#[from] ParseError),

    /// A frame's pixel data could not be decompressed.
    #[error("failed to decompress frame: {0}")]
    Lzw(#[from] LzwError),

    /// The input stream does not support seeking.
    #[error("input stream is not seekable: {0}")]
    NotSeekable(#[source] io::Error),

    /// A frame index outside `0..frame_count`.
    #[error("frame index {index} out of range (frame count {frame_count})")]
    FrameOutOfRange { index: usize, frame_count: usize },

    /// A frame references a color table that could not be resolved.
    #[error("color table {0:016x} is not available")]
    MissingColorTable(u64),

    /// A caller-supplied buffer is too small for the raster.
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall { needed: usize, got: usize },

    /// The session has been disposed.
    #[error("playback session has been disposed")]
    Disposed,

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl GifError {
    /// Which phase this error belongs to when reported to a consumer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) | Self::NotSeekable(_) => ErrorKind::Loading,
            _ => ErrorKind::Rendering,
        }
    }
}

/// Tag distinguishing load-time from playback-time failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The source could not be opened or parsed.
    Loading,
    /// A frame failed to render during playback.
    Rendering,
}

/// Payload of the player's error notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackError {
    /// Loading or rendering.
    pub kind: ErrorKind,
    /// Human-readable description of the failure.
    pub message: String,
    /// The frame being rendered when the failure happened, if any.
    pub frame_index: Option<usize>,
}

impl PlaybackError {
    pub(crate) fn from_error(err: &GifError, frame_index: Option<usize>) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            frame_index,
        }
    }
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.frame_index {
            Some(index) => write!(f, "{:?} error at frame {}: {}", self.kind, index, self.message),
            None => write!(f, "{:?} error: {}", self.kind, self.message),
        }
    }
}

/// Result type for GIF operations.
pub type Result<T> = std::result::Result<T, GifError>;
