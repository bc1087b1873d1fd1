//! GIF container parsing.
//!
//! [`parse`] walks the block structure of a GIF87a/GIF89a stream exactly once
//! and records where everything is: the logical screen, color tables, frame
//! descriptors, and the offset of each frame's LZW data. Pixel data is skipped
//! here and decompressed on demand later.
//!
//! # Leniency
//!
//! - A stream that ends without the `0x3B` trailer is accepted as long as at
//!   least one image descriptor was read. The frame that was being read when
//!   the data ran out is kept; its missing pixels decode as index 0.
//! - Frame rectangles that extend past the logical screen are clipped.
//! - Unknown extension labels are skipped. Unknown block introducers are not.

use std::io::{Read, Seek};
use std::time::Duration;

use gifloop_core::PerfSpan;
use gifloop_core::logging::{span_names, targets};

use crate::bitstream::{BitstreamReader, MAX_SUB_BLOCK_LEN};
use crate::color_table::{ColorTableCache, ColorTableRef, hash_table_bytes};
use crate::error::ParseError;
use crate::types::Rect;

/// Delays shorter than this are treated as unspecified.
pub const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);

/// Delay used for frames with no usable delay.
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;

const LABEL_GRAPHIC_CONTROL: u8 = 0xF9;
const LABEL_APPLICATION: u8 = 0xFF;
const LABEL_COMMENT: u8 = 0xFE;
const LABEL_PLAIN_TEXT: u8 = 0x01;

const GRAPHIC_CONTROL_BLOCK_SIZE: u8 = 4;
const APPLICATION_BLOCK_SIZE: u8 = 11;

const LOOP_APPLICATIONS: [&[u8; 11]; 2] = [b"NETSCAPE2.0", b"ANIMEXTS1.0"];

/// GIF format revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GifVersion {
    /// `GIF87a`.
    Gif87a,
    /// `GIF89a`.
    Gif89a,
}

impl GifVersion {
    fn from_bytes(version: &[u8]) -> Option<Self> {
        match version {
            b"87a" => Some(Self::Gif87a),
            b"89a" => Some(Self::Gif89a),
            _ => None,
        }
    }
}

/// What happens to a frame's area once its display time is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisposalMethod {
    /// Leave the frame in place.
    Leave,
    /// Clear the frame's rectangle to transparent.
    RestoreBackground,
    /// Restore the frame's rectangle to what it was before drawing.
    RestorePrevious,
    /// No disposal specified; treated like [`DisposalMethod::Leave`].
    #[default]
    Unspecified,
}

impl DisposalMethod {
    /// Decode the 3-bit disposal field of a graphic control extension.
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Leave,
            2 => Self::RestoreBackground,
            3 => Self::RestorePrevious,
            _ => Self::Unspecified,
        }
    }
}

/// Logical screen information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifHeader {
    /// Format revision.
    pub version: GifVersion,
    /// Canvas width in pixels.
    pub width: u16,
    /// Canvas height in pixels.
    pub height: u16,
    /// Whether a global color table follows the screen descriptor.
    pub has_global_color_table: bool,
    /// Number of entries in the global color table (0 if absent).
    pub global_color_table_size: u16,
    /// Background color index from the screen descriptor.
    pub background_color_index: u8,
    /// Raw pixel aspect ratio byte.
    pub pixel_aspect_ratio: u8,
    /// Length of the signature, screen descriptor and global table.
    pub header_byte_length: u64,
    /// Location of the global color table, if present.
    pub global_table: Option<ColorTableRef>,
}

impl GifHeader {
    /// Number of pixels on the canvas.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Metadata for one image in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination rectangle, clipped to the canvas.
    pub rect: Rect,
    /// Width declared by the image descriptor; the row length of the LZW
    /// stream.
    pub encoded_width: u16,
    /// Height declared by the image descriptor.
    pub encoded_height: u16,
    /// Rows are stored in four-pass interlaced order.
    pub interlaced: bool,
    /// The frame carries its own color table.
    pub uses_local_table: bool,
    /// Location of the local color table, if any.
    pub local_table: Option<ColorTableRef>,
    /// LZW minimum code size byte.
    pub lzw_min_code_size: u8,
    /// Offset of the first LZW data sub-block.
    pub lzw_stream_offset: u64,
    /// Display time, already normalized.
    pub delay: Duration,
    /// Disposal applied before the next frame is drawn.
    pub disposal: DisposalMethod,
    /// Whether `transparent_index` is meaningful.
    pub has_transparency: bool,
    /// Index that leaves the destination pixel untouched.
    pub transparent_index: u8,
    /// Whether this frame's result is a valid restore point for a later
    /// `RestorePrevious` frame.
    pub should_backup: bool,
}

impl Frame {
    /// Content hash of the local color table, if any.
    pub fn local_table_id(&self) -> Option<u64> {
        self.local_table.map(|table| table.id)
    }

    /// Number of indices decoded for compositing: the visible rectangle
    /// only, never the declared size.
    pub fn index_len(&self) -> usize {
        self.rect.area()
    }

    /// Whether drawing this frame fully determines the canvas regardless of
    /// what was there before, and leaves a state later frames can build on.
    pub fn is_keyframe(&self, width: u16, height: u16) -> bool {
        self.rect.covers(width, height) && !self.has_transparency && self.should_backup
    }
}

/// Everything learned from a single pass over the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGif {
    /// Logical screen information.
    pub header: GifHeader,
    /// Frames in stream order.
    pub frames: Vec<Frame>,
    /// Loop count from a NETSCAPE2.0/ANIMEXTS1.0 block. `Some(0)` means
    /// forever; `None` means the block was absent.
    pub loop_count: Option<u16>,
    /// Whether the trailer byte was present.
    pub terminated: bool,
}

impl ParsedGif {
    /// Number of frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Sum of all frame delays.
    pub fn total_duration(&self) -> Duration {
        self.frames.iter().map(|frame| frame.delay).sum()
    }

    /// Whether any frame needs the backup raster.
    pub fn uses_restore_previous(&self) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.disposal == DisposalMethod::RestorePrevious)
    }
}

/// Normalize a delay in hundredths of a second.
pub fn frame_delay(hundredths: u16) -> Duration {
    let delay = Duration::from_millis(u64::from(hundredths) * 10);
    if delay < MIN_FRAME_DELAY {
        DEFAULT_FRAME_DELAY
    } else {
        delay
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GraphicControl {
    disposal: DisposalMethod,
    has_transparency: bool,
    transparent_index: u8,
    delay_hundredths: u16,
}

/// Parse the container structure of a GIF stream.
///
/// Color tables are registered in `cache` as they are encountered.
pub fn parse<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
    cache: &ColorTableCache,
) -> Result<ParsedGif, ParseError> {
    let _span = PerfSpan::new(span_names::PARSE);

    let header = read_header(reader, cache)?;
    let mut parsed = ParsedGif {
        header,
        frames: Vec::new(),
        loop_count: None,
        terminated: false,
    };

    match read_blocks(reader, cache, &mut parsed) {
        Ok(()) => parsed.terminated = true,
        Err(ParseError::UnterminatedStream) if !parsed.frames.is_empty() => {
            tracing::warn!(
                target: targets::PARSER,
                frames = parsed.frames.len(),
                "stream ended without a trailer; keeping frames read so far"
            );
        }
        Err(err) => return Err(err),
    }

    tracing::debug!(
        target: targets::PARSER,
        width = parsed.header.width,
        height = parsed.header.height,
        frames = parsed.frames.len(),
        loop_count = ?parsed.loop_count,
        "parsed GIF container"
    );
    Ok(parsed)
}

fn read_header<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
    cache: &ColorTableCache,
) -> Result<GifHeader, ParseError> {
    let mut signature = [0u8; 6];
    reader.read_exact(&mut signature).map_err(|err| match ParseError::from(err) {
        ParseError::UnterminatedStream => ParseError::InvalidSignature,
        other => other,
    })?;

    if &signature[..3] != b"GIF" {
        return Err(ParseError::InvalidSignature);
    }
    let version = GifVersion::from_bytes(&signature[3..]).ok_or_else(|| {
        ParseError::UnsupportedVersion(String::from_utf8_lossy(&signature[3..]).into_owned())
    })?;

    let width = reader.read_u16_le()?;
    let height = reader.read_u16_le()?;
    let packed = reader.read_u8()?;
    let background_color_index = reader.read_u8()?;
    let pixel_aspect_ratio = reader.read_u8()?;

    if width == 0 || height == 0 {
        return Err(ParseError::EmptyCanvas);
    }

    let has_global_color_table = packed & 0x80 != 0;
    let global_table = if has_global_color_table {
        Some(read_color_table(reader, cache, packed & 0x07)?)
    } else {
        None
    };

    Ok(GifHeader {
        version,
        width,
        height,
        has_global_color_table,
        global_color_table_size: global_table.map_or(0, |table| table.entries),
        background_color_index,
        pixel_aspect_ratio,
        header_byte_length: reader.position(),
        global_table,
    })
}

fn read_color_table<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
    cache: &ColorTableCache,
    size_bits: u8,
) -> Result<ColorTableRef, ParseError> {
    let entries = 1u16 << (size_bits + 1);
    let stream_offset = reader.position();
    let raw = reader.read_bytes(entries as usize * 3)?;
    let id = hash_table_bytes(&raw);
    cache.get_or_insert(id, &raw);

    Ok(ColorTableRef {
        id,
        stream_offset,
        entries,
    })
}

fn read_blocks<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
    cache: &ColorTableCache,
    parsed: &mut ParsedGif,
) -> Result<(), ParseError> {
    let mut pending_control: Option<GraphicControl> = None;

    loop {
        let introducer = reader.read_u8()?;
        match introducer {
            EXTENSION_INTRODUCER => {
                let label = reader.read_u8()?;
                match label {
                    LABEL_GRAPHIC_CONTROL => {
                        pending_control = Some(read_graphic_control(reader)?);
                    }
                    LABEL_APPLICATION => {
                        if let Some(count) = read_application(reader)? {
                            parsed.loop_count = Some(count);
                        }
                    }
                    LABEL_COMMENT | LABEL_PLAIN_TEXT => {
                        reader.skip_sub_blocks()?;
                    }
                    other => {
                        tracing::debug!(target: targets::PARSER, label = other, "skipping unknown extension");
                        reader.skip_sub_blocks()?;
                    }
                }
            }
            IMAGE_SEPARATOR => {
                let control = pending_control.take().unwrap_or_default();
                read_image(reader, cache, parsed, control)?;
            }
            TRAILER => return Ok(()),
            other => return Err(ParseError::UnexpectedBlock(other)),
        }
    }
}

fn read_graphic_control<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
) -> Result<GraphicControl, ParseError> {
    let size = reader.read_u8()?;
    if size != GRAPHIC_CONTROL_BLOCK_SIZE {
        return Err(ParseError::InvalidBlockSize {
            block: "graphic control",
            expected: GRAPHIC_CONTROL_BLOCK_SIZE,
            found: size,
        });
    }

    let packed = reader.read_u8()?;
    let delay_hundredths = reader.read_u16_le()?;
    let transparent_index = reader.read_u8()?;
    reader.skip_sub_blocks()?;

    Ok(GraphicControl {
        disposal: DisposalMethod::from_bits((packed >> 2) & 0x07),
        has_transparency: packed & 0x01 != 0,
        transparent_index,
        delay_hundredths,
    })
}

/// Returns the loop count if this is a looping application block.
fn read_application<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
) -> Result<Option<u16>, ParseError> {
    let size = reader.read_u8()?;
    if size != APPLICATION_BLOCK_SIZE {
        return Err(ParseError::InvalidBlockSize {
            block: "application",
            expected: APPLICATION_BLOCK_SIZE,
            found: size,
        });
    }

    let mut identifier = [0u8; 11];
    reader.read_exact(&mut identifier)?;
    if !LOOP_APPLICATIONS.iter().any(|app| **app == identifier) {
        reader.skip_sub_blocks()?;
        return Ok(None);
    }

    let mut loop_count = None;
    let mut block = [0u8; MAX_SUB_BLOCK_LEN];
    loop {
        let len = reader.read_sub_block(&mut block)?;
        if len == 0 {
            break;
        }
        if len >= 3 && block[0] == 0x01 {
            loop_count = Some(u16::from_le_bytes([block[1], block[2]]));
        }
    }
    Ok(loop_count)
}

fn read_image<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
    cache: &ColorTableCache,
    parsed: &mut ParsedGif,
    control: GraphicControl,
) -> Result<(), ParseError> {
    let x = reader.read_u16_le()?;
    let y = reader.read_u16_le()?;
    let w = reader.read_u16_le()?;
    let h = reader.read_u16_le()?;
    let packed = reader.read_u8()?;

    let uses_local_table = packed & 0x80 != 0;
    let interlaced = packed & 0x40 != 0;
    let local_table = if uses_local_table {
        Some(read_color_table(reader, cache, packed & 0x07)?)
    } else {
        None
    };

    let lzw_min_code_size = reader.read_u8()?;
    let lzw_stream_offset = reader.position();

    let declared = Rect::new(x, y, w, h);
    let rect = declared.clipped_to(parsed.header.width, parsed.header.height);
    if rect != declared {
        tracing::warn!(
            target: targets::PARSER,
            frame = parsed.frames.len(),
            ?declared,
            ?rect,
            "frame rectangle clipped to canvas"
        );
    }

    parsed.frames.push(Frame {
        rect,
        encoded_width: w,
        encoded_height: h,
        interlaced,
        uses_local_table,
        local_table,
        lzw_min_code_size,
        lzw_stream_offset,
        delay: frame_delay(control.delay_hundredths),
        disposal: control.disposal,
        has_transparency: control.has_transparency,
        transparent_index: control.transparent_index,
        should_backup: control.disposal != DisposalMethod::RestorePrevious,
    });

    reader.skip_sub_blocks()?;
    Ok(())
}
