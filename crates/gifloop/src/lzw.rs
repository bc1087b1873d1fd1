//! Variable-width GIF LZW decompression.
//!
//! Decompression is stateless between calls: each call seeks back to the
//! frame's first data sub-block and expands the whole stream again. The
//! dictionary tables and the sub-block buffer live in an [`LzwScratch`] that
//! callers keep around to avoid reallocating per frame.
//!
//! Output covers only the part of the frame that lies on the canvas
//! ([`Frame::rect`]), in image row order. Pixels the descriptor places past
//! the canvas edge are decoded and dropped, and interlaced rows are put in
//! place as they arrive.

use std::io::{self, Read, Seek};

use gifloop_core::logging::targets;

use crate::bitstream::{BitstreamReader, MAX_SUB_BLOCK_LEN};
use crate::container::Frame;
use crate::error::LzwError;

/// Widest code GIF allows.
pub const MAX_CODE_BITS: u8 = 12;

/// Dictionary capacity at the widest code size.
pub const MAX_DICTIONARY_LEN: usize = 1 << MAX_CODE_BITS;

/// Pixel stack capacity: one full dictionary chain plus the deferred entry.
pub const PIXEL_STACK_LEN: usize = MAX_DICTIONARY_LEN + 1;

/// Interlace passes as `(first row, row step)`.
pub const INTERLACE_PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

/// Image rows of an interlaced frame of height `height`, in stream order.
pub fn interlaced_rows(height: u16) -> impl Iterator<Item = usize> {
    let height = height as usize;
    INTERLACE_PASSES
        .iter()
        .flat_map(move |&(start, step)| (start..height).step_by(step))
}

/// Reusable working memory for [`decompress_frame`].
pub struct LzwScratch {
    block: [u8; MAX_SUB_BLOCK_LEN],
    prefix: Box<[u16; MAX_DICTIONARY_LEN]>,
    suffix: Box<[u8; MAX_DICTIONARY_LEN]>,
    stack: Box<[u8; PIXEL_STACK_LEN]>,
}

impl LzwScratch {
    pub fn new() -> Self {
        Self {
            block: [0; MAX_SUB_BLOCK_LEN],
            prefix: Box::new([0; MAX_DICTIONARY_LEN]),
            suffix: Box::new([0; MAX_DICTIONARY_LEN]),
            stack: Box::new([0; PIXEL_STACK_LEN]),
        }
    }
}

impl Default for LzwScratch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LzwScratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzwScratch").finish_non_exhaustive()
    }
}

/// Sub-block backed LSB-first bit reader.
struct CodeReader<'a, R> {
    reader: &'a mut BitstreamReader<R>,
    block: &'a mut [u8; MAX_SUB_BLOCK_LEN],
    block_len: usize,
    block_pos: usize,
    datum: u32,
    bits: u8,
    exhausted: bool,
}

impl<R: Read + Seek> CodeReader<'_, R> {
    /// Next `width`-bit code, or `None` once the data runs out.
    fn next_code(&mut self, width: u8) -> Result<Option<u16>, LzwError> {
        while self.bits < width {
            if self.block_pos == self.block_len && (self.exhausted || !self.refill()?) {
                return Ok(None);
            }
            self.datum |= u32::from(self.block[self.block_pos]) << self.bits;
            self.block_pos += 1;
            self.bits += 8;
        }

        let code = (self.datum & ((1u32 << width) - 1)) as u16;
        self.datum >>= width;
        self.bits -= width;
        Ok(Some(code))
    }

    fn refill(&mut self) -> Result<bool, LzwError> {
        match self.reader.read_sub_block(self.block) {
            Ok(0) => {
                self.exhausted = true;
                Ok(false)
            }
            Ok(len) => {
                self.block_len = len;
                self.block_pos = 0;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!(target: targets::LZW, "LZW data truncated by end of stream");
                self.exhausted = true;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Places decoded indices, given in stream order, into the visible rectangle.
struct RowSink<'a> {
    out: &'a mut [u8],
    encoded_width: usize,
    visible_width: usize,
    visible_height: usize,
    rows: Box<dyn Iterator<Item = usize>>,
    row: Option<usize>,
    col: usize,
    remaining: usize,
}

impl<'a> RowSink<'a> {
    fn new(frame: &Frame, out: &'a mut [u8]) -> Self {
        let visible_width = frame.rect.w as usize;
        let visible_height = frame.rect.h as usize;
        let visible = (visible_width * visible_height).min(out.len());
        out[..visible].fill(0);

        let mut rows: Box<dyn Iterator<Item = usize>> = if frame.interlaced {
            Box::new(interlaced_rows(frame.encoded_height))
        } else {
            Box::new(0..frame.encoded_height as usize)
        };
        let row = rows.next();
        Self {
            out,
            encoded_width: frame.encoded_width as usize,
            visible_width,
            visible_height,
            rows,
            row,
            col: 0,
            remaining: visible,
        }
    }

    /// No visible pixel is left to fill, or the image has no rows left.
    fn is_done(&self) -> bool {
        self.remaining == 0 || self.row.is_none()
    }

    fn push(&mut self, index: u8) {
        if let Some(row) = self.row
            && row < self.visible_height
            && self.col < self.visible_width
            && let Some(slot) = self.out.get_mut(row * self.visible_width + self.col)
        {
            *slot = index;
            self.remaining -= 1;
        }
        self.col += 1;
        if self.col >= self.encoded_width {
            self.col = 0;
            self.row = self.rows.next();
        }
    }
}

/// Expand `frame`'s LZW data into `out`.
///
/// `out` receives the `frame.rect.w * frame.rect.h` visible indices in image
/// row order ([`Frame::index_len`]); entries past that are left untouched. If
/// the data ends (stop code, terminator or end of stream) early, indices not
/// yet produced are 0. Data past the end of the image is ignored.
pub fn decompress_frame<R: Read + Seek>(
    reader: &mut BitstreamReader<R>,
    frame: &Frame,
    out: &mut [u8],
    scratch: &mut LzwScratch,
) -> Result<(), LzwError> {
    let min_code_size = frame.lzw_min_code_size;
    if !(1..MAX_CODE_BITS).contains(&min_code_size) {
        return Err(LzwError::InvalidCodeSize(min_code_size));
    }
    reader.seek_to(frame.lzw_stream_offset)?;

    let clear = 1u16 << min_code_size;
    let end_of_information = clear + 1;
    let first_free = clear + 2;

    let LzwScratch {
        block,
        prefix,
        suffix,
        stack,
    } = scratch;
    for code in 0..clear {
        prefix[code as usize] = 0;
        suffix[code as usize] = code as u8;
    }

    let mut codes = CodeReader {
        reader,
        block,
        block_len: 0,
        block_pos: 0,
        datum: 0,
        bits: 0,
        exhausted: false,
    };

    let mut sink = RowSink::new(frame, out);
    let mut code_size = min_code_size + 1;
    let mut available = first_free;
    let mut old_code: Option<u16> = None;
    let mut first: u8 = 0;

    while !sink.is_done() {
        let Some(code) = codes.next_code(code_size)? else {
            break;
        };

        if code == clear {
            code_size = min_code_size + 1;
            available = first_free;
            old_code = None;
            continue;
        }
        if code == end_of_information {
            break;
        }

        let Some(previous) = old_code else {
            if code >= clear {
                return Err(LzwError::CodeOutOfRange { code, available });
            }
            sink.push(code as u8);
            first = code as u8;
            old_code = Some(code);
            continue;
        };

        if code > available {
            return Err(LzwError::CodeOutOfRange { code, available });
        }

        let mut top = 0;
        let mut current = code;
        if code == available {
            stack[top] = first;
            top += 1;
            current = previous;
        }
        while current >= clear {
            if top >= PIXEL_STACK_LEN {
                return Err(LzwError::StackOverflow);
            }
            let next = prefix[current as usize];
            if next == current {
                return Err(LzwError::SelfReferentialCode(current));
            }
            stack[top] = suffix[current as usize];
            top += 1;
            current = next;
        }
        if top >= PIXEL_STACK_LEN {
            return Err(LzwError::StackOverflow);
        }
        first = suffix[current as usize];
        stack[top] = first;
        top += 1;

        if (available as usize) < MAX_DICTIONARY_LEN {
            prefix[available as usize] = previous;
            suffix[available as usize] = first;
            available += 1;
            if available == 1 << code_size && code_size < MAX_CODE_BITS {
                code_size += 1;
            }
        }
        old_code = Some(code);

        while top > 0 && !sink.is_done() {
            top -= 1;
            sink.push(stack[top]);
        }
    }

    if sink.remaining > 0 {
        tracing::trace!(
            target: targets::LZW,
            missing = sink.remaining,
            "LZW stream shorter than frame; zero-filled"
        );
    }
    Ok(())
}
