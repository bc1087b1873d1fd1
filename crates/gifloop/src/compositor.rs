//! Frame compositing onto a persistent canvas.
//!
//! [`composite`] is stateless: everything it needs to know about earlier
//! frames is passed in, namely which frame was drawn last and the
//! [`Canvas`] holding the result plus its backup raster.
//!
//! Per frame, in order:
//!
//! 1. If this is the first frame drawn, or a rewind to an index at or before
//!    the last one, the canvas is cleared to transparent.
//! 2. Otherwise the previous frame's disposal is applied to the previous
//!    frame's rectangle (clear to transparent, or restore from backup).
//!    A restore covers the rectangle of the frame that requested it, not the
//!    rectangle of the frame about to be drawn.
//! 3. If this frame itself is `RestorePrevious`, its rectangle is copied to the
//!    backup raster so the next frame can restore it.
//! 4. The frame's indices are drawn through its palette. Transparent indices
//!    leave the destination untouched and indices past the end of the palette
//!    are skipped.
//!
//! Indices arrive already clipped to the canvas and in image row order (see
//! [`crate::lzw`]), so drawing is a plain row copy with stride `rect.w`.

use gifloop_core::PerfSpan;
use gifloop_core::logging::{span_names, targets};

use crate::color_table::{ColorTable, ColorTableCache};
use crate::container::{DisposalMethod, Frame};
use crate::error::{GifError, Result};
use crate::types::{Bgra8, Rect};

/// The persistent BGRA raster frames are composited into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u16,
    height: u16,
    pixels: Vec<Bgra8>,
    backup: Option<Vec<Bgra8>>,
}

impl Canvas {
    /// Create a transparent canvas.
    ///
    /// The backup raster is allocated up front when `with_backup` is set and
    /// on first use otherwise.
    pub fn new(width: u16, height: u16, with_backup: bool) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: vec![Bgra8::TRANSPARENT; len],
            backup: with_backup.then(|| vec![Bgra8::TRANSPARENT; len]),
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Pixels in row-major order.
    pub fn pixels(&self) -> &[Bgra8] {
        &self.pixels
    }

    /// Pixels as raw `B, G, R, A` bytes, stride `width * 4`.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Size of [`Canvas::as_bytes`].
    pub fn byte_len(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<Bgra8>()
    }

    /// Pixel at `(x, y)`, if on the canvas.
    pub fn pixel(&self, x: u16, y: u16) -> Option<Bgra8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Whether a backup raster has been allocated.
    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Reset every pixel to transparent.
    pub fn clear(&mut self) {
        self.pixels.fill(Bgra8::TRANSPARENT);
    }

    fn fill_rect(&mut self, rect: Rect, color: Bgra8) {
        let rect = rect.clipped_to(self.width, self.height);
        let stride = self.width as usize;
        for row in rect.y as usize..(rect.y + rect.h) as usize {
            let start = row * stride + rect.x as usize;
            self.pixels[start..start + rect.w as usize].fill(color);
        }
    }

    fn save_rect(&mut self, rect: Rect) {
        let rect = rect.clipped_to(self.width, self.height);
        let stride = self.width as usize;
        let len = self.pixels.len();
        let backup = self
            .backup
            .get_or_insert_with(|| vec![Bgra8::TRANSPARENT; len]);
        for row in rect.y as usize..(rect.y + rect.h) as usize {
            let start = row * stride + rect.x as usize;
            let end = start + rect.w as usize;
            backup[start..end].copy_from_slice(&self.pixels[start..end]);
        }
    }

    fn restore_rect(&mut self, rect: Rect) {
        let rect = rect.clipped_to(self.width, self.height);
        let stride = self.width as usize;
        let Some(backup) = self.backup.as_ref() else {
            tracing::debug!(target: targets::COMPOSITOR, "restore requested before any backup; clearing instead");
            self.fill_rect(rect, Bgra8::TRANSPARENT);
            return;
        };
        for row in rect.y as usize..(rect.y + rect.h) as usize {
            let start = row * stride + rect.x as usize;
            let end = start + rect.w as usize;
            self.pixels[start..end].copy_from_slice(&backup[start..end]);
        }
    }
}

/// Composite `frames[frame_index]` onto `canvas`.
///
/// `previous` is the frame composited into `canvas` last, if any.
/// `global_table` is the id of the global color table. `indices` holds the
/// frame's visible indices in image row order, as produced by
/// [`crate::lzw::decompress_frame`], and must cover [`Frame::index_len`]
/// entries.
pub fn composite(
    frames: &[Frame],
    frame_index: usize,
    previous: Option<usize>,
    canvas: &mut Canvas,
    palettes: &ColorTableCache,
    global_table: Option<u64>,
    indices: &[u8],
) -> Result<()> {
    let _span = PerfSpan::new(span_names::COMPOSITE);

    let frame = frames.get(frame_index).ok_or(GifError::FrameOutOfRange {
        index: frame_index,
        frame_count: frames.len(),
    })?;
    if indices.len() < frame.index_len() {
        return Err(GifError::BufferTooSmall {
            needed: frame.index_len(),
            got: indices.len(),
        });
    }

    let palette = match frame.local_table_id().or(global_table) {
        Some(id) => Some(palettes.get(id).ok_or(GifError::MissingColorTable(id))?),
        None => None,
    };

    apply_disposal(frames, frame_index, previous, canvas);

    if frame.disposal == DisposalMethod::RestorePrevious {
        canvas.save_rect(frame.rect);
    }

    let empty = ColorTable::from_rgb_bytes(&[]);
    let palette = palette.as_deref().unwrap_or(&empty);
    if palette.is_empty() {
        tracing::debug!(target: targets::COMPOSITOR, frame = frame_index, "frame has no color table; nothing drawn");
    }
    let skipped = draw(frame, canvas, palette, indices);
    if skipped > 0 {
        tracing::debug!(
            target: targets::COMPOSITOR,
            frame = frame_index,
            skipped,
            "indices outside the palette were skipped"
        );
    }

    tracing::trace!(target: targets::COMPOSITOR, frame = frame_index, ?previous, "frame composited");
    Ok(())
}

fn apply_disposal(frames: &[Frame], frame_index: usize, previous: Option<usize>, canvas: &mut Canvas) {
    let prior = match previous {
        Some(prior) if prior < frame_index => prior,
        _ => {
            canvas.clear();
            return;
        }
    };
    let Some(prior_frame) = frames.get(prior) else {
        canvas.clear();
        return;
    };

    match prior_frame.disposal {
        DisposalMethod::RestoreBackground => canvas.fill_rect(prior_frame.rect, Bgra8::TRANSPARENT),
        DisposalMethod::RestorePrevious => canvas.restore_rect(prior_frame.rect),
        DisposalMethod::Leave | DisposalMethod::Unspecified => {}
    }
}

/// Returns the number of palette misses.
fn draw(frame: &Frame, canvas: &mut Canvas, palette: &ColorTable, indices: &[u8]) -> usize {
    let stride = canvas.width as usize;
    let rect = frame.rect;
    let width = rect.w as usize;
    if width == 0 {
        return 0;
    }
    let mut skipped = 0;

    for (row, source) in indices.chunks_exact(width).take(rect.h as usize).enumerate() {
        let target = (rect.y as usize + row) * stride + rect.x as usize;
        let Some(destination) = canvas.pixels.get_mut(target..target + width) else {
            break;
        };
        for (pixel, &index) in destination.iter_mut().zip(source) {
            if frame.has_transparency && index == frame.transparent_index {
                continue;
            }
            match palette.bgra(index) {
                Some(color) => *pixel = color,
                None => skipped += 1,
            }
        }
    }
    skipped
}
