//! Decoding sessions.
//!
//! A [`GifDecoder`] owns everything needed to turn one GIF stream into
//! composited frames: the reader, the parsed container, LZW working memory
//! and the output [`FrameSurface`]. It can be driven synchronously, or handed
//! to a [`GifPlayer`](crate::GifPlayer) that drives it from a background
//! thread.

use std::io::{Read, Seek};
use std::sync::Arc;

use gifloop_core::PerfSpan;
use gifloop_core::logging::{span_names, targets};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::bitstream::BitstreamReader;
use crate::color_table::{ColorTable, ColorTableCache};
use crate::compositor::{self, Canvas};
use crate::container::{self, Frame, GifHeader, ParsedGif};
use crate::error::{GifError, Result};
use crate::lzw::{self, LzwScratch};

struct SurfaceState {
    canvas: Canvas,
    has_new_frame: bool,
    frame_index: Option<usize>,
}

/// The composited output of a session, shared with consumers.
///
/// A single lock guards the canvas. It is held while a frame is composited
/// and while a consumer copies the canvas out, so a copy never observes a
/// partially drawn frame.
pub struct FrameSurface {
    width: u16,
    height: u16,
    state: Mutex<SurfaceState>,
}

impl FrameSurface {
    fn new(canvas: Canvas) -> Self {
        Self {
            width: canvas.width(),
            height: canvas.height(),
            state: Mutex::new(SurfaceState {
                canvas,
                has_new_frame: false,
                frame_index: None,
            }),
        }
    }

    /// Canvas size in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (u32::from(self.width), u32::from(self.height))
    }

    /// Bytes needed to hold one frame (`width * height * 4`).
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Whether a frame was published since the last successful copy.
    pub fn has_new_frame(&self) -> bool {
        self.state.lock().has_new_frame
    }

    /// The frame currently shown on the canvas.
    pub fn frame_index(&self) -> Option<usize> {
        self.state.lock().frame_index
    }

    /// Copy the canvas into `dst` if a new frame was published since the
    /// last copy.
    ///
    /// Returns `false` without touching `dst` when there is nothing new, or
    /// when `dst` is shorter than [`FrameSurface::byte_len`].
    pub fn copy_latest_frame(&self, dst: &mut [u8]) -> bool {
        let mut state = self.state.lock();
        if !state.has_new_frame {
            return false;
        }
        let src = state.canvas.as_bytes();
        if dst.len() < src.len() {
            tracing::warn!(
                target: targets::PLAYBACK,
                needed = src.len(),
                got = dst.len(),
                "frame copy destination too small"
            );
            return false;
        }
        dst[..src.len()].copy_from_slice(src);
        state.has_new_frame = false;
        true
    }

    /// Copy the canvas into `dst` unconditionally, leaving the new-frame
    /// flag alone.
    pub fn copy_frame(&self, dst: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let src = state.canvas.as_bytes();
        if dst.len() < src.len() {
            return Err(GifError::BufferTooSmall {
                needed: src.len(),
                got: dst.len(),
            });
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Lock and borrow the canvas.
    pub fn canvas(&self) -> MappedMutexGuard<'_, Canvas> {
        MutexGuard::map(self.state.lock(), |state| &mut state.canvas)
    }
}

impl std::fmt::Debug for FrameSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// A decoding session over one GIF stream.
///
/// # Example
///
/// ```no_run
/// use std::fs::File;
/// use std::sync::Arc;
/// use gifloop::{ColorTableCache, GifDecoder};
///
/// let file = File::open("spinner.gif")?;
/// let mut decoder = GifDecoder::open(file, Arc::new(ColorTableCache::with_defaults()))?;
/// for index in 0..decoder.frame_count() {
///     decoder.render_frame(index)?;
///     let canvas = decoder.canvas();
///     println!("frame {index}: {} bytes", canvas.byte_len());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct GifDecoder<R> {
    reader: BitstreamReader<R>,
    gif: ParsedGif,
    palettes: Arc<ColorTableCache>,
    scratch: LzwScratch,
    indices: Vec<u8>,
    surface: Arc<FrameSurface>,
    last_rendered: Option<usize>,
}

impl<R: Read + Seek> GifDecoder<R> {
    /// Parse `source` and prepare a session.
    ///
    /// Fails with [`GifError::NotSeekable`] if `source` cannot seek, and with
    /// [`GifError::Parse`] if the container is malformed.
    pub fn open(source: R, palettes: Arc<ColorTableCache>) -> Result<Self> {
        let mut reader = BitstreamReader::new(source).map_err(GifError::NotSeekable)?;
        let gif = container::parse(&mut reader, &palettes)?;

        let canvas = Canvas::new(
            gif.header.width,
            gif.header.height,
            gif.uses_restore_previous(),
        );

        Ok(Self {
            reader,
            gif,
            palettes,
            scratch: LzwScratch::new(),
            indices: Vec::new(),
            surface: Arc::new(FrameSurface::new(canvas)),
            last_rendered: None,
        })
    }

    /// Logical screen information.
    pub fn header(&self) -> &GifHeader {
        &self.gif.header
    }

    /// Frame metadata in stream order.
    pub fn frames(&self) -> &[Frame] {
        &self.gif.frames
    }

    pub fn frame_count(&self) -> usize {
        self.gif.frames.len()
    }

    /// The file's loop count, if it declared one.
    pub fn loop_count(&self) -> Option<u16> {
        self.gif.loop_count
    }

    /// Everything learned from parsing.
    pub fn parsed(&self) -> &ParsedGif {
        &self.gif
    }

    /// The output surface.
    pub fn surface(&self) -> &Arc<FrameSurface> {
        &self.surface
    }

    /// Lock and borrow the canvas.
    pub fn canvas(&self) -> MappedMutexGuard<'_, Canvas> {
        self.surface.canvas()
    }

    /// The frame composited last, if any.
    pub fn last_rendered(&self) -> Option<usize> {
        self.last_rendered
    }

    /// The shared palette cache.
    pub fn palettes(&self) -> &Arc<ColorTableCache> {
        &self.palettes
    }

    /// Decode and composite frame `index` on top of the current canvas.
    ///
    /// Rendering frames in increasing order reproduces the animation.
    /// Rendering an index at or before the last one starts over from a
    /// cleared canvas; use [`GifDecoder::seek`] to reconstruct a frame
    /// exactly.
    pub fn render_frame(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let _palette = self.decode(index)?;

        let mut state = self.surface.state.lock();
        compositor::composite(
            &self.gif.frames,
            index,
            self.last_rendered,
            &mut state.canvas,
            &self.palettes,
            self.gif.header.global_table.map(|table| table.id),
            &self.indices,
        )?;
        state.has_new_frame = true;
        state.frame_index = Some(index);
        drop(state);

        self.last_rendered = Some(index);
        Ok(())
    }

    /// Reconstruct the canvas as it looks when frame `target` is shown.
    ///
    /// Replays from the closest frame at or before `target` that fully
    /// determines the canvas, or from frame 0 if there is none. The new-frame
    /// flag is only raised once the replay is complete.
    pub fn seek(&mut self, target: usize) -> Result<()> {
        self.check_index(target)?;
        let _span = PerfSpan::new(span_names::SEEK);

        let (width, height) = (self.gif.header.width, self.gif.header.height);
        let start = (0..=target)
            .rev()
            .find(|&i| self.gif.frames[i].is_keyframe(width, height))
            .unwrap_or(0);

        tracing::debug!(target: targets::PLAYBACK, target, start, "seeking");
        self.surface.state.lock().has_new_frame = false;

        let mut previous = None;
        for index in start..=target {
            let _palette = self.decode(index)?;
            let mut state = self.surface.state.lock();
            compositor::composite(
                &self.gif.frames,
                index,
                previous,
                &mut state.canvas,
                &self.palettes,
                self.gif.header.global_table.map(|table| table.id),
                &self.indices,
            )?;
            if index == target {
                state.has_new_frame = true;
                state.frame_index = Some(target);
            }
            drop(state);

            previous = Some(index);
            self.last_rendered = previous;
        }
        Ok(())
    }

    /// Give back the underlying source.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.gif.frames.len() {
            Ok(())
        } else {
            Err(GifError::FrameOutOfRange {
                index,
                frame_count: self.gif.frames.len(),
            })
        }
    }

    /// Decompress frame `index` into the index buffer.
    ///
    /// Returns the frame's palette, which the caller keeps alive until it has
    /// composited so the cache cannot expire it in between.
    fn decode(&mut self, index: usize) -> Result<Option<Arc<ColorTable>>> {
        let _span = PerfSpan::new(span_names::DECODE_FRAME);
        let palette = self.palette_for(index)?;

        let frame = &self.gif.frames[index];
        self.indices.resize(frame.index_len(), 0);
        lzw::decompress_frame(&mut self.reader, frame, &mut self.indices, &mut self.scratch)?;

        tracing::trace!(target: targets::LZW, frame = index, len = self.indices.len(), "frame decompressed");
        Ok(palette)
    }

    /// Fetch the frame's palette, re-reading it from the stream if the cache
    /// dropped it.
    fn palette_for(&mut self, index: usize) -> Result<Option<Arc<ColorTable>>> {
        let frame = &self.gif.frames[index];
        let Some(table) = frame.local_table.or(self.gif.header.global_table) else {
            return Ok(None);
        };
        if let Some(palette) = self.palettes.get(table.id) {
            return Ok(Some(palette));
        }

        tracing::debug!(
            target: targets::PALETTE,
            id = format_args!("{:016x}", table.id),
            frame = index,
            "palette evicted; re-reading from stream"
        );
        self.reader.seek_to(table.stream_offset)?;
        let raw = self.reader.read_bytes(table.byte_len())?;
        Ok(Some(self.palettes.get_or_insert(table.id, &raw)))
    }
}

impl<R> std::fmt::Debug for GifDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GifDecoder")
            .field("header", &self.gif.header)
            .field("frames", &self.gif.frames.len())
            .field("last_rendered", &self.last_rendered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bgra8;
    use std::io::{self, Cursor, SeekFrom};

    /// 2x1 canvas, palette red/green, two single-pixel frames.
    fn two_frame_gif() -> Vec<u8> {
        let mut out = b"GIF89a".to_vec();
        out.extend_from_slice(&[2, 0, 1, 0, 0x80, 0, 0]);
        out.extend_from_slice(&[255, 0, 0, 0, 255, 0]);
        for (x, index) in [(0u8, 0u8), (1, 1)] {
            out.extend_from_slice(&[0x2C, x, 0, 0, 0, 1, 0, 1, 0, 0]);
            // min code size 2: clear, index, stop; all 3-bit codes.
            let bits = 4u16 | (u16::from(index) << 3) | (5 << 6);
            out.extend_from_slice(&[2, 2, bits as u8, (bits >> 8) as u8, 0]);
        }
        out.push(0x3B);
        out
    }

    fn open(bytes: Vec<u8>) -> GifDecoder<Cursor<Vec<u8>>> {
        GifDecoder::open(Cursor::new(bytes), Arc::new(ColorTableCache::with_defaults())).unwrap()
    }

    #[test]
    fn test_render_sequence() {
        let mut decoder = open(two_frame_gif());
        assert_eq!(decoder.frame_count(), 2);
        assert_eq!(decoder.surface().dimensions(), (2, 1));

        decoder.render_frame(0).unwrap();
        decoder.render_frame(1).unwrap();

        let mut buf = vec![0u8; decoder.surface().byte_len()];
        assert!(decoder.surface().copy_latest_frame(&mut buf));
        assert_eq!(buf, vec![0, 0, 255, 255, 0, 255, 0, 255]);
        assert!(!decoder.surface().copy_latest_frame(&mut buf));
        assert_eq!(decoder.last_rendered(), Some(1));
    }

    #[test]
    fn test_seek_matches_sequential() {
        let mut sequential = open(two_frame_gif());
        sequential.render_frame(0).unwrap();
        sequential.render_frame(1).unwrap();

        let mut seeking = open(two_frame_gif());
        seeking.seek(1).unwrap();
        assert_eq!(seeking.canvas().pixels(), sequential.canvas().pixels());
        assert_eq!(seeking.surface().frame_index(), Some(1));
    }

    #[test]
    fn test_oversized_descriptor_is_clipped_before_decoding() {
        // 1x1 canvas; the only frame declares itself 8000x8000.
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[1, 0, 1, 0, 0x80, 0, 0]);
        bytes.extend_from_slice(&[255, 0, 0, 0, 255, 0]);
        bytes.extend_from_slice(&[0x2C, 0, 0, 0, 0, 0x40, 0x1F, 0x40, 0x1F, 0]);
        let bits = 4u16 | (1 << 3) | (5 << 6);
        bytes.extend_from_slice(&[2, 2, bits as u8, (bits >> 8) as u8, 0]);
        bytes.push(0x3B);

        let mut decoder = open(bytes);
        let frame = decoder.frames()[0].clone();
        assert_eq!((frame.encoded_width, frame.encoded_height), (8000, 8000));
        assert_eq!(frame.rect.area(), 1);

        decoder.render_frame(0).unwrap();
        assert_eq!(decoder.indices.len(), frame.rect.area());
        assert!(decoder.indices.capacity() < 1024);
        assert_eq!(decoder.canvas().pixels(), &[Bgra8::opaque(0, 255, 0)]);
    }

    #[test]
    fn test_out_of_range() {
        let mut decoder = open(two_frame_gif());
        assert!(matches!(
            decoder.render_frame(2),
            Err(GifError::FrameOutOfRange { index: 2, frame_count: 2 })
        ));
        assert!(decoder.seek(5).is_err());
    }

    #[test]
    fn test_small_destination() {
        let mut decoder = open(two_frame_gif());
        decoder.render_frame(0).unwrap();
        let mut small = [0u8; 4];
        assert!(!decoder.surface().copy_latest_frame(&mut small));
        assert!(decoder.surface().has_new_frame());
        assert!(matches!(
            decoder.surface().copy_frame(&mut small),
            Err(GifError::BufferTooSmall { needed: 8, got: 4 })
        ));
    }

    #[test]
    fn test_palette_reloaded_after_eviction() {
        let mut decoder = open(two_frame_gif());
        decoder.palettes().clear();
        decoder.render_frame(0).unwrap();
        assert_eq!(decoder.palettes().len(), 1);
    }

    struct Unseekable(Cursor<Vec<u8>>);

    impl Read for Unseekable {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for Unseekable {
        fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "pipe"))
        }
    }

    #[test]
    fn test_not_seekable() {
        let result = GifDecoder::open(
            Unseekable(Cursor::new(two_frame_gif())),
            Arc::new(ColorTableCache::with_defaults()),
        );
        assert!(matches!(result, Err(GifError::NotSeekable(_))));
    }
}
