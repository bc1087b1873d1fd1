//! Shared helpers for integration tests: an in-process GIF writer.
//!
//! The LZW coder only ever emits literal codes (plus periodic clears), which
//! is valid GIF and keeps the encoder trivially correct while still walking
//! the decoder through code-width growth and dictionary resets.

#![allow(dead_code)]

use std::sync::Once;

/// Install a `tracing` subscriber that writes through the test harness.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const WHITE: [u8; 3] = [255, 255, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];

pub const DISPOSE_UNSPECIFIED: u8 = 0;
pub const DISPOSE_LEAVE: u8 = 1;
pub const DISPOSE_BACKGROUND: u8 = 2;
pub const DISPOSE_PREVIOUS: u8 = 3;

/// The BGRA bytes the decoder produces for an opaque RGB color.
pub fn bgra(rgb: [u8; 3]) -> [u8; 4] {
    [rgb[2], rgb[1], rgb[0], 255]
}

/// One image in a [`GifBuilder`].
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Indices in image row order, `width * height` of them.
    pub indices: Vec<u8>,
    pub delay_hundredths: u16,
    pub disposal: u8,
    pub transparent: Option<u8>,
    pub interlaced: bool,
    pub local_palette: Option<Vec<[u8; 3]>>,
}

impl FrameSpec {
    pub fn new(x: u16, y: u16, width: u16, height: u16, indices: Vec<u8>) -> Self {
        assert_eq!(indices.len(), width as usize * height as usize);
        Self {
            x,
            y,
            width,
            height,
            indices,
            delay_hundredths: 10,
            disposal: DISPOSE_UNSPECIFIED,
            transparent: None,
            interlaced: false,
            local_palette: None,
        }
    }

    /// A rectangle filled with one index.
    pub fn solid(x: u16, y: u16, width: u16, height: u16, index: u8) -> Self {
        Self::new(x, y, width, height, vec![index; width as usize * height as usize])
    }

    pub fn delay(mut self, hundredths: u16) -> Self {
        self.delay_hundredths = hundredths;
        self
    }

    pub fn disposal(mut self, disposal: u8) -> Self {
        self.disposal = disposal;
        self
    }

    pub fn transparent(mut self, index: u8) -> Self {
        self.transparent = Some(index);
        self
    }

    pub fn interlaced(mut self) -> Self {
        self.interlaced = true;
        self
    }

    pub fn local_palette(mut self, palette: Vec<[u8; 3]>) -> Self {
        self.local_palette = Some(palette);
        self
    }
}

/// Writes GIF89a streams.
#[derive(Debug, Clone)]
pub struct GifBuilder {
    width: u16,
    height: u16,
    global_palette: Option<Vec<[u8; 3]>>,
    loop_count: Option<u16>,
    frames: Vec<FrameSpec>,
    trailer: bool,
}

impl GifBuilder {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            global_palette: None,
            loop_count: None,
            frames: Vec::new(),
            trailer: true,
        }
    }

    pub fn global_palette(mut self, palette: Vec<[u8; 3]>) -> Self {
        self.global_palette = Some(palette);
        self
    }

    pub fn loop_count(mut self, count: u16) -> Self {
        self.loop_count = Some(count);
        self
    }

    pub fn frame(mut self, frame: FrameSpec) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn without_trailer(mut self) -> Self {
        self.trailer = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = b"GIF89a".to_vec();
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());

        let mut global_bits = 0;
        match &self.global_palette {
            Some(palette) => {
                global_bits = size_bits(palette.len());
                out.extend_from_slice(&[0x80 | global_bits, 0, 0]);
                write_palette(&mut out, palette, global_bits);
            }
            None => out.extend_from_slice(&[0, 0, 0]),
        }

        if let Some(count) = self.loop_count {
            out.extend_from_slice(&[0x21, 0xFF, 11]);
            out.extend_from_slice(b"NETSCAPE2.0");
            out.extend_from_slice(&[3, 1]);
            out.extend_from_slice(&count.to_le_bytes());
            out.push(0);
        }

        for frame in &self.frames {
            let mut packed = frame.disposal << 2;
            if frame.transparent.is_some() {
                packed |= 1;
            }
            out.extend_from_slice(&[0x21, 0xF9, 4, packed]);
            out.extend_from_slice(&frame.delay_hundredths.to_le_bytes());
            out.extend_from_slice(&[frame.transparent.unwrap_or(0), 0]);

            out.push(0x2C);
            for v in [frame.x, frame.y, frame.width, frame.height] {
                out.extend_from_slice(&v.to_le_bytes());
            }

            let mut image_packed = 0;
            if frame.interlaced {
                image_packed |= 0x40;
            }
            let table_bits = match &frame.local_palette {
                Some(palette) => {
                    let bits = size_bits(palette.len());
                    out.push(image_packed | 0x80 | bits);
                    write_palette(&mut out, palette, bits);
                    bits
                }
                None => {
                    out.push(image_packed);
                    global_bits
                }
            };

            let min_code_size = (table_bits + 1).max(2);
            out.push(min_code_size);

            let stream = if frame.interlaced {
                interlace(&frame.indices, frame.width, frame.height)
            } else {
                frame.indices.clone()
            };
            write_sub_blocks(&mut out, &lzw_encode(min_code_size, &stream));
        }

        if self.trailer {
            out.push(0x3B);
        }
        out
    }
}

/// Color table size field for `len` entries.
fn size_bits(len: usize) -> u8 {
    let mut bits = 0u8;
    while (2usize << bits) < len {
        bits += 1;
    }
    bits
}

fn write_palette(out: &mut Vec<u8>, palette: &[[u8; 3]], bits: u8) {
    let entries = 2usize << bits;
    for i in 0..entries {
        out.extend_from_slice(palette.get(i).unwrap_or(&BLACK));
    }
}

/// Reorder image rows into interlaced stream order.
fn interlace(indices: &[u8], width: u16, height: u16) -> Vec<u8> {
    let width = width as usize;
    let mut out = Vec::with_capacity(indices.len());
    for (start, step) in [(0, 8), (4, 8), (2, 4), (1, 2)] {
        for row in (start..height as usize).step_by(step) {
            out.extend_from_slice(&indices[row * width..(row + 1) * width]);
        }
    }
    out
}

struct BitWriter {
    out: Vec<u8>,
    datum: u32,
    bits: u8,
}

impl BitWriter {
    fn write(&mut self, code: u16, width: u8) {
        self.datum |= u32::from(code) << self.bits;
        self.bits += width;
        while self.bits >= 8 {
            self.out.push(self.datum as u8);
            self.datum >>= 8;
            self.bits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.out.push(self.datum as u8);
        }
        self.out
    }
}

/// Literal-only GIF LZW coding.
pub fn lzw_encode(min_code_size: u8, indices: &[u8]) -> Vec<u8> {
    let clear = 1u16 << min_code_size;
    let stop = clear + 1;
    let mut writer = BitWriter {
        out: Vec::new(),
        datum: 0,
        bits: 0,
    };

    let mut width = min_code_size + 1;
    let mut next = clear + 2;
    let mut has_previous = false;
    writer.write(clear, width);

    for &index in indices {
        if next >= 4000 {
            writer.write(clear, width);
            width = min_code_size + 1;
            next = clear + 2;
            has_previous = false;
        }
        writer.write(u16::from(index), width);
        if has_previous && next < 4096 {
            next += 1;
            if next == 1 << width && width < 12 {
                width += 1;
            }
        }
        has_previous = true;
    }

    writer.write(stop, width);
    writer.finish()
}

pub fn write_sub_blocks(out: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(255) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
}

/// Minimal two-frame looping animation on a 4x4 canvas.
///
/// Palette of four colors, both frames full-canvas with 100 ms delays, loop
/// forever. Frame 0 is red, frame 1 is green.
pub fn two_frame_loop() -> Vec<u8> {
    GifBuilder::new(4, 4)
        .global_palette(vec![RED, GREEN, BLUE, WHITE])
        .loop_count(0)
        .frame(FrameSpec::solid(0, 0, 4, 4, 0).delay(10))
        .frame(FrameSpec::solid(0, 0, 4, 4, 1).delay(10))
        .build()
}
