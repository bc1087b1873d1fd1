//! Pixel and geometry types shared by the decoder and compositor.

use bytemuck::{Pod, Zeroable};

/// A palette entry as stored in a GIF color table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb8 {
    /// Red component.
    pub r: u8,
    /// Green component.
    pub g: u8,
    /// Blue component.
    pub b: u8,
}

impl Rgb8 {
    /// Create a color from its components.
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// The fully opaque framebuffer pixel for this color.
    #[inline]
    pub const fn to_bgra(self) -> Bgra8 {
        Bgra8 {
            b: self.b,
            g: self.g,
            r: self.r,
            a: 0xFF,
        }
    }
}

/// A framebuffer pixel, laid out `B, G, R, A` in memory.
///
/// The back-buffer is a `Vec<Bgra8>`; consumers receive it as raw bytes via
/// [`bytemuck::cast_slice`], four bytes per pixel with no row padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Bgra8 {
    /// Blue component.
    pub b: u8,
    /// Green component.
    pub g: u8,
    /// Red component.
    pub r: u8,
    /// Alpha component (0 = fully transparent).
    pub a: u8,
}

impl Bgra8 {
    /// Fully transparent black.
    pub const TRANSPARENT: Bgra8 = Bgra8 {
        b: 0,
        g: 0,
        r: 0,
        a: 0,
    };

    /// Create an opaque pixel from RGB components.
    #[inline]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { b, g, r, a: 0xFF }
    }

    /// Whether this pixel is fully transparent.
    #[inline]
    pub const fn is_transparent(self) -> bool {
        self.a == 0
    }
}

/// An axis-aligned rectangle in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge.
    pub x: u16,
    /// Top edge.
    pub y: u16,
    /// Width in pixels.
    pub w: u16,
    /// Height in pixels.
    pub h: u16,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }

    /// Number of pixels covered.
    #[inline]
    pub fn area(&self) -> usize {
        self.w as usize * self.h as usize
    }

    /// Whether the rectangle covers no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Clip this rectangle to `[0, width) x [0, height)`.
    ///
    /// A rectangle entirely outside the canvas becomes empty, anchored at
    /// the clamped origin.
    pub fn clipped_to(&self, width: u16, height: u16) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = (self.x as u32 + self.w as u32).min(width as u32) as u16;
        let bottom = (self.y as u32 + self.h as u32).min(height as u32) as u16;
        Rect {
            x,
            y,
            w: right.saturating_sub(x),
            h: bottom.saturating_sub(y),
        }
    }

    /// Whether this rectangle covers the whole `width x height` canvas.
    #[inline]
    pub fn covers(&self, width: u16, height: u16) -> bool {
        self.x == 0 && self.y == 0 && self.w >= width && self.h >= height
    }
}
