//! Pixel targets the scope draws onto.

/// Rows in every canvas and scratch segment; one per display byte.
pub const HEIGHT: usize = 256;

/// A fixed-size RGBA surface, `width() × HEIGHT`, that accepts blits at a
/// horizontal offset.
pub trait Canvas {
    fn width(&self) -> usize;

    /// Copy an `image_width × HEIGHT` RGBA block so its first column lands
    /// on column `x`. Columns falling outside the canvas are dropped.
    fn put_image(&mut self, rgba: &[u8], image_width: usize, x: i64);

    /// Reset every pixel to transparent black.
    fn clear(&mut self);
}

/// In-memory canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: usize) -> Self {
        PixelBuffer {
            width,
            data: vec![0; width * HEIGHT * 4],
        }
    }

    /// Row-major RGBA bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGBA at `(x, row)`; out-of-range reads are transparent black.
    pub fn pixel(&self, x: usize, row: usize) -> [u8; 4] {
        if x >= self.width || row >= HEIGHT {
            return [0; 4];
        }
        let idx = (row * self.width + x) * 4;
        let mut px = [0; 4];
        px.copy_from_slice(&self.data[idx..idx + 4]);
        px
    }
}

impl Canvas for PixelBuffer {
    fn width(&self) -> usize {
        self.width
    }

    fn put_image(&mut self, rgba: &[u8], image_width: usize, x: i64) {
        if rgba.len() < image_width * HEIGHT * 4 {
            return;
        }
        for col in 0..image_width {
            let dest = x + col as i64;
            if dest < 0 || dest >= self.width as i64 {
                continue;
            }
            let dest = dest as usize;
            for row in 0..HEIGHT {
                let src = (row * image_width + col) * 4;
                let dst = (row * self.width + dest) * 4;
                self.data[dst..dst + 4].copy_from_slice(&rgba[src..src + 4]);
            }
        }
    }

    fn clear(&mut self) {
        self.data.fill(0);
    }
}
