//! Value-owned pixel storage for surface contents.
//!
//! Pixels are 32-bit xRGB words: the low 24 bits carry the color, the top
//! byte is only meaningful in diff output, where 0x00 alpha marks an
//! unchanged pixel and 0xff an updated one.

use crate::model::Rect;

const COLOR_MASK: u32 = 0x00ff_ffff;
const OPAQUE: u32 = 0xff00_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: i32,
    height: i32,
    words: Vec<u32>,
}

impl PixelBuffer {
    /// A zeroed (black, transparent) buffer. Non-positive dimensions clamp
    /// to zero.
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        Self {
            width,
            height,
            words: vec![0; (width as usize) * (height as usize)],
        }
    }

    pub fn from_words(width: i32, height: i32, words: Vec<u32>) -> Self {
        let mut buffer = Self::new(width, height);
        let len = buffer.words.len().min(words.len());
        buffer.words[..len].copy_from_slice(&words[..len]);
        buffer
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Row stride in bytes. Rows are tightly packed.
    pub fn stride(&self) -> i32 {
        self.width * 4
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// The raw pixel bytes, as handed to the output channel.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    fn index(&self, x: i32, y: i32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    pub fn fill_rect(&mut self, rect: Rect, color: u32) {
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = rect.x.saturating_add(rect.width).min(self.width);
        let y1 = rect.y.saturating_add(rect.height).min(self.height);
        if x0 >= x1 {
            return;
        }
        for y in y0..y1 {
            let start = self.index(x0, y);
            self.words[start..start + (x1 - x0) as usize].fill(color);
        }
    }

    /// Turns `previous` into the delta against `self`: pixels whose colors
    /// match become fully transparent, changed pixels take the new color
    /// with an opaque alpha. Only the low 24 bits participate in the
    /// comparison.
    pub fn diff_into(&self, previous: &mut PixelBuffer) {
        let w = self.width.min(previous.width);
        let h = self.height.min(previous.height);
        for y in 0..h {
            for x in 0..w {
                let new = self.words[self.index(x, y)];
                let old = &mut previous.words[(y as usize) * (previous.width as usize) + x as usize];
                if new & COLOR_MASK == *old & COLOR_MASK {
                    *old = 0;
                } else {
                    *old = new | OPAQUE;
                }
            }
        }
    }

    /// Copies `src` over this buffer at the origin, clipped to both sizes.
    /// Used when resizing the cached surface and when refreshing it after a
    /// transmitted update.
    pub fn composite_from(&mut self, src: &PixelBuffer) {
        let w = (self.width.min(src.width)) as usize;
        let h = self.height.min(src.height);
        for y in 0..h {
            let dst_start = self.index(0, y);
            let src_start = src.index(0, y);
            self.words[dst_start..dst_start + w]
                .copy_from_slice(&src.words[src_start..src_start + w]);
        }
    }

    /// Shifts already-present content by (dx, dy) inside the destination
    /// rectangles: every pixel in `rects` is replaced with the pixel that
    /// used to live at (x - dx, y - dy). Reads come from a snapshot, so
    /// overlapping source and destination regions are safe.
    pub fn copy_rects(&mut self, rects: &[Rect], dx: i32, dy: i32) {
        let snapshot = self.words.clone();
        for rect in rects {
            let x0 = rect.x.max(0);
            let y0 = rect.y.max(0);
            let x1 = rect.x.saturating_add(rect.width).min(self.width);
            let y1 = rect.y.saturating_add(rect.height).min(self.height);
            for y in y0..y1 {
                for x in x0..x1 {
                    let sx = x - dx;
                    let sy = y - dy;
                    if self.contains(sx, sy) {
                        let dst = self.index(x, y);
                        self.words[dst] = snapshot[self.index(sx, sy)];
                    }
                }
            }
        }
    }
}
