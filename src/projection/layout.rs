//! Planar layouts: scaled blits, side-by-side and grid arrangements.

use crate::capture::PixelBuffer;

/// Axis-aligned region of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole of `buf`
    pub fn full(buf: &PixelBuffer) -> Self {
        Self::new(0, 0, buf.width(), buf.height())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Nearest-neighbour scale of all of `src` into `rect` of `dst`.
/// Parts of `rect` outside `dst` are clipped.
pub fn blit_scaled(src: &PixelBuffer, dst: &mut PixelBuffer, rect: Rect) {
    if src.is_empty() || rect.is_empty() {
        return;
    }
    let x_end = (rect.x + rect.width).min(dst.width());
    let y_end = (rect.y + rect.height).min(dst.height());

    for dy in rect.y..y_end {
        let sy = ((dy - rect.y) as u64 * src.height() as u64 / rect.height as u64) as u32;
        for dx in rect.x..x_end {
            let sx = ((dx - rect.x) as u64 * src.width() as u64 / rect.width as u64) as u32;
            dst.set_pixel(dx, dy, src.pixel(sx, sy));
        }
    }
}

/// `cols = ceil(sqrt(n))`, `rows = ceil(n / cols)`
pub fn grid_dimensions(n: usize) -> (u32, u32) {
    if n == 0 {
        return (0, 0);
    }
    let cols = (n as f64).sqrt().ceil() as usize;
    let rows = n.div_ceil(cols);
    (cols as u32, rows as u32)
}

/// Cell `index` (row-major) of a `cols × rows` grid over `bounds`.
/// Integer division spreads any remainder so cells tile without gaps.
pub fn grid_cell(bounds: Rect, cols: u32, rows: u32, index: usize) -> Rect {
    let col = index as u32 % cols;
    let row = index as u32 / cols;
    let x0 = bounds.x + col * bounds.width / cols;
    let x1 = bounds.x + (col + 1) * bounds.width / cols;
    let y0 = bounds.y + row * bounds.height / rows;
    let y1 = bounds.y + (row + 1) * bounds.height / rows;
    Rect::new(x0, y0, x1 - x0, y1 - y0)
}

/// Left and right halves of `bounds`
pub fn split_horizontal(bounds: Rect) -> (Rect, Rect) {
    let left = bounds.width / 2;
    (
        Rect::new(bounds.x, bounds.y, left, bounds.height),
        Rect::new(bounds.x + left, bounds.y, bounds.width - left, bounds.height),
    )
}

/// Top and bottom halves of `bounds`
pub fn split_vertical(bounds: Rect) -> (Rect, Rect) {
    let top = bounds.height / 2;
    (
        Rect::new(bounds.x, bounds.y, bounds.width, top),
        Rect::new(bounds.x, bounds.y + top, bounds.width, bounds.height - top),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dimensions() {
        assert_eq!(grid_dimensions(1), (1, 1));
        assert_eq!(grid_dimensions(2), (2, 1));
        assert_eq!(grid_dimensions(3), (2, 2));
        assert_eq!(grid_dimensions(5), (3, 2));
        assert_eq!(grid_dimensions(8), (3, 3));
        assert_eq!(grid_dimensions(9), (3, 3));
    }

    #[test]
    fn test_grid_cells_tile_bounds() {
        let bounds = Rect::new(0, 0, 100, 50);
        let (cols, rows) = grid_dimensions(5);
        let cells: Vec<Rect> = (0..(cols * rows) as usize)
            .map(|i| grid_cell(bounds, cols, rows, i))
            .collect();
        let area: u32 = cells.iter().map(|c| c.width * c.height).sum();
        assert_eq!(area, 100 * 50);
        assert_eq!(cells[0], Rect::new(0, 0, 33, 25));
        assert_eq!(cells[4], Rect::new(33, 25, 33, 25));
    }

    #[test]
    fn test_blit_scaled_upscales_nearest() {
        let mut src = PixelBuffer::new(2, 1);
        src.set_pixel(1, 0, [255, 0, 0, 255]);
        let mut dst = PixelBuffer::new(4, 2);
        blit_scaled(&src, &mut dst, Rect::new(0, 0, 4, 2));
        assert_eq!(dst.pixel(1, 1), [0, 0, 0, 255]);
        assert_eq!(dst.pixel(2, 0), [255, 0, 0, 255]);
        assert_eq!(dst.pixel(3, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn test_blit_clips_to_destination() {
        let src = PixelBuffer::filled(4, 4, [9, 9, 9, 255]);
        let mut dst = PixelBuffer::new(3, 3);
        blit_scaled(&src, &mut dst, Rect::new(2, 2, 4, 4));
        assert_eq!(dst.pixel(2, 2), [9, 9, 9, 255]);
        assert_eq!(dst.pixel(1, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn test_splits_cover_odd_sizes() {
        let (l, r) = split_horizontal(Rect::new(0, 0, 5, 2));
        assert_eq!((l.width, r.x, r.width), (2, 2, 3));
        let (t, b) = split_vertical(Rect::new(0, 0, 4, 5));
        assert_eq!((t.height, b.y, b.height), (2, 2, 3));
    }
}
