//! Fisheye unwrap
//!
//! Angular-to-planar remap of a circular fisheye image into a panoramic
//! strip. For output pixel `(x, y)` of a `w × h` region:
//!
//! ```text
//! theta = (x / w) * angle_range
//! phi   = (y / h - 0.5) * π/2
//! src_x = cx + r * cos(phi) * cos(theta)
//! src_y = cy + r * cos(phi) * sin(theta)
//! ```
//!
//! Sampling is nearest-neighbour (floor); samples outside the source leave
//! the destination black.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use super::layout::Rect;
use crate::capture::frame::BLACK;
use crate::capture::{Calibration, PixelBuffer};

/// Half circle
pub const RANGE_180: f64 = PI;
/// Full circle
pub const RANGE_360: f64 = TAU;

/// Source coordinates seen from direction `(theta, phi)` in radians
pub fn source_point(
    theta: f64,
    phi: f64,
    calibration: &Calibration,
    src_width: u32,
    src_height: u32,
) -> (f64, f64) {
    let cx = calibration.center_x * src_width as f64;
    let cy = calibration.center_y * src_height as f64;
    let r = calibration.radius * src_width.min(src_height) as f64;
    (
        cx + r * phi.cos() * theta.cos(),
        cy + r * phi.cos() * theta.sin(),
    )
}

/// Unwrap `src` into `rect` of `dst` covering `angle_range` radians
pub fn unwrap_into(
    src: &PixelBuffer,
    calibration: &Calibration,
    angle_range: f64,
    dst: &mut PixelBuffer,
    rect: Rect,
) {
    if rect.is_empty() {
        return;
    }
    let (sw, sh) = (src.width(), src.height());
    let x_end = (rect.x + rect.width).min(dst.width());
    let y_end = (rect.y + rect.height).min(dst.height());

    for dy in rect.y..y_end {
        let phi = ((dy - rect.y) as f64 / rect.height as f64 - 0.5) * FRAC_PI_2;
        for dx in rect.x..x_end {
            let theta = (dx - rect.x) as f64 / rect.width as f64 * angle_range;
            let (sx, sy) = source_point(theta, phi, calibration, sw, sh);
            let (sx, sy) = (sx.floor(), sy.floor());
            let color = if sx >= 0.0 && sy >= 0.0 && sx < sw as f64 && sy < sh as f64 {
                src.pixel(sx as u32, sy as u32)
            } else {
                BLACK
            };
            dst.set_pixel(dx, dy, color);
        }
    }
}
