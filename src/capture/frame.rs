//! Frame types
//!
//! Owned pixel buffers and the per-tick captured frame record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use super::traits::{Calibration, SourcePosition};

/// Layout of the bytes in a [`PixelBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Opaque black
pub const BLACK: [u8; 4] = [0, 0, 0, 255];

/// An owned image buffer.
///
/// Rows may be padded (`stride >= width * 4`); everything written by this
/// crate is tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate an opaque black buffer
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, BLACK)
    }

    /// Allocate a buffer filled with one colour
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            stride: width as usize * 4,
            format: PixelFormat::Rgba8,
            data,
        }
    }

    /// Wrap tightly packed RGBA bytes. Returns `None` on a size mismatch.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        Self::from_rgba_with_stride(width, height, width as usize * 4, data)
    }

    /// Wrap RGBA bytes whose rows are `stride` bytes apart
    pub fn from_rgba_with_stride(
        width: u32,
        height: u32,
        stride: usize,
        data: Vec<u8>,
    ) -> Option<Self> {
        if stride < width as usize * 4 || data.len() < stride * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            stride,
            format: PixelFormat::Rgba8,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride + x as usize * 4
    }

    /// Read one pixel. Panics when out of bounds, like slice indexing.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&color);
    }

    /// Tightly packed bytes of one row
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * 4]
    }

    /// Tightly packed RGBA bytes, copying only when rows are padded
    pub fn to_packed(&self) -> Vec<u8> {
        if self.stride == self.width as usize * 4 {
            return self.data[..self.stride * self.height as usize].to_vec();
        }
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    /// Save as an RGBA PNG
    pub fn write_png(&self, path: &Path) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().map_err(std::io::Error::other)?;
        writer
            .write_image_data(&self.to_packed())
            .map_err(std::io::Error::other)?;
        Ok(())
    }
}

/// One frame from one source for one capture tick.
///
/// Position and calibration are copied at capture time so projection never
/// races a moving rotating camera.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub source_id: String,
    pub pixels: PixelBuffer,
    pub captured_at: DateTime<Utc>,
    pub position: SourcePosition,
    pub calibration: Calibration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_opaque_black() {
        let buf = PixelBuffer::new(3, 2);
        assert_eq!(buf.stride(), 12);
        assert_eq!(buf.pixel(2, 1), BLACK);
    }

    #[test]
    fn test_from_rgba_rejects_short_data() {
        assert!(PixelBuffer::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(PixelBuffer::from_rgba(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn test_padded_rows_pack_tightly() {
        // 1x2 image with 8-byte stride
        let data = vec![1, 2, 3, 4, 9, 9, 9, 9, 5, 6, 7, 8, 9, 9, 9, 9];
        let buf = PixelBuffer::from_rgba_with_stride(1, 2, 8, data).unwrap();
        assert_eq!(buf.pixel(0, 1), [5, 6, 7, 8]);
        assert_eq!(buf.to_packed(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_write_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        PixelBuffer::filled(4, 4, [255, 0, 0, 255])
            .write_png(&path)
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
