//! Built-in YUV4MPEG2 encoder
//!
//! Uncompressed 4:4:4 output that any FFmpeg build can read back. Used when
//! FFmpeg is missing or has no usable container.

use super::types::EncoderProfile;
use super::FrameEncoder;
use crate::capture::PixelBuffer;
use crate::utils::error::EncoderError;

/// RGBA → BT.601 studio-range YCbCr
#[inline]
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let cb = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let cr = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        cb.clamp(0, 255) as u8,
        cr.clamp(0, 255) as u8,
    )
}

pub struct Y4mEncoder {
    profile: EncoderProfile,
    width: u32,
    height: u32,
    pending: Vec<u8>,
    frame_count: u64,
    finished: bool,
}

impl Y4mEncoder {
    pub fn new(profile: EncoderProfile, width: u32, height: u32, fps: u32) -> Self {
        let header = format!("YUV4MPEG2 W{width} H{height} F{fps}:1 Ip A1:1 C444\n");
        tracing::info!(
            "Starting built-in Y4M encoder: {}x{} @ {}fps",
            width,
            height,
            fps
        );
        Self {
            profile,
            width,
            height,
            pending: header.into_bytes(),
            frame_count: 0,
            finished: false,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl FrameEncoder for Y4mEncoder {
    fn profile(&self) -> &EncoderProfile {
        &self.profile
    }

    fn write_frame(&mut self, frame: &PixelBuffer) -> Result<(), EncoderError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(EncoderError::FrameSize {
                got: frame.width() as usize * frame.height() as usize * 4,
                expected: self.width as usize * self.height as usize * 4,
            });
        }

        let plane = self.width as usize * self.height as usize;
        let mut y_plane = Vec::with_capacity(plane);
        let mut cb_plane = Vec::with_capacity(plane);
        let mut cr_plane = Vec::with_capacity(plane);
        for row in 0..self.height {
            for px in frame.row(row).chunks_exact(4) {
                let (y, cb, cr) = rgb_to_ycbcr(px[0], px[1], px[2]);
                y_plane.push(y);
                cb_plane.push(cb);
                cr_plane.push(cr);
            }
        }

        self.pending.extend_from_slice(b"FRAME\n");
        self.pending.extend_from_slice(&y_plane);
        self.pending.extend_from_slice(&cb_plane);
        self.pending.extend_from_slice(&cr_plane);
        self.frame_count += 1;
        Ok(())
    }

    fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    fn finish(&mut self) -> Result<Vec<u8>, EncoderError> {
        if !self.finished {
            self.finished = true;
            tracing::info!("Y4M encoder finished: {} frames", self.frame_count);
        }
        Ok(self.drain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::types::{Container, RecordingFormat};

    fn profile() -> EncoderProfile {
        EncoderProfile {
            requested: RecordingFormat::Mp4,
            container: Container::Y4m,
            bitrate: 5_000_000,
            fell_back: true,
        }
    }

    #[test]
    fn test_header_then_frames() {
        let mut enc = Y4mEncoder::new(profile(), 4, 2, 10);
        let header = enc.drain();
        assert_eq!(header, b"YUV4MPEG2 W4 H2 F10:1 Ip A1:1 C444\n");

        enc.write_frame(&PixelBuffer::filled(4, 2, [255, 255, 255, 255]))
            .unwrap();
        let body = enc.finish().unwrap();
        assert_eq!(body.len(), 6 + 4 * 2 * 3);
        assert!(body.starts_with(b"FRAME\n"));
        // white -> Y 235, Cb/Cr 128
        assert_eq!(body[6], 235);
        assert_eq!(body[6 + 8], 128);
        assert_eq!(enc.frame_count(), 1);
    }

    #[test]
    fn test_wrong_frame_size_is_rejected() {
        let mut enc = Y4mEncoder::new(profile(), 4, 2, 10);
        let err = enc.write_frame(&PixelBuffer::new(2, 2)).unwrap_err();
        assert!(matches!(err, EncoderError::FrameSize { .. }));
    }

    #[test]
    fn test_black_is_studio_black() {
        assert_eq!(rgb_to_ycbcr(0, 0, 0), (16, 128, 128));
    }
}
