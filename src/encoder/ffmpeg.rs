//! FFmpeg encoder
//!
//! Pipes raw RGBA frames into an `ffmpeg` child process and collects the
//! encoded, streamable output from its stdout on a reader thread.

use parking_lot::Mutex;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::types::{Container, EncoderProfile};
use super::FrameEncoder;
use crate::capture::{AudioInput, PixelBuffer};
use crate::utils::error::EncoderError;

/// Build the FFmpeg argument list for a profile.
///
/// Output goes to stdout in a streamable layout (fragmented MP4 for the
/// mp4 container) so bytes can be chunked while recording.
pub fn build_args(
    profile: &EncoderProfile,
    width: u32,
    height: u32,
    fps: u32,
    audio: Option<&AudioInput>,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{width}x{height}"),
        "-r".into(),
        fps.to_string(),
        "-i".into(),
        "-".into(), // stdin for video frames (input 0)
    ];

    let audio_codec = profile.container.audio_codec();
    let audio = audio.filter(|_| audio_codec.is_some());
    if let Some(input) = audio {
        args.extend(["-f".into(), input.format.clone(), "-i".into(), input.device.clone()]);
    }

    args.extend([
        "-c:v".into(),
        profile.container.video_codec().into(),
        "-b:v".into(),
        profile.bitrate.to_string(),
    ]);

    match profile.container {
        Container::Mp4 | Container::Matroska => {
            args.extend([
                "-preset".into(),
                "veryfast".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-g".into(),
                (fps * 2).to_string(), // GOP size = 2 seconds
            ]);
        }
        Container::Webm => {
            args.extend([
                "-deadline".into(),
                "realtime".into(),
                "-cpu-used".into(),
                "8".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
            ]);
        }
        Container::Avi => {
            args.extend(["-pix_fmt".into(), "yuvj420p".into()]);
        }
        Container::Y4m => {}
    }

    if let (Some(_), Some(codec)) = (audio, audio_codec) {
        args.extend([
            "-map".into(),
            "0:v".into(),
            "-map".into(),
            "1:a".into(),
            "-c:a".into(),
            codec.into(),
            "-shortest".into(),
        ]);
    }

    if profile.container == Container::Mp4 {
        args.extend([
            "-movflags".into(),
            "frag_keyframe+empty_moov+default_base_moof".into(),
        ]);
    }

    args.extend(["-f".into(), profile.container.muxer().into(), "pipe:1".into()]);
    args
}

/// Video encoder using an FFmpeg child process
pub struct FfmpegEncoder {
    profile: EncoderProfile,
    frame_size: usize,
    process: Child,
    stdin: Option<ChildStdin>,
    output: Arc<Mutex<Vec<u8>>>,
    stdout_thread: Option<JoinHandle<()>>,
    stderr_thread: Option<JoinHandle<String>>,
    frame_count: u64,
}

impl FfmpegEncoder {
    pub fn spawn(
        profile: EncoderProfile,
        width: u32,
        height: u32,
        fps: u32,
        audio: Option<&AudioInput>,
    ) -> Result<Self, EncoderError> {
        let args = build_args(&profile, width, height, fps, audio);
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;
        let mut stdout = process
            .stdout
            .take()
            .ok_or_else(|| EncoderError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;
        let mut stderr = process
            .stderr
            .take()
            .ok_or_else(|| EncoderError::Ffmpeg("Failed to capture FFmpeg stderr".to_string()))?;

        let output = Arc::new(Mutex::new(Vec::new()));
        let sink = output.clone();
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = [0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
                    Err(e) => {
                        tracing::warn!("Failed to read FFmpeg output: {}", e);
                        break;
                    }
                }
            }
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        Ok(Self {
            profile,
            frame_size: width as usize * height as usize * 4,
            process,
            stdin: Some(stdin),
            output,
            stdout_thread: Some(stdout_thread),
            stderr_thread: Some(stderr_thread),
            frame_count: 0,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn profile(&self) -> &EncoderProfile {
        &self.profile
    }

    fn write_frame(&mut self, frame: &PixelBuffer) -> Result<(), EncoderError> {
        let data = frame.to_packed();
        if data.len() != self.frame_size {
            return Err(EncoderError::FrameSize {
                got: data.len(),
                expected: self.frame_size,
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncoderError::Ffmpeg("encoder already finished".to_string()))?;
        stdin
            .write_all(&data)
            .map_err(|e| EncoderError::Ffmpeg(format!("Failed to write frame: {}", e)))?;
        self.frame_count += 1;
        Ok(())
    }

    fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock())
    }

    fn finish(&mut self) -> Result<Vec<u8>, EncoderError> {
        let Some(stdin) = self.stdin.take() else {
            return Ok(self.drain());
        };
        // Close stdin to signal EOF to FFmpeg
        drop(stdin);

        let status = self
            .process
            .wait()
            .map_err(|e| EncoderError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;
        if let Some(handle) = self.stdout_thread.take() {
            let _ = handle.join();
        }
        let stderr = self
            .stderr_thread
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(EncoderError::Ffmpeg(format!(
                "FFmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        tracing::info!("FFmpeg encoder finished: {} frames written", self.frame_count);
        Ok(self.drain())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.process.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::types::{RecordingFormat, RecordingQuality};

    fn profile(container: Container) -> EncoderProfile {
        EncoderProfile {
            requested: RecordingFormat::Mp4,
            container,
            bitrate: RecordingQuality::Medium.bitrate(),
            fell_back: false,
        }
    }

    #[test]
    fn test_mp4_args_are_fragmented_to_stdout() {
        let args = build_args(&profile(Container::Mp4), 1280, 640, 30, None);
        let joined = args.join(" ");
        assert!(joined.contains("-s 1280x640"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 5000000"));
        assert!(joined.contains("frag_keyframe+empty_moov"));
        assert!(joined.ends_with("-f mp4 pipe:1"));
        assert!(!joined.contains("-c:a"));
    }

    #[test]
    fn test_audio_input_is_mapped() {
        let audio = AudioInput {
            format: "lavfi".to_string(),
            device: "anullsrc".to_string(),
        };
        let args = build_args(&profile(Container::Webm), 640, 320, 30, Some(&audio));
        let joined = args.join(" ");
        assert!(joined.contains("-f lavfi -i anullsrc"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-shortest"));
        assert!(joined.ends_with("-f webm pipe:1"));
    }

    #[test]
    fn test_avi_uses_mjpeg() {
        let args = build_args(&profile(Container::Avi), 640, 320, 30, None);
        let joined = args.join(" ");
        assert!(joined.contains("-c:v mjpeg"));
        assert!(joined.contains("-pix_fmt yuvj420p"));
        assert!(!joined.contains("movflags"));
    }
}
