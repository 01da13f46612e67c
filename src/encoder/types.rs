//! Encoder types and profile selection
//!
//! Pure lookups from the requested `(format, quality)` to a concrete
//! encoder profile, including the container fallback chain.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::process::Command;

use crate::utils::error::EncoderError;

/// Requested output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    Mp4,
    Avi,
    Mkv,
    Webm,
}

impl RecordingFormat {
    /// Container this format is written in
    pub fn container(&self) -> Container {
        match self {
            RecordingFormat::Mp4 => Container::Mp4,
            RecordingFormat::Avi => Container::Avi,
            RecordingFormat::Mkv => Container::Matroska,
            RecordingFormat::Webm => Container::Webm,
        }
    }
}

/// Quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingQuality {
    Low,
    Medium,
    High,
    Ultra,
}

impl RecordingQuality {
    /// Target video bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        match self {
            RecordingQuality::Low => 2_500_000,
            RecordingQuality::Medium => 5_000_000,
            RecordingQuality::High => 10_000_000,
            RecordingQuality::Ultra => 20_000_000,
        }
    }
}

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Avi,
    Matroska,
    Webm,
    /// Built-in uncompressed YUV4MPEG2, always available
    Y4m,
}

impl Container {
    /// FFmpeg muxer name
    pub fn muxer(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Avi => "avi",
            Container::Matroska => "matroska",
            Container::Webm => "webm",
            Container::Y4m => "yuv4mpegpipe",
        }
    }

    /// File extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Avi => "avi",
            Container::Matroska => "mkv",
            Container::Webm => "webm",
            Container::Y4m => "y4m",
        }
    }

    /// FFmpeg video codec
    pub fn video_codec(&self) -> &'static str {
        match self {
            Container::Mp4 | Container::Matroska => "libx264",
            Container::Avi => "mjpeg",
            Container::Webm => "libvpx-vp9",
            Container::Y4m => "rawvideo",
        }
    }

    /// FFmpeg audio codec, `None` when the container carries no audio
    pub fn audio_codec(&self) -> Option<&'static str> {
        match self {
            Container::Mp4 | Container::Matroska => Some("aac"),
            Container::Avi => Some("libmp3lame"),
            Container::Webm => Some("libopus"),
            Container::Y4m => None,
        }
    }
}

/// Which encoder implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    /// FFmpeg when available, built-in otherwise
    #[default]
    Auto,
    /// FFmpeg only; fail if it cannot serve the request
    Ffmpeg,
    /// Built-in Y4M encoder only
    Builtin,
}

/// Containers usable on this machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformSupport {
    pub ffmpeg_available: bool,
    pub containers: BTreeSet<Container>,
}

impl PlatformSupport {
    /// Only the built-in encoder
    pub fn builtin_only() -> Self {
        Self::default()
    }

    /// FFmpeg with the given containers
    pub fn with_ffmpeg(containers: impl IntoIterator<Item = Container>) -> Self {
        Self {
            ffmpeg_available: true,
            containers: containers.into_iter().collect(),
        }
    }

    /// Ask the installed FFmpeg which muxers it has
    pub fn probe() -> Self {
        let output = match Command::new("ffmpeg").args(["-hide_banner", "-muxers"]).output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::warn!("ffmpeg -muxers exited with {}", output.status);
                return Self::builtin_only();
            }
            Err(e) => {
                tracing::info!("FFmpeg not found ({}), using built-in encoder only", e);
                return Self::builtin_only();
            }
        };

        let support = Self::with_ffmpeg(parse_muxers(&String::from_utf8_lossy(&output.stdout)));
        tracing::info!("FFmpeg muxers available: {:?}", support.containers);
        support
    }

    pub fn supports(&self, container: Container) -> bool {
        container == Container::Y4m || (self.ffmpeg_available && self.containers.contains(&container))
    }
}

/// Extract the containers we care about from `ffmpeg -muxers` output.
///
/// Lines look like ` E  mp4             MP4 (MPEG-4 Part 14)`; the name column may
/// list aliases separated by commas.
pub fn parse_muxers(listing: &str) -> BTreeSet<Container> {
    let wanted = [
        Container::Mp4,
        Container::Avi,
        Container::Matroska,
        Container::Webm,
    ];
    let mut found = BTreeSet::new();
    for line in listing.lines() {
        let mut cols = line.split_whitespace();
        let (Some(flags), Some(names)) = (cols.next(), cols.next()) else {
            continue;
        };
        if !flags.contains('E') {
            continue;
        }
        for name in names.split(',') {
            if let Some(c) = wanted.iter().find(|c| c.muxer() == name) {
                found.insert(*c);
            }
        }
    }
    found
}

/// Everything the encoder needs to know about the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderProfile {
    pub requested: RecordingFormat,
    pub container: Container,
    pub bitrate: u64,
    /// True when `container` is not the requested one
    pub fell_back: bool,
}

impl EncoderProfile {
    pub fn uses_ffmpeg(&self) -> bool {
        self.container != Container::Y4m
    }
}

/// Select a profile.
///
/// Fallback chain: requested container → webm → built-in y4m. In `Auto` this
/// never fails; forcing `Ffmpeg` fails when neither FFmpeg container is
/// usable, and `Builtin` always picks y4m.
pub fn resolve_profile(
    format: RecordingFormat,
    quality: RecordingQuality,
    backend: EncoderBackend,
    platform: &PlatformSupport,
) -> Result<EncoderProfile, EncoderError> {
    let requested = format.container();
    let profile = |container: Container| EncoderProfile {
        requested: format,
        container,
        bitrate: quality.bitrate(),
        fell_back: container != requested,
    };

    if backend == EncoderBackend::Builtin {
        return Ok(profile(Container::Y4m));
    }

    for candidate in [requested, Container::Webm] {
        if platform.ffmpeg_available && platform.supports(candidate) {
            if candidate != requested {
                tracing::warn!(
                    "Container {:?} unsupported on this platform, falling back to {:?}",
                    requested,
                    candidate
                );
            }
            return Ok(profile(candidate));
        }
    }

    match backend {
        EncoderBackend::Ffmpeg => Err(EncoderError::Unsupported(format!(
            "{} (ffmpeg available: {})",
            requested.muxer(),
            platform.ffmpeg_available
        ))),
        _ => {
            tracing::warn!(
                "No FFmpeg container for {:?}, falling back to built-in y4m",
                requested
            );
            Ok(profile(Container::Y4m))
        }
    }
}
