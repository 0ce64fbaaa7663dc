//! Validated transformation requests
//!
//! Everything in here is already range-checked. The service layer parses raw
//! call input once and builds these values; the core never sees strings or
//! unchecked numbers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which transformation to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformKind {
    ImageResize,
    AnimatedResize,
    VideoCompress,
    VideoCrop,
}

impl TransformKind {
    pub fn is_video(&self) -> bool {
        matches!(self, TransformKind::VideoCompress | TransformKind::VideoCrop)
    }

    /// Service operation name for this kind
    pub fn op(&self) -> &'static str {
        match self {
            TransformKind::ImageResize => "image.transform",
            TransformKind::AnimatedResize => "image.compress_animated",
            TransformKind::VideoCompress => "video.compress",
            TransformKind::VideoCrop => "video.crop",
        }
    }
}

/// Encoding quality for image output (0-100, default 100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(u8);

impl Quality {
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

/// Constant Rate Factor (0-51, lower is better quality)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crf(u8);

impl Crf {
    pub const MAX: u8 = 51;
    pub const DEFAULT: Crf = Crf(23);

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Crf {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Video output preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Preset {
    #[default]
    Webm,
    Mp4,
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WEBM" => Ok(Preset::Webm),
            "MP4" => Ok(Preset::Mp4),
            other => Err(format!("Unknown preset: {} (expected WEBM or MP4)", other)),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Webm => write!(f, "WEBM"),
            Preset::Mp4 => write!(f, "MP4"),
        }
    }
}

/// Requested output geometry. `None` means "derive from source" for width and
/// height, and 0 for crop offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GeometryRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x: Option<u32>,
    pub y: Option<u32>,
}

impl GeometryRequest {
    pub fn size(width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn is_unset(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// Options for the video compress path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoOptions {
    /// `None` falls back to WEBM
    pub preset: Option<Preset>,
    pub crf: Option<Crf>,
    /// Kilobits per second
    pub audio_bitrate: Option<u32>,
    /// Kilobits per second
    pub video_bitrate: Option<u32>,
    pub framerate: Option<u32>,
    pub mute: bool,
}

/// One transformation job
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub kind: TransformKind,
    pub source_bytes: Vec<u8>,
    pub original_file_name: String,
    pub geometry: Option<GeometryRequest>,
    pub quality: Option<Quality>,
    pub video_options: Option<VideoOptions>,
}

impl TransformRequest {
    pub fn new(kind: TransformKind, source_bytes: Vec<u8>, original_file_name: impl Into<String>) -> Self {
        Self {
            kind,
            source_bytes,
            original_file_name: original_file_name.into(),
            geometry: None,
            quality: None,
            video_options: None,
        }
    }

    pub fn with_geometry(mut self, geometry: GeometryRequest) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_video_options(mut self, options: VideoOptions) -> Self {
        self.video_options = Some(options);
        self
    }

    /// Requested geometry, or an all-absent request
    pub fn geometry_or_default(&self) -> GeometryRequest {
        self.geometry.unwrap_or_default()
    }
}
