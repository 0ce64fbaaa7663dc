//! Encode directive composition
//!
//! Turns a validated request into an ordered [`EncodeDirectiveSet`]. Defaults
//! and precedence are applied here and nowhere else:
//!
//! 1. codec from preset (MP4 -> H.264/yuv420p, otherwise VP9)
//! 2. CRF, always present
//! 3. container from codec family only
//! 4. video bitrate only when requested (VP9 runs constant quality otherwise)
//! 5. mute beats audio bitrate
//! 6. framerate only when requested
//! 7. scale only when width or height was requested
//!
//! Composition is pure: the same input always yields the same set.

use crate::geometry::{self, CropGeometry, ResolvedGeometry};
use crate::request::{Crf, GeometryRequest, Preset, Quality, TransformKind, VideoOptions};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoCodec {
    Vp9,
    H264,
}

impl VideoCodec {
    pub fn from_preset(preset: Option<Preset>) -> Self {
        match preset.unwrap_or_default() {
            Preset::Mp4 => VideoCodec::H264,
            Preset::Webm => VideoCodec::Vp9,
        }
    }

    pub fn container(&self) -> Container {
        match self {
            VideoCodec::Vp9 => Container::Webm,
            VideoCodec::H264 => Container::Mp4,
        }
    }
}

/// Output container; decides file extension and mimetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Container {
    Webm,
    Mp4,
    Webp,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Webm => "webm",
            Container::Mp4 => "mp4",
            Container::Webp => "webp",
        }
    }

    pub fn mimetype(&self) -> &'static str {
        match self {
            Container::Webm => "video/webm",
            Container::Mp4 => "video/mp4",
            Container::Webp => "image/webp",
        }
    }

    /// Muxer name passed to ffmpeg `-f`
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Container::Webm => "webm",
            Container::Mp4 => "mp4",
            Container::Webp => "webp",
        }
    }
}

/// Video scale request. Missing sides keep the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScaleSpec {
    Width(u32),
    Height(u32),
    Exact(u32, u32),
}

impl ScaleSpec {
    pub fn from_request(request: &GeometryRequest) -> Option<Self> {
        match (request.width, request.height) {
            (Some(w), None) => Some(ScaleSpec::Width(w)),
            (None, Some(h)) => Some(ScaleSpec::Height(h)),
            (Some(w), Some(h)) => Some(ScaleSpec::Exact(w, h)),
            (None, None) => None,
        }
    }

    /// ffmpeg scale filter; -2 keeps the derived side even for yuv420p
    pub fn filter(&self) -> String {
        match self {
            ScaleSpec::Width(w) => format!("scale={}:-2", w),
            ScaleSpec::Height(h) => format!("scale=-2:{}", h),
            ScaleSpec::Exact(w, h) => format!("scale={}:{}", w, h),
        }
    }
}

impl fmt::Display for ScaleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleSpec::Width(w) => write!(f, "{}x?", w),
            ScaleSpec::Height(h) => write!(f, "?x{}", h),
            ScaleSpec::Exact(w, h) => write!(f, "{}x{}", w, h),
        }
    }
}

/// One encoder instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EncodeDirective {
    VideoCodec(VideoCodec),
    Crf(u8),
    /// Kilobits per second
    VideoBitrate(u32),
    /// Bitrate-less CRF mode (`-b:v 0`), VP9 only
    ConstantQuality,
    /// Kilobits per second
    AudioBitrate(u32),
    NoAudio,
    Framerate(u32),
    Scale(ScaleSpec),
    Crop(CropGeometry),
    Resize(ResolvedGeometry),
    Quality(u8),
    AnimatedSource,
    Container(Container),
}

impl EncodeDirective {
    /// ffmpeg command-line form of this directive
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let args: Vec<String> = match self {
            EncodeDirective::VideoCodec(VideoCodec::Vp9) => vec!["-c:v".into(), "libvpx-vp9".into()],
            EncodeDirective::VideoCodec(VideoCodec::H264) => vec![
                "-c:v".into(),
                "libx264".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
            ],
            EncodeDirective::Crf(crf) => vec!["-crf".into(), crf.to_string()],
            EncodeDirective::VideoBitrate(kbps) => vec!["-b:v".into(), format!("{}k", kbps)],
            EncodeDirective::ConstantQuality => vec!["-b:v".into(), "0".into()],
            EncodeDirective::AudioBitrate(kbps) => vec!["-b:a".into(), format!("{}k", kbps)],
            EncodeDirective::NoAudio => vec!["-an".into()],
            EncodeDirective::Framerate(fps) => vec!["-r".into(), fps.to_string()],
            EncodeDirective::Scale(scale) => vec!["-vf".into(), scale.filter()],
            EncodeDirective::Crop(crop) => vec!["-vf".into(), crop_filter(crop)],
            EncodeDirective::Resize(g) => vec!["-vf".into(), format!("scale={}:{}", g.width, g.height)],
            EncodeDirective::Quality(q) => vec!["-quality".into(), q.to_string()],
            EncodeDirective::AnimatedSource => vec!["-loop".into(), "0".into()],
            EncodeDirective::Container(c) => vec!["-f".into(), c.ffmpeg_format().into()],
        };
        args
    }
}

impl fmt::Display for EncodeDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeDirective::VideoCodec(VideoCodec::Vp9) => write!(f, "codec=libvpx-vp9"),
            EncodeDirective::VideoCodec(VideoCodec::H264) => write!(f, "codec=libx264/yuv420p"),
            EncodeDirective::Crf(crf) => write!(f, "crf={}", crf),
            EncodeDirective::VideoBitrate(kbps) => write!(f, "video_bitrate={}k", kbps),
            EncodeDirective::ConstantQuality => write!(f, "video_bitrate=0"),
            EncodeDirective::AudioBitrate(kbps) => write!(f, "audio_bitrate={}k", kbps),
            EncodeDirective::NoAudio => write!(f, "no_audio"),
            EncodeDirective::Framerate(fps) => write!(f, "framerate={}", fps),
            EncodeDirective::Scale(scale) => write!(f, "size={}", scale),
            EncodeDirective::Crop(crop) => write!(f, "{}", crop_filter(crop)),
            EncodeDirective::Resize(g) => write!(f, "resize={}x{}", g.width, g.height),
            EncodeDirective::Quality(q) => write!(f, "quality={}", q),
            EncodeDirective::AnimatedSource => write!(f, "animated"),
            EncodeDirective::Container(c) => write!(f, "container=.{}", c.extension()),
        }
    }
}

fn crop_filter(crop: &CropGeometry) -> String {
    format!("crop={}:{}:{}:{}", crop.width, crop.height, crop.x, crop.y)
}

/// Ordered directives for one transcode. Always carries a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeDirectiveSet {
    directives: Vec<EncodeDirective>,
    container: Container,
}

impl EncodeDirectiveSet {
    fn new(mut directives: Vec<EncodeDirective>, container: Container) -> Self {
        directives.push(EncodeDirective::Container(container));
        Self { directives, container }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncodeDirective> {
        self.directives.iter()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn contains(&self, directive: &EncodeDirective) -> bool {
        self.directives.contains(directive)
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }

    pub fn mimetype(&self) -> &'static str {
        self.container.mimetype()
    }

    pub fn has_audio_bitrate(&self) -> bool {
        self.directives
            .iter()
            .any(|d| matches!(d, EncodeDirective::AudioBitrate(_)))
    }

    pub fn resize(&self) -> Option<ResolvedGeometry> {
        self.directives.iter().find_map(|d| match d {
            EncodeDirective::Resize(g) => Some(*g),
            _ => None,
        })
    }

    pub fn quality(&self) -> Option<u8> {
        self.directives.iter().find_map(|d| match d {
            EncodeDirective::Quality(q) => Some(*q),
            _ => None,
        })
    }

    pub fn is_animated(&self) -> bool {
        self.contains(&EncodeDirective::AnimatedSource)
    }

    /// Flattened ffmpeg output options, in composition order
    pub fn ffmpeg_args(&self) -> Vec<String> {
        self.directives.iter().flat_map(|d| d.ffmpeg_args()).collect()
    }
}

impl fmt::Display for EncodeDirectiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.directives.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// What to compose for. Image kinds carry an already resolved geometry;
/// video kinds carry the raw request since the transcoder sizes the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeInput {
    ImageResize {
        geometry: ResolvedGeometry,
        quality: Option<Quality>,
    },
    AnimatedResize {
        geometry: ResolvedGeometry,
        quality: Option<Quality>,
    },
    VideoCompress {
        geometry: GeometryRequest,
        options: VideoOptions,
    },
    VideoCrop {
        geometry: GeometryRequest,
    },
}

impl ComposeInput {
    pub fn kind(&self) -> TransformKind {
        match self {
            ComposeInput::ImageResize { .. } => TransformKind::ImageResize,
            ComposeInput::AnimatedResize { .. } => TransformKind::AnimatedResize,
            ComposeInput::VideoCompress { .. } => TransformKind::VideoCompress,
            ComposeInput::VideoCrop { .. } => TransformKind::VideoCrop,
        }
    }
}

/// Stateless apart from configured defaults
#[derive(Debug, Clone, Copy)]
pub struct DirectiveComposer {
    default_crf: Crf,
    default_quality: Quality,
}

impl DirectiveComposer {
    pub fn new(default_crf: Crf, default_quality: Quality) -> Self {
        Self {
            default_crf,
            default_quality,
        }
    }

    pub fn compose(&self, input: &ComposeInput) -> EncodeDirectiveSet {
        match input {
            ComposeInput::ImageResize { geometry, quality } => self.image(*geometry, *quality, false),
            ComposeInput::AnimatedResize { geometry, quality } => self.image(*geometry, *quality, true),
            ComposeInput::VideoCompress { geometry, options } => self.video(geometry, options),
            ComposeInput::VideoCrop { geometry } => self.crop(geometry),
        }
    }

    fn image(&self, geometry: ResolvedGeometry, quality: Option<Quality>, animated: bool) -> EncodeDirectiveSet {
        let mut directives = Vec::with_capacity(4);
        if animated {
            directives.push(EncodeDirective::AnimatedSource);
        }
        directives.push(EncodeDirective::Resize(geometry));
        directives.push(EncodeDirective::Quality(
            quality.unwrap_or(self.default_quality).value(),
        ));
        EncodeDirectiveSet::new(directives, Container::Webp)
    }

    fn video(&self, geometry: &GeometryRequest, options: &VideoOptions) -> EncodeDirectiveSet {
        let codec = VideoCodec::from_preset(options.preset);
        let crf = options.crf.unwrap_or(self.default_crf);

        let mut directives = vec![EncodeDirective::VideoCodec(codec), EncodeDirective::Crf(crf.value())];

        match options.video_bitrate {
            Some(kbps) => directives.push(EncodeDirective::VideoBitrate(kbps)),
            None if codec == VideoCodec::Vp9 => directives.push(EncodeDirective::ConstantQuality),
            None => {}
        }

        if options.mute {
            directives.push(EncodeDirective::NoAudio);
        } else if let Some(kbps) = options.audio_bitrate {
            directives.push(EncodeDirective::AudioBitrate(kbps));
        }

        if let Some(fps) = options.framerate {
            directives.push(EncodeDirective::Framerate(fps));
        }

        if let Some(scale) = ScaleSpec::from_request(geometry) {
            directives.push(EncodeDirective::Scale(scale));
        }

        EncodeDirectiveSet::new(directives, codec.container())
    }

    fn crop(&self, geometry: &GeometryRequest) -> EncodeDirectiveSet {
        let codec = VideoCodec::H264;
        let directives = vec![
            EncodeDirective::VideoCodec(codec),
            EncodeDirective::Crf(self.default_crf.value()),
            EncodeDirective::Crop(geometry::resolve_crop(geometry)),
        ];
        EncodeDirectiveSet::new(directives, codec.container())
    }
}

impl Default for DirectiveComposer {
    fn default() -> Self {
        Self::new(Crf::default(), Quality::default())
    }
}
