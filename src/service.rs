//! Call/Reply interface for the compressor
//!
//! Every operation is addressed by an `op` string and takes a JSON object.
//! Raw input is validated against the operation's input schema and parsed
//! into a [`TransformRequest`] here, so the orchestrator only ever sees
//! range-checked values.
//!
//! ## Available Operations
//!
//! 1. `image.transform` - Resize a still image and re-encode as WebP
//! 2. `image.compress_animated` - Re-encode a GIF or animated WebP as animated WebP
//! 3. `video.compress` - Re-encode a video to WebM or MP4
//! 4. `video.crop` - Crop a video region to MP4
//! 5. `media.capabilities` - Service card query
//! 6. `metrics` - Request counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use web_compressor::config::CompressorConfig;
//! use web_compressor::service::{Call, CompressorService, MediaCompressor};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = MediaCompressor::from_config(&CompressorConfig::default())?;
//!
//! let reply = service.handle(Call {
//!     op: "video.compress".to_string(),
//!     input: json!({"source_path": "/tmp/upload-1", "file_name": "clip.mov", "preset": "MP4"}),
//!     context: HashMap::new(),
//! }).await?;
//! println!("{}", reply.output["downloadUrl"]);
//! # Ok(())
//! # }
//! ```

use crate::config::{CompressorConfig, ConfigError};
use crate::error::TransformError;
use crate::metrics::{Metrics, Timer};
use crate::orchestrator::{Artifact, Orchestrator};
use crate::request::{Crf, GeometryRequest, Preset, Quality, TransformKind, TransformRequest, VideoOptions};
use crate::validation::{validate_input, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const TRANSFORM_OPS: [TransformKind; 4] = [
    TransformKind::ImageResize,
    TransformKind::AnimatedResize,
    TransformKind::VideoCompress,
    TransformKind::VideoCrop,
];

/// One invocation of a service operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub op: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Result of a [`Call`]. Failures of the operation itself come back with
/// `ok: false` and an `error` code in `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
}

#[async_trait]
pub trait CompressorService: Send + Sync {
    async fn handle(&self, call: Call) -> Result<Reply, ServiceError>;
    fn describe(&self) -> ServiceCard;
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        ServiceError::InvalidInput(e.0)
    }
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::UnsupportedOperation(_) => "UnsupportedOperation",
            ServiceError::InvalidInput(_) => "InvalidInput",
            ServiceError::Transform(e) => e.code(),
            ServiceError::Serialization(_) => "SerializationError",
        }
    }
}

/// Service capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,
    pub functions: Vec<FunctionCard>,
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Value,
}

/// Reply body for video operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoReply {
    pub message: String,
    pub download_url: String,
}

pub struct MediaCompressor {
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<Metrics>,
}

impl MediaCompressor {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            metrics: Metrics::new(),
        }
    }

    pub fn from_config(config: &CompressorConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(Arc::new(Orchestrator::from_config(config)?)))
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    async fn handle_transform(&self, kind: TransformKind, input: Value) -> Result<Value, ServiceError> {
        let schema = function_card(kind)
            .input_schema
            .unwrap_or_else(|| json!({}));
        validate_input(&input, &schema)?;

        let source_path = str_field(&input, "source_path")?;
        let bytes = tokio::fs::read(source_path)
            .await
            .map_err(|e| ServiceError::InvalidInput(format!("Cannot read source_path {}: {}", source_path, e)))?;

        let request = parse_request(kind, &input, bytes)?;
        let artifact = self.orchestrator.run(request).await?;

        let output = match artifact {
            Artifact::LocalFile(path) => json!({ "path": path }),
            Artifact::Stored { url } => serde_json::to_value(VideoReply {
                message: success_message(kind).to_string(),
                download_url: url,
            })?,
        };
        Ok(output)
    }

    fn handle_capabilities(&self) -> Result<Value, ServiceError> {
        Ok(serde_json::to_value(self.describe())?)
    }

    fn available_operations() -> Vec<&'static str> {
        let mut ops: Vec<&'static str> = TRANSFORM_OPS.iter().map(TransformKind::op).collect();
        ops.extend(["media.capabilities", "metrics"]);
        ops
    }
}

#[async_trait]
impl CompressorService for MediaCompressor {
    async fn handle(&self, call: Call) -> Result<Reply, ServiceError> {
        let timer = Timer::new();
        let op = call.op.clone();
        debug!("Handling {} (context: {:?})", op, call.context);

        let result = match TRANSFORM_OPS.iter().find(|k| k.op() == op) {
            Some(&kind) => self.handle_transform(kind, call.input).await,
            None => match op.as_str() {
                "media.capabilities" => self.handle_capabilities(),
                "metrics" => Ok(json!(self.metrics.snapshot())),
                _ => Err(ServiceError::UnsupportedOperation(op.clone())),
            },
        };

        let latency = timer.elapsed_ms();
        match result {
            Ok(output) => {
                self.metrics.record_request(&op, true, latency);
                Ok(Reply {
                    ok: true,
                    output,
                    latency_ms: latency,
                })
            }
            Err(ServiceError::Serialization(e)) => {
                self.metrics.record_request(&op, false, latency);
                Err(ServiceError::Serialization(e))
            }
            Err(e) => {
                self.metrics.record_request(&op, false, latency);
                warn!("{} rejected: {}", op, e);

                let mut output = json!({
                    "error": e.code(),
                    "message": e.to_string(),
                    "op": op,
                });
                if matches!(e, ServiceError::UnsupportedOperation(_)) {
                    output["available_operations"] = json!(Self::available_operations());
                }
                Ok(Reply {
                    ok: false,
                    output,
                    latency_ms: latency,
                })
            }
        }
    }

    fn describe(&self) -> ServiceCard {
        let mut functions: Vec<FunctionCard> = TRANSFORM_OPS.iter().copied().map(function_card).collect();
        functions.push(FunctionCard {
            name: "media.capabilities".to_string(),
            description: "Return the service card with all available functions".to_string(),
            tags: vec!["metadata".to_string(), "discovery".to_string()],
            examples: vec!["Discover available compression operations".to_string()],
            idempotent: true,
            side_effects: vec![],
            input_schema: None,
            output_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "functions": { "type": "array" }
                }
            }),
        });

        ServiceCard {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Image and video compression for web delivery: WebP images, WebM/MP4 video via FFmpeg"
                .to_string(),
            tags: vec![
                "media".to_string(),
                "image".to_string(),
                "video".to_string(),
                "ffmpeg".to_string(),
                "webp".to_string(),
                "compression".to_string(),
            ],
            functions,
        }
    }
}

fn success_message(kind: TransformKind) -> &'static str {
    match kind {
        TransformKind::VideoCrop => "Video successfully cropped",
        _ => "Video successfully compressed",
    }
}

/// Build a request from call input. Zero-valued numbers count as not
/// requested.
pub fn parse_request(kind: TransformKind, input: &Value, bytes: Vec<u8>) -> Result<TransformRequest, ServiceError> {
    let file_name = str_field(input, "file_name")?;
    let geometry = GeometryRequest {
        width: opt_u32(input, "width")?,
        height: opt_u32(input, "height")?,
        x: opt_u32(input, "x")?,
        y: opt_u32(input, "y")?,
    };

    let mut request = TransformRequest::new(kind, bytes, file_name);
    if !geometry.is_unset() {
        request = request.with_geometry(geometry);
    }

    match kind {
        TransformKind::ImageResize | TransformKind::AnimatedResize => {
            if let Some(q) = opt_u32(input, "quality")? {
                let quality = u8::try_from(q)
                    .ok()
                    .and_then(Quality::new)
                    .ok_or_else(|| ServiceError::InvalidInput(format!("quality {} outside 0-{}", q, Quality::MAX)))?;
                request = request.with_quality(quality);
            }
        }
        TransformKind::VideoCompress => {
            request = request.with_video_options(parse_video_options(input)?);
        }
        TransformKind::VideoCrop => {}
    }
    Ok(request)
}

fn parse_video_options(input: &Value) -> Result<VideoOptions, ServiceError> {
    let preset = match input.get("preset").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        Some(s) => Some(s.parse::<Preset>().map_err(ServiceError::InvalidInput)?),
        None => None,
    };
    // 0 is lossless, not "unset"
    let crf = match opt_integer(input, "crf")? {
        Some(c) => Some(
            u8::try_from(c)
                .ok()
                .and_then(Crf::new)
                .ok_or_else(|| ServiceError::InvalidInput(format!("crf {} outside 0-{}", c, Crf::MAX)))?,
        ),
        None => None,
    };

    Ok(VideoOptions {
        preset,
        crf,
        audio_bitrate: opt_u32(input, "audio_bitrate")?,
        video_bitrate: opt_u32(input, "video_bitrate")?,
        framerate: opt_u32(input, "framerate")?,
        mute: input.get("no_sound").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn str_field<'a>(input: &'a Value, key: &str) -> Result<&'a str, ServiceError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::InvalidInput(format!("Missing {}", key)))
}

/// Integer field where 0 means "not requested"
fn opt_u32(input: &Value, key: &str) -> Result<Option<u32>, ServiceError> {
    Ok(opt_integer(input, key)?.filter(|&n| n != 0))
}

/// Integer field taken as given; only absent or null is `None`
fn opt_integer(input: &Value, key: &str) -> Result<Option<u32>, ServiceError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_u64()
                .ok_or_else(|| ServiceError::InvalidInput(format!("{} must be a non-negative integer", key)))?;
            u32::try_from(n)
                .map(Some)
                .map_err(|_| ServiceError::InvalidInput(format!("{} too large: {}", key, n)))
        }
    }
}

fn geometry_properties() -> Value {
    json!({
        "source_path": { "type": "string", "description": "Path to the uploaded file" },
        "file_name": { "type": "string", "description": "Original name of the upload" },
        "width": { "type": "integer", "minimum": 0, "description": "Target width; derived from height if absent" },
        "height": { "type": "integer", "minimum": 0, "description": "Target height; derived from width if absent" }
    })
}

fn function_card(kind: TransformKind) -> FunctionCard {
    let mut properties = geometry_properties();
    let video_output = json!({
        "type": "object",
        "properties": {
            "message": { "type": "string" },
            "downloadUrl": { "type": "string" }
        }
    });
    let image_output = json!({
        "type": "object",
        "properties": { "path": { "type": "string" } }
    });

    let (description, tags, examples, output_schema) = match kind {
        TransformKind::ImageResize => {
            properties["quality"] = json!({ "type": "integer", "minimum": 0, "maximum": 100, "description": "WebP quality (default: 100)" });
            (
                "Resize a still image, preserving aspect ratio when one side is given, and encode as WebP",
                vec!["image", "resize", "webp"],
                vec!["Shrink a 1920x1080 PNG to 960 wide WebP", "Re-encode a JPEG as WebP at quality 80"],
                image_output,
            )
        }
        TransformKind::AnimatedResize => {
            properties["quality"] = json!({ "type": "integer", "minimum": 0, "maximum": 100, "description": "WebP quality (default: 100)" });
            (
                "Resize every frame of a GIF or animated WebP and encode as animated WebP",
                vec!["image", "animated", "gif", "webp"],
                vec!["Convert an animated GIF to animated WebP"],
                image_output,
            )
        }
        TransformKind::VideoCompress => {
            properties["preset"] = json!({ "type": "string", "enum": ["WEBM", "MP4"], "description": "Output container (default: WEBM)" });
            properties["crf"] = json!({ "type": "integer", "minimum": 0, "maximum": Crf::MAX, "description": "Constant rate factor (default: 23)" });
            properties["audio_bitrate"] = json!({ "type": "integer", "minimum": 0, "description": "Audio bitrate in kbit/s" });
            properties["video_bitrate"] = json!({ "type": "integer", "minimum": 0, "description": "Video bitrate in kbit/s" });
            properties["framerate"] = json!({ "type": "integer", "minimum": 0, "description": "Output frames per second" });
            properties["no_sound"] = json!({ "type": "boolean", "description": "Drop the audio stream" });
            (
                "Re-encode a video as VP9 WebM or H.264 MP4 and hand the result to storage",
                vec!["video", "compress", "ffmpeg"],
                vec!["Compress an MP4 to 1280 wide at CRF 18 without audio", "Convert a MOV to WebM"],
                video_output,
            )
        }
        TransformKind::VideoCrop => {
            properties["x"] = json!({ "type": "integer", "minimum": 0, "description": "Left offset of the crop region" });
            properties["y"] = json!({ "type": "integer", "minimum": 0, "description": "Top offset of the crop region" });
            (
                "Crop a region of a video and encode as H.264 MP4",
                vec!["video", "crop", "ffmpeg"],
                vec!["Crop a 640x360 region at 100,50"],
                video_output,
            )
        }
    };

    FunctionCard {
        name: kind.op().to_string(),
        description: description.to_string(),
        tags: tags.into_iter().map(str::to_string).collect(),
        examples: examples.into_iter().map(str::to_string).collect(),
        idempotent: false,
        side_effects: if kind.is_video() {
            vec!["writes working files".to_string(), "invokes ffmpeg".to_string(), "stores artifact".to_string()]
        } else {
            vec!["writes image file".to_string()]
        },
        input_schema: Some(json!({
            "type": "object",
            "properties": properties,
            "required": ["source_path", "file_name"]
        })),
        output_schema,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::{ComposeInput, DirectiveComposer, EncodeDirective};

    fn service() -> MediaCompressor {
        MediaCompressor::from_config(&CompressorConfig::default()).unwrap()
    }

    fn call(op: &str, input: Value) -> Call {
        Call {
            op: op.to_string(),
            input,
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_capabilities() {
        let reply = service().handle(call("media.capabilities", json!({}))).await.unwrap();
        assert!(reply.ok);
        assert_eq!(reply.output["name"], "web_compressor");
        assert_eq!(reply.output["functions"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let reply = service().handle(call("audio.preprocess", json!({}))).await.unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.output["error"], "UnsupportedOperation");
        let ops = reply.output["available_operations"].as_array().unwrap();
        assert!(ops.contains(&json!("video.crop")));
    }

    #[tokio::test]
    async fn test_missing_source_rejected_before_work() {
        let svc = service();
        let reply = svc.handle(call("video.compress", json!({"file_name": "a.mp4"}))).await.unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.output["error"], "InvalidInput");
        assert_eq!(svc.metrics().snapshot().operations.video_compress, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_crf_rejected() {
        let reply = service()
            .handle(call(
                "video.compress",
                json!({"source_path": "/nonexistent", "file_name": "a.mp4", "crf": 60}),
            ))
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.output["error"], "InvalidInput");
    }

    #[test]
    fn test_zero_values_are_absent() {
        let input = json!({"file_name": "a.mp4", "width": 0, "height": 720, "framerate": 0});
        let req = parse_request(TransformKind::VideoCompress, &input, vec![1]).unwrap();
        let geometry = req.geometry.unwrap();
        assert_eq!(geometry.width, None);
        assert_eq!(geometry.height, Some(720));
        let options = req.video_options.unwrap();
        assert_eq!(options.crf, None);
        assert_eq!(options.framerate, None);
    }

    #[test]
    fn test_crf_zero_is_lossless_not_default() {
        let input = json!({"file_name": "a.mp4", "crf": 0});
        let req = parse_request(TransformKind::VideoCompress, &input, vec![1]).unwrap();
        let options = req.video_options.unwrap();
        assert_eq!(options.crf, Crf::new(0));

        let directives = DirectiveComposer::default().compose(&ComposeInput::VideoCompress {
            geometry: req.geometry_or_default(),
            options,
        });
        assert!(directives.contains(&EncodeDirective::Crf(0)));
        assert!(!directives.contains(&EncodeDirective::Crf(Crf::DEFAULT.value())));
    }

    #[test]
    fn test_null_crf_uses_default() {
        let input = json!({"file_name": "a.mp4", "crf": null});
        let options = parse_request(TransformKind::VideoCompress, &input, vec![1])
            .unwrap()
            .video_options
            .unwrap();
        assert_eq!(options.crf, None);
    }

    #[test]
    fn test_video_options_parsed() {
        let input = json!({
            "file_name": "a.mov",
            "preset": "mp4",
            "crf": 18,
            "no_sound": true,
            "audio_bitrate": 128
        });
        let options = parse_request(TransformKind::VideoCompress, &input, vec![1])
            .unwrap()
            .video_options
            .unwrap();
        assert_eq!(options.preset, Some(Preset::Mp4));
        assert_eq!(options.crf, Crf::new(18));
        assert!(options.mute);
        assert_eq!(options.audio_bitrate, Some(128));
    }

    #[test]
    fn test_unset_geometry_left_empty() {
        let req = parse_request(TransformKind::ImageResize, &json!({"file_name": "a.png"}), vec![1]).unwrap();
        assert!(req.geometry.is_none());
        assert!(req.quality.is_none());
    }

    #[test]
    fn test_bad_preset() {
        let err = parse_request(
            TransformKind::VideoCompress,
            &json!({"file_name": "a.mp4", "preset": "AVI"}),
            vec![1],
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_video_reply_shape() {
        let value = serde_json::to_value(VideoReply {
            message: success_message(TransformKind::VideoCrop).to_string(),
            download_url: "http://localhost:3010/files/x.mp4".to_string(),
        })
        .unwrap();
        assert_eq!(value["message"], "Video successfully cropped");
        assert_eq!(value["downloadUrl"], "http://localhost:3010/files/x.mp4");
    }
}
