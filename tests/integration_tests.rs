//! Integration tests for web_compressor service operations

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use web_compressor::directives::{DirectiveComposer, EncodeDirectiveSet};
use web_compressor::ffmpeg::{FfmpegError, TranscodeResult, Transcoder};
use web_compressor::imaging::WebpCodec;
use web_compressor::orchestrator::Orchestrator;
use web_compressor::service::{Call, CompressorService, MediaCompressor, Reply};
use web_compressor::storage::LocalArtifactStore;
use web_compressor::workspace::Workspace;

/// Writes a fixed payload instead of running ffmpeg and remembers the
/// arguments it was given
#[derive(Default)]
struct RecordingTranscoder {
    fail: bool,
    args: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Transcoder for RecordingTranscoder {
    async fn execute(&self, input: &Path, output: &Path, directives: &EncodeDirectiveSet) -> TranscodeResult {
        assert!(input.exists(), "input must be written before execute");
        self.args.lock().unwrap().push(directives.ffmpeg_args());
        if self.fail {
            return Err(FfmpegError::ExecutionFailed("Invalid data found when processing input".to_string()));
        }
        tokio::fs::write(output, b"transcoded").await?;
        Ok(output.to_path_buf())
    }
}

struct Harness {
    tmp: TempDir,
    transcoder: Arc<RecordingTranscoder>,
    service: MediaCompressor,
}

impl Harness {
    fn new(fail: bool) -> Self {
        let tmp = TempDir::new().unwrap();
        let transcoder = Arc::new(RecordingTranscoder {
            fail,
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(
            DirectiveComposer::default(),
            Arc::new(WebpCodec::new(0)),
            transcoder.clone(),
            Arc::new(Workspace::new(tmp.path().join("temp"))),
            Arc::new(LocalArtifactStore::new(tmp.path().join("storage"), "http://localhost:3010/files")),
            tmp.path().join("uploads"),
        );
        Self {
            tmp,
            transcoder,
            service: MediaCompressor::new(Arc::new(orchestrator)),
        }
    }

    fn upload(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    async fn call(&self, op: &str, input: Value) -> Reply {
        self.service
            .handle(Call {
                op: op.to_string(),
                input,
                context: HashMap::new(),
            })
            .await
            .unwrap()
    }

    fn working_files(&self) -> usize {
        ["input", "output"]
            .iter()
            .map(|d| self.tmp.path().join("temp").join(d))
            .filter(|d| d.exists())
            .map(|d| std::fs::read_dir(d).unwrap().count())
            .sum()
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img).write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_image_resize_by_width() {
    let h = Harness::new(false);
    let source = h.upload("photo.png", &png_bytes(1920, 1080));

    let reply = h
        .call(
            "image.transform",
            json!({"source_path": source, "file_name": "photo.png", "width": 960}),
        )
        .await;
    assert!(reply.ok, "{}", reply.output);

    let path = PathBuf::from(reply.output["path"].as_str().unwrap());
    assert!(path.starts_with(h.tmp.path().join("uploads")));
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("image-") && name.ends_with(".webp"));

    let decoded = image::load_from_memory(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (960, 540));
    assert!(h.transcoder.args.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_image_zero_width_means_unset() {
    let h = Harness::new(false);
    let source = h.upload("photo.png", &png_bytes(40, 20));

    let reply = h
        .call(
            "image.transform",
            json!({"source_path": source, "file_name": "photo.png", "width": 0, "height": 10}),
        )
        .await;
    assert!(reply.ok, "{}", reply.output);

    let path = reply.output["path"].as_str().unwrap();
    let decoded = image::load_from_memory(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (20, 10));
}

#[tokio::test]
async fn test_unreadable_image_is_geometry_error() {
    let h = Harness::new(false);
    let source = h.upload("broken.png", b"definitely not a png");

    let reply = h
        .call("image.transform", json!({"source_path": source, "file_name": "broken.png"}))
        .await;
    assert!(!reply.ok);
    assert_eq!(reply.output["error"], "GeometryError");
}

#[tokio::test]
async fn test_video_compress_mp4_reply() {
    let h = Harness::new(false);
    let source = h.upload("clip.mov", b"fake mov bytes");

    let reply = h
        .call(
            "video.compress",
            json!({
                "source_path": source,
                "file_name": "clip.mov",
                "preset": "MP4",
                "crf": 18,
                "no_sound": true,
                "width": 1280
            }),
        )
        .await;
    assert!(reply.ok, "{}", reply.output);
    assert_eq!(reply.output["message"], "Video successfully compressed");

    let url = reply.output["downloadUrl"].as_str().unwrap();
    assert!(url.starts_with("http://localhost:3010/files/"));
    assert!(url.ends_with(".mp4"));

    let name = url.rsplit('/').next().unwrap();
    let stored = std::fs::read(h.tmp.path().join("storage").join(name)).unwrap();
    assert_eq!(stored, b"transcoded");

    let args = h.transcoder.args.lock().unwrap();
    assert_eq!(
        args[0],
        vec!["-c:v", "libx264", "-pix_fmt", "yuv420p", "-crf", "18", "-an", "-vf", "scale=1280:-2", "-f", "mp4"]
    );
    assert_eq!(h.working_files(), 0);
}

#[tokio::test]
async fn test_video_crop_reply() {
    let h = Harness::new(false);
    let source = h.upload("clip.mp4", b"fake mp4 bytes");

    let reply = h
        .call(
            "video.crop",
            json!({"source_path": source, "file_name": "clip.mp4", "width": 640, "height": 360, "x": 100, "y": 50}),
        )
        .await;
    assert!(reply.ok, "{}", reply.output);
    assert_eq!(reply.output["message"], "Video successfully cropped");

    let args = h.transcoder.args.lock().unwrap();
    let filter = args[0].iter().position(|a| a == "-vf").map(|i| args[0][i + 1].clone());
    assert_eq!(filter.as_deref(), Some("crop=640:360:100:50"));
}

#[tokio::test]
async fn test_video_failure_releases_working_files() {
    let h = Harness::new(true);
    let source = h.upload("clip.mp4", b"garbage");

    let reply = h
        .call("video.compress", json!({"source_path": source, "file_name": "clip.mp4"}))
        .await;
    assert!(!reply.ok);
    assert_eq!(reply.output["error"], "TranscodeFailure");
    assert!(reply.output["message"].as_str().unwrap().contains("Invalid data"));
    assert_eq!(h.working_files(), 0);
    assert!(!h.tmp.path().join("storage").exists() || std::fs::read_dir(h.tmp.path().join("storage")).unwrap().count() == 0);
}

#[tokio::test]
async fn test_empty_upload_rejected() {
    let h = Harness::new(false);
    let source = h.upload("empty.mp4", b"");

    let reply = h
        .call("video.compress", json!({"source_path": source, "file_name": "empty.mp4"}))
        .await;
    assert!(!reply.ok);
    assert_eq!(reply.output["error"], "InvalidInput");
    assert!(h.transcoder.args.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_capabilities_and_metrics() {
    let h = Harness::new(false);

    let reply = h.call("media.capabilities", json!({})).await;
    assert!(reply.ok);
    let names: Vec<&str> = reply.output["functions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert_eq!(
        names,
        vec!["image.transform", "image.compress_animated", "video.compress", "video.crop", "media.capabilities"]
    );

    let source = h.upload("clip.mp4", b"bytes");
    h.call("video.compress", json!({"source_path": source, "file_name": "clip.mp4"})).await;
    h.call("unknown.op", json!({})).await;

    let metrics = h.call("metrics", json!({})).await;
    assert!(metrics.ok);
    assert_eq!(metrics.output["operations"]["video_compress"], 1);
    assert_eq!(metrics.output["failed_requests"], 1);
}
