//! web_compressor - image and video compression for web delivery
//!
//! Still and animated images are resized in process and encoded as WebP.
//! Video is re-encoded by shelling out to the system `ffmpeg` binary
//! (LGPL-safe, no linking) and the result is handed to an artifact store.

pub mod config;
pub mod directives;
pub mod error;
pub mod ffmpeg;
pub mod geometry;
pub mod imaging;
pub mod metrics;
pub mod mime;
pub mod orchestrator;
pub mod request;
pub mod service;
pub mod storage;
pub mod validation;
pub mod workspace;

pub use config::CompressorConfig;
pub use directives::{DirectiveComposer, EncodeDirective, EncodeDirectiveSet};
pub use error::{Result, TransformError};
pub use ffmpeg::{FfmpegCommand, FfmpegError, FfmpegTranscoder, Transcoder};
pub use orchestrator::{Artifact, Orchestrator};
pub use request::{TransformKind, TransformRequest};
pub use service::{Call, CompressorService, MediaCompressor, Reply};
