//! Transformation orchestrator
//!
//! One request in, one artifact out. Image kinds are encoded in process and
//! written under the uploads directory for direct response. Video kinds go
//! through working files and the external transcoder, and the result is
//! handed to the artifact store. Working files are released on every exit
//! path before `run` returns.

use crate::config::{CompressorConfig, ConfigError};
use crate::directives::{ComposeInput, DirectiveComposer, EncodeDirectiveSet};
use crate::error::{Result, TransformError};
use crate::ffmpeg::{FfmpegTranscoder, Transcoder};
use crate::geometry::{self, GeometryError};
use crate::imaging::{ImageCodec, ImageError, WebpCodec};
use crate::mime;
use crate::request::{TransformKind, TransformRequest};
use crate::storage::{ArtifactStore, BufferedArtifact, LocalArtifactStore};
use crate::workspace::{WorkingFile, WorkingFiles, Workspace, WorkspaceError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Final output of a transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    /// Local file for direct byte-stream response (image kinds)
    LocalFile(PathBuf),
    /// Durable reference returned by the artifact store (video kinds)
    Stored { url: String },
}

pub struct Orchestrator {
    composer: DirectiveComposer,
    images: Arc<dyn ImageCodec>,
    transcoder: Arc<dyn Transcoder>,
    workspace: Arc<dyn WorkingFiles>,
    store: Arc<dyn ArtifactStore>,
    uploads_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        composer: DirectiveComposer,
        images: Arc<dyn ImageCodec>,
        transcoder: Arc<dyn Transcoder>,
        workspace: Arc<dyn WorkingFiles>,
        store: Arc<dyn ArtifactStore>,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            composer,
            images,
            transcoder,
            workspace,
            store,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Wire the production collaborators from configuration
    pub fn from_config(config: &CompressorConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            DirectiveComposer::new(config.crf()?, config.quality()?),
            Arc::new(WebpCodec::new(config.webp_method)),
            Arc::new(FfmpegTranscoder::new(&config.ffmpeg_path)),
            Arc::new(Workspace::new(&config.work_dir)),
            Arc::new(LocalArtifactStore::new(&config.storage_dir, config.public_base_url.clone())),
            &config.uploads_dir,
        ))
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub async fn run(&self, request: TransformRequest) -> Result<Artifact> {
        if request.source_bytes.is_empty() {
            return Err(TransformError::InvalidInput("No file uploaded".to_string()));
        }

        let start = Instant::now();
        let kind = request.kind;
        info!("Starting {} for {} ({} bytes)", kind.op(), request.original_file_name, request.source_bytes.len());

        let result = match kind {
            TransformKind::ImageResize | TransformKind::AnimatedResize => self.run_image(request).await,
            TransformKind::VideoCompress | TransformKind::VideoCrop => self.run_video(request).await,
        };

        match &result {
            Ok(artifact) => info!("{} finished in {}ms: {:?}", kind.op(), start.elapsed().as_millis(), artifact),
            Err(e) => warn!("{} failed after {}ms: {}", kind.op(), start.elapsed().as_millis(), e),
        }
        result
    }

    async fn run_image(&self, request: TransformRequest) -> Result<Artifact> {
        let TransformRequest {
            kind,
            source_bytes,
            geometry,
            quality,
            ..
        } = request;

        let dims = self
            .images
            .dimensions(&source_bytes)
            .map_err(|e| GeometryError::Unreadable(e.to_string()))?;
        let resolved = geometry::resolve_request(dims.width, dims.height, &geometry.unwrap_or_default())?;

        let (input, prefix) = match kind {
            TransformKind::AnimatedResize => (ComposeInput::AnimatedResize { geometry: resolved, quality }, "animated"),
            _ => (ComposeInput::ImageResize { geometry: resolved, quality }, "image"),
        };
        let directives = self.composer.compose(&input);
        debug!("{}x{} -> {}", dims.width, dims.height, directives);

        let file_name = format!("{}-{}.{}", prefix, Uuid::new_v4(), directives.extension());
        let codec = Arc::clone(&self.images);
        let encoded = tokio::task::spawn_blocking(move || codec.encode(&source_bytes, &directives))
            .await
            .map_err(|e| ImageError::Encode(format!("Encoder task failed: {}", e)))??;

        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let output_path = self.uploads_dir.join(file_name);
        tokio::fs::write(&output_path, &encoded).await?;

        Ok(Artifact::LocalFile(output_path))
    }

    async fn run_video(&self, request: TransformRequest) -> Result<Artifact> {
        let geometry = request.geometry_or_default();
        let input = match request.kind {
            TransformKind::VideoCrop => ComposeInput::VideoCrop { geometry },
            _ => ComposeInput::VideoCompress {
                geometry,
                options: request.video_options.unwrap_or_default(),
            },
        };
        let directives = self.composer.compose(&input);
        let extension = mime::input_extension(&request.original_file_name, &request.source_bytes);

        let mut source = self.workspace.allocate_input(&request.source_bytes, &extension).await?;
        drop(request);

        let mut target = match self.workspace.allocate_output_slot(directives.extension()).await {
            Ok(target) => target,
            Err(e) => {
                self.workspace.release(&mut source).await;
                return Err(e.into());
            }
        };

        let result = self.transcode_and_store(&mut source, &mut target, &directives).await;

        self.workspace.release(&mut source).await;
        self.workspace.release(&mut target).await;
        result
    }

    async fn transcode_and_store(
        &self,
        source: &mut WorkingFile,
        target: &mut WorkingFile,
        directives: &EncodeDirectiveSet,
    ) -> Result<Artifact> {
        source.mark_in_use();
        target.mark_in_use();

        let produced = self.transcoder.execute(source.path(), target.path(), directives).await?;

        let bytes = tokio::fs::read(&produced)
            .await
            .map_err(|source| WorkspaceError::Read {
                path: produced.clone(),
                source,
            })?;
        let name = produced
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.{}", Uuid::new_v4(), directives.extension()));

        let url = self
            .store
            .put(BufferedArtifact::new(bytes, name, directives.mimetype()))
            .await?;
        Ok(Artifact::Stored { url })
    }
}
