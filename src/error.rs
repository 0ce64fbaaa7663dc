use crate::ffmpeg::FfmpegError;
use crate::geometry::GeometryError;
use crate::imaging::ImageError;
use crate::storage::StorageError;
use crate::workspace::WorkspaceError;
use thiserror::Error;

/// Caller-visible failure of one transformation. Terminal, never retried.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Transcode failed: {0}")]
    TranscodeFailure(#[from] FfmpegError),

    #[error("Image processing failed: {0}")]
    Image(#[from] ImageError),

    #[error("Storage handoff failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Working file error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    /// Short machine-readable name
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::InvalidInput(_) => "InvalidInput",
            TransformError::Geometry(_) => "GeometryError",
            TransformError::TranscodeFailure(_) => "TranscodeFailure",
            TransformError::Image(_) => "ImageFailure",
            TransformError::Storage(_) => "StorageFailure",
            TransformError::Workspace(_) | TransformError::Io(_) => "IoFailure",
        }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
