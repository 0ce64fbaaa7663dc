//! Handoff of finished artifacts to durable storage

use async_trait::async_trait;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object already exists: {0}")]
    Conflict(String),

    #[error("Invalid object name: {0}")]
    InvalidName(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Finished output held in memory, ready for upload
#[derive(Debug, Clone, Serialize)]
pub struct BufferedArtifact {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub suggested_name: String,
    pub mimetype: String,
    pub size: usize,
}

impl BufferedArtifact {
    pub fn new(bytes: Vec<u8>, suggested_name: impl Into<String>, mimetype: impl Into<String>) -> Self {
        let size = bytes.len();
        Self {
            bytes,
            suggested_name: suggested_name.into(),
            mimetype: mimetype.into(),
            size,
        }
    }
}

/// Durable storage for video outputs
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `artifact` and return a URL it can be downloaded from
    async fn put(&self, artifact: BufferedArtifact) -> Result<String, StorageError>;
}

/// Stores objects as files in a directory served under `public_base_url`
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        let mut public_base_url = public_base_url.into();
        if !public_base_url.ends_with('/') {
            public_base_url.push('/');
        }
        Self {
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}{}", self.public_base_url, name)
    }

    fn object_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && Path::new(name).file_name().is_some();
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, artifact: BufferedArtifact) -> Result<String, StorageError> {
        let path = self.object_path(&artifact.suggested_name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::Conflict(artifact.suggested_name));
            }
            Err(e) => return Err(e.into()),
        };
        commit_or_remove(&path, async {
            file.write_all(&artifact.bytes).await?;
            file.sync_all().await
        })
        .await?;

        info!(
            "Stored {} ({}, {} bytes)",
            artifact.suggested_name, artifact.mimetype, artifact.size
        );
        Ok(self.url_for(&artifact.suggested_name))
    }
}

/// Await `write`; on failure delete the partially written object at `path`
async fn commit_or_remove(
    path: &Path,
    write: impl std::future::Future<Output = std::io::Result<()>>,
) -> Result<(), StorageError> {
    let Err(e) = write.await else { return Ok(()) };
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(rm) if rm.kind() == ErrorKind::NotFound => {}
        Err(rm) => warn!("Failed to remove partial object {}: {}", path.display(), rm),
    }
    Err(e.into())
}
