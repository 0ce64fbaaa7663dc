//! Working files for the video path
//!
//! Transcoder input and output live as uniquely named files under
//! `<work_dir>/input` and `<work_dir>/output`. Directories are created on
//! first use. Every [`WorkingFile`] must be released exactly once; a file
//! dropped without release is removed synchronously as a last resort.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create working directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[error("Failed to write working file {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("Failed to read working file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Input,
    Output,
}

impl FileRole {
    fn dir_name(&self) -> &'static str {
        match self {
            FileRole::Input => "input",
            FileRole::Output => "output",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Created,
    InUse,
    ReleasePending,
    Released,
}

/// A temporary file owned by exactly one job
#[derive(Debug)]
pub struct WorkingFile {
    id: Uuid,
    role: FileRole,
    path: PathBuf,
    state: FileState,
}

impl WorkingFile {
    pub fn new(id: Uuid, role: FileRole, path: PathBuf) -> Self {
        Self {
            id,
            role,
            path,
            state: FileState::Created,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> FileRole {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn mark_in_use(&mut self) {
        if self.state == FileState::Created {
            self.state = FileState::InUse;
        }
    }

    pub fn begin_release(&mut self) {
        self.state = FileState::ReleasePending;
    }

    pub fn mark_released(&mut self) {
        self.state = FileState::Released;
    }

    pub fn is_released(&self) -> bool {
        self.state == FileState::Released
    }
}

impl Drop for WorkingFile {
    fn drop(&mut self) {
        if self.state == FileState::Released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => warn!("Working file {} dropped without release, removed", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Working file {} dropped without release, removal failed: {}", self.path.display(), e),
        }
    }
}

/// Allocation and release of working files
#[async_trait]
pub trait WorkingFiles: Send + Sync {
    /// Persist `bytes` into a fresh input file. Returns once the write is
    /// flushed, so the transcoder never sees a partial file.
    async fn allocate_input(&self, bytes: &[u8], extension: &str) -> Result<WorkingFile, WorkspaceError>;

    /// Reserve a fresh output path; the file itself is created by the transcoder
    async fn allocate_output_slot(&self, extension: &str) -> Result<WorkingFile, WorkspaceError>;

    /// Delete the backing file. Best effort: failures are logged, never returned.
    async fn release(&self, file: &mut WorkingFile);
}

/// Filesystem-backed working directories
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, role: FileRole) -> PathBuf {
        self.root.join(role.dir_name())
    }

    async fn ensure_dir(&self, role: FileRole) -> Result<PathBuf, WorkspaceError> {
        let dir = self.dir(role);
        // create_dir_all tolerates concurrent creators
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| WorkspaceError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// File name for a working file: its id plus the extension
    fn file_name(id: Uuid, extension: &str) -> String {
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() {
            id.to_string()
        } else {
            format!("{}.{}", id, extension)
        }
    }
}

#[async_trait]
impl WorkingFiles for Workspace {
    async fn allocate_input(&self, bytes: &[u8], extension: &str) -> Result<WorkingFile, WorkspaceError> {
        let dir = self.ensure_dir(FileRole::Input).await?;
        let id = Uuid::new_v4();
        let path = dir.join(Self::file_name(id, extension));

        let write_err = |source| WorkspaceError::Write {
            path: path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(write_err)?;
        let file_ref = WorkingFile::new(id, FileRole::Input, path.clone());
        file.write_all(bytes).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        debug!("Input saved to {} ({} bytes)", path.display(), bytes.len());
        Ok(file_ref)
    }

    async fn allocate_output_slot(&self, extension: &str) -> Result<WorkingFile, WorkspaceError> {
        let dir = self.ensure_dir(FileRole::Output).await?;
        let id = Uuid::new_v4();
        let path = dir.join(Self::file_name(id, extension));
        debug!("Output slot reserved at {}", path.display());
        Ok(WorkingFile::new(id, FileRole::Output, path))
    }

    async fn release(&self, file: &mut WorkingFile) {
        if file.is_released() {
            return;
        }
        file.begin_release();
        match tokio::fs::remove_file(file.path()).await {
            Ok(()) => debug!("Working file deleted: {}", file.path().display()),
            // Output slots are never written when the transcode fails early
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Working file already absent: {}", file.path().display())
            }
            Err(e) => warn!("Failed to delete working file {}: {}", file.path().display(), e),
        }
        file.mark_released();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_allocate_input_writes_bytes() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path().join("temp"));

        let mut file = ws.allocate_input(b"hello", "mp4").await.unwrap();
        assert_eq!(file.role(), FileRole::Input);
        assert_eq!(file.state(), FileState::Created);
        assert!(file.path().starts_with(ws.dir(FileRole::Input)));
        assert_eq!(file.path().extension().unwrap(), "mp4");
        assert_eq!(std::fs::read(file.path()).unwrap(), b"hello");

        ws.release(&mut file).await;
        assert!(file.is_released());
        assert!(!file.path().exists());
    }

    #[tokio::test]
    async fn test_output_slot_has_no_file() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());

        let mut slot = ws.allocate_output_slot(".webm").await.unwrap();
        assert!(ws.dir(FileRole::Output).is_dir());
        assert!(!slot.path().exists());
        assert_eq!(slot.path().extension().unwrap(), "webm");

        // Releasing a never-written slot is fine
        ws.release(&mut slot).await;
        assert_eq!(slot.state(), FileState::Released);
    }

    #[tokio::test]
    async fn test_names_are_unique() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());

        let mut a = ws.allocate_input(b"a", "bin").await.unwrap();
        let mut b = ws.allocate_input(b"b", "bin").await.unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.id(), b.id());

        ws.release(&mut a).await;
        ws.release(&mut b).await;
    }

    #[tokio::test]
    async fn test_file_name_carries_id() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());

        let mut input = ws.allocate_input(b"x", "mov").await.unwrap();
        let mut output = ws.allocate_output_slot("webm").await.unwrap();
        for file in [&input, &output] {
            let stem = file.path().file_stem().unwrap().to_str().unwrap();
            assert_eq!(stem, file.id().to_string());
        }

        ws.release(&mut input).await;
        ws.release(&mut output).await;
    }

    #[tokio::test]
    async fn test_concurrent_allocation_shares_dirs() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path().join("nested").join("temp"));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let ws = ws.clone();
            handles.push(tokio::spawn(async move { ws.allocate_input(&[i], "bin").await }));
        }
        let mut files = Vec::new();
        for h in handles {
            files.push(h.await.unwrap().unwrap());
        }
        for f in files.iter_mut() {
            ws.release(f).await;
        }
        assert_eq!(std::fs::read_dir(ws.dir(FileRole::Input)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drop_without_release_removes_file() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());

        let file = ws.allocate_input(b"leak", "bin").await.unwrap();
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_state_transitions() {
        let mut f = WorkingFile::new(Uuid::new_v4(), FileRole::Output, PathBuf::from("/nonexistent/x"));
        f.mark_in_use();
        assert_eq!(f.state(), FileState::InUse);
        f.begin_release();
        assert_eq!(f.state(), FileState::ReleasePending);
        f.mark_released();
        assert!(f.is_released());
    }
}
