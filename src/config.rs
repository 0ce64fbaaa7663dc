//! Compressor configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::imaging::DEFAULT_WEBP_METHOD;
use crate::request::{Crf, Quality};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    /// Root of the `input/` and `output/` working directories
    pub work_dir: PathBuf,
    /// Where image derivatives are written for direct response
    pub uploads_dir: PathBuf,
    /// Backing directory of the local artifact store
    pub storage_dir: PathBuf,
    /// Prefix for download URLs handed back for video outputs
    pub public_base_url: String,
    pub ffmpeg_path: PathBuf,
    pub default_crf: u8,
    pub default_quality: u8,
    /// libwebp effort, 0-6
    pub webp_method: i32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("temp"),
            uploads_dir: PathBuf::from("uploads"),
            storage_dir: PathBuf::from("storage"),
            public_base_url: "http://localhost:3010/files/".to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            default_crf: Crf::DEFAULT.value(),
            default_quality: Quality::MAX,
            webp_method: DEFAULT_WEBP_METHOD,
        }
    }
}

impl CompressorConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.crf()?;
        self.quality()?;
        if !(0..=6).contains(&self.webp_method) {
            return Err(ConfigError::Invalid(format!("webp_method {} outside 0-6", self.webp_method)));
        }
        Ok(())
    }

    pub fn crf(&self) -> Result<Crf, ConfigError> {
        Crf::new(self.default_crf)
            .ok_or_else(|| ConfigError::Invalid(format!("default_crf {} outside 0-{}", self.default_crf, Crf::MAX)))
    }

    pub fn quality(&self) -> Result<Quality, ConfigError> {
        Quality::new(self.default_quality).ok_or_else(|| {
            ConfigError::Invalid(format!("default_quality {} outside 0-{}", self.default_quality, Quality::MAX))
        })
    }
}
