//! Pipeline configuration.
//!
//! Tunables are loaded from an optional TOML file; every field has a default
//! so an empty file (or no file at all) is a valid configuration.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default read/write chunk size: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default number of files between hashing progress reports.
pub const DEFAULT_HASH_PROGRESS_INTERVAL: usize = 100;

/// Default number of files between copy progress reports.
pub const DEFAULT_COPY_PROGRESS_INTERVAL: usize = 50;

/// Default number of paths kept per discrepancy category.
pub const DEFAULT_SAMPLE_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunk size in bytes for both hashing and copying.
    pub chunk_size: usize,

    /// Report hashing progress every N files.
    pub hash_progress_interval: usize,

    /// Report copy progress every N files.
    pub copy_progress_interval: usize,

    /// Max paths retained per non-matched comparison category.
    pub sample_limit: usize,

    /// Permission bits applied to copied files (unix only).
    pub file_mode: u32,

    /// Permission bits applied to created directories (unix only).
    pub dir_mode: u32,

    /// Log level used when `RUST_LOG` is not set (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash_progress_interval: DEFAULT_HASH_PROGRESS_INTERVAL,
            copy_progress_interval: DEFAULT_COPY_PROGRESS_INTERVAL,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            file_mode: 0o644,
            dir_mode: 0o755,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| EngineError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(EngineError::Config {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if self.hash_progress_interval == 0 || self.copy_progress_interval == 0 {
            return Err(EngineError::Config {
                message: "progress intervals must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
