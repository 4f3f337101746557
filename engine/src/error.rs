//! Error types for the verified-copy engine.
//!
//! `EngineError` covers both run-level failures (bad paths, overwrite consent,
//! unwritable ledgers) and per-file failures (hashing, copying, ledger lines).
//! Per-file errors are never returned from a pipeline stage: the stage logs
//! them and turns them into data (a missing digest, a gap in the copied list,
//! a skipped ledger line). Use [`EngineError::is_fatal`] to tell them apart.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source root or destination parent does not exist.
    #[error("Path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    /// Source root or destination parent exists but is not a directory.
    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// Path cannot be used as given (no final component, destination inside source).
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Destination root already exists and the caller did not allow overwrites.
    #[error(
        "Destination already exists: {} (overwrite consent required)",
        path.display()
    )]
    DestinationExists { path: PathBuf },

    /// A file could not be read while computing its digest.
    #[error("Failed to hash file: {}", path.display())]
    Hash { path: PathBuf, source: io::Error },

    /// A file could not be transferred to the destination.
    #[error("Failed to copy {} -> {}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// A ledger line could not be parsed.
    #[error("Malformed ledger line {line_no}: {reason}")]
    LedgerParse { line_no: usize, reason: String },

    /// An operational artifact for this run stamp already exists.
    #[error("Refusing to overwrite existing artifact: {}", path.display())]
    ArtifactExists { path: PathBuf },

    /// I/O failure on a run-level artifact (ledger, manifest, directory).
    #[error("I/O error on {}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Manifest could not be serialized, parsed, or failed validation.
    #[error("Manifest error: {message}")]
    Manifest { message: String },
}

impl EngineError {
    /// Build an [`EngineError::Io`], mapping `AlreadyExists` to
    /// [`EngineError::ArtifactExists`].
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::AlreadyExists {
            Self::ArtifactExists { path }
        } else {
            Self::Io { path, source }
        }
    }

    /// Returns true if this error aborts a run.
    ///
    /// Hash, copy and ledger-parse errors are scoped to a single file or line
    /// and are absorbed by the stage that hits them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Hash { .. } | Self::Copy { .. } | Self::LedgerParse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_file_errors_are_not_fatal() {
        let hash = EngineError::Hash {
            path: PathBuf::from("a.bin"),
            source: io::Error::new(io::ErrorKind::Other, "device error"),
        };
        let copy = EngineError::Copy {
            from: PathBuf::from("a"),
            to: PathBuf::from("b"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let parse = EngineError::LedgerParse {
            line_no: 3,
            reason: "bad digest".to_string(),
        };
        assert!(!hash.is_fatal());
        assert!(!copy.is_fatal());
        assert!(!parse.is_fatal());
    }

    #[test]
    fn test_path_errors_are_fatal() {
        assert!(EngineError::PathNotFound { path: PathBuf::from("/nope") }.is_fatal());
        assert!(EngineError::DestinationExists { path: PathBuf::from("/dst") }.is_fatal());
    }

    #[test]
    fn test_already_exists_maps_to_artifact_exists() {
        let err = EngineError::io(
            "manifest_20240101_000000.json",
            io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        );
        assert!(matches!(err, EngineError::ArtifactExists { .. }));
    }

    #[test]
    fn test_display_mentions_consent() {
        let err = EngineError::DestinationExists { path: PathBuf::from("/dst/pkg") };
        assert!(err.to_string().contains("overwrite consent"));
    }
}
