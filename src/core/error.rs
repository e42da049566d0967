//! AL-002: Error taxonomy shared by every layer.
//!
//! Resolver and index errors propagate unchanged; the synchronizer turns
//! [`AlbumError::CatalogUnreachable`] into a warning; the task manager records
//! failures instead of re-raising them.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AlbumError>;

/// Every failure the core can surface.
#[derive(Debug, Error)]
pub enum AlbumError {
    /// Malformed handle, descriptor, argument, or request.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// More than one solution matches a loose handle.
    #[error("ambiguous handle '{handle}', candidates: {}", candidates.join(", "))]
    Ambiguous {
        handle: String,
        candidates: Vec<String>,
    },

    #[error("solution {0} is not installed")]
    NotInstalled(String),

    /// Recoverable: the caller skips the catalog and keeps going.
    #[error("catalog '{catalog}' is unreachable: {reason}")]
    CatalogUnreachable { catalog: String, reason: String },

    /// A unique key matched more than one row. Never repaired automatically.
    #[error("storage corruption: {0}")]
    StorageCorruption(String),

    /// A script exited non-zero inside an environment.
    #[error("execution of {target} failed with exit code {exit_code}: {stderr}")]
    Execution {
        target: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl AlbumError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn serialization(e: impl std::fmt::Display) -> Self {
        Self::Serialization(e.to_string())
    }

    /// True for errors the synchronizer absorbs into a warning.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CatalogUnreachable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_al002_ambiguous_lists_candidates() {
        let e = AlbumError::Ambiguous {
            handle: "blur".to_string(),
            candidates: vec!["a:g:blur:1".to_string(), "b:g:blur:1".to_string()],
        };
        let msg = e.to_string();
        assert!(msg.contains("blur"));
        assert!(msg.contains("a:g:blur:1, b:g:blur:1"));
    }

    #[test]
    fn test_al002_io_carries_path() {
        let e = AlbumError::io(
            Path::new("/nowhere/x"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(e.to_string().contains("/nowhere/x"));
    }

    #[test]
    fn test_al002_only_unreachable_is_recoverable() {
        let unreachable = AlbumError::CatalogUnreachable {
            catalog: "remote".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(unreachable.is_recoverable());
        assert!(!AlbumError::NotFound("x".to_string()).is_recoverable());
        assert!(!AlbumError::StorageCorruption("dup".to_string()).is_recoverable());
    }
}
