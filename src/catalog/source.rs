//! AL-031: Catalog sources. Deliver a catalog snapshot into a local directory.
//!
//! A snapshot is the two-file layout (`album_catalog_index.json`,
//! `album_catalog_index.db`) plus `solutions/`. Failing to reach the source
//! surfaces as [`AlbumError::CatalogUnreachable`].

use super::{read_catalog_meta, CATALOG_INDEX_FILE, CATALOG_META_FILE};
use crate::core::error::{AlbumError, Result};
use crate::core::fsops;
use crate::core::types::CatalogMeta;
use crate::transport::local::exec_command;
use std::path::Path;
use tracing::debug;

/// Fetches a catalog snapshot.
pub trait CatalogSource: Send + Sync {
    /// Replace `dest` with a snapshot of `src` and return its metadata.
    fn fetch_index(&self, src: &str, branch: Option<&str>, dest: &Path) -> Result<CatalogMeta>;
}

/// Is `src` a git remote rather than a local directory.
pub fn is_git_src(src: &str) -> bool {
    src.ends_with(".git")
        || src.starts_with("https://")
        || src.starts_with("http://")
        || src.starts_with("ssh://")
        || src.starts_with("git@")
}

fn unreachable(src: &str, reason: impl Into<String>) -> AlbumError {
    AlbumError::CatalogUnreachable {
        catalog: src.to_string(),
        reason: reason.into(),
    }
}

fn check_snapshot(src: &str, dest: &Path) -> Result<CatalogMeta> {
    for file in [CATALOG_META_FILE, CATALOG_INDEX_FILE] {
        if !dest.join(file).is_file() {
            return Err(AlbumError::Validation(format!(
                "{} is not a catalog: missing {}",
                src, file
            )));
        }
    }
    read_catalog_meta(dest)
}

/// Copies a catalog from a local directory. The branch is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirSource;

impl CatalogSource for DirSource {
    fn fetch_index(&self, src: &str, _branch: Option<&str>, dest: &Path) -> Result<CatalogMeta> {
        let path = Path::new(src.strip_prefix("file://").unwrap_or(src));
        if !path.is_dir() {
            return Err(unreachable(src, "directory does not exist"));
        }
        check_snapshot(src, path)?;
        fsops::replace_dir(path, dest)?;
        debug!("copied catalog {} to {}", src, dest.display());
        read_catalog_meta(dest)
    }
}

/// Shallow-clones a catalog repository with the `git` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitSource;

impl CatalogSource for GitSource {
    fn fetch_index(&self, src: &str, branch: Option<&str>, dest: &Path) -> Result<CatalogMeta> {
        fsops::remove_dir(dest)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AlbumError::io(parent, e))?;
        }
        let dest_str = dest.to_string_lossy().to_string();
        let mut args = vec!["clone", "--depth", "1"];
        if let Some(b) = branch {
            args.extend(["--branch", b]);
        }
        args.extend([src, dest_str.as_str()]);
        let out = exec_command("git", &args, None).map_err(|e| unreachable(src, e.to_string()))?;
        if !out.success() {
            return Err(unreachable(src, out.stderr.trim()));
        }
        fsops::remove_dir(&dest.join(".git"))?;
        check_snapshot(src, dest)
    }
}

/// Dispatches to [`GitSource`] or [`DirSource`] by locator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSource;

impl CatalogSource for DefaultSource {
    fn fetch_index(&self, src: &str, branch: Option<&str>, dest: &Path) -> Result<CatalogMeta> {
        if is_git_src(src) {
            GitSource.fetch_index(src, branch, dest)
        } else {
            DirSource.fetch_index(src, branch, dest)
        }
    }
}
