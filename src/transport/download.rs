//! AL-011: URL download through `curl`.

use super::local::exec_command;
use crate::core::error::{AlbumError, Result};
use std::path::Path;

/// Fetches a remote resource into a local file.
pub trait Downloader: Send + Sync {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// `curl -fsSL -o <dest> <url>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurlDownloader;

impl Downloader for CurlDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AlbumError::io(parent, e))?;
        }
        let dest_str = dest.to_string_lossy();
        exec_command("curl", &["-fsSL", "-o", &*dest_str, url], None)?.check(url)?;
        Ok(())
    }
}

/// Download URL for a DOI.
pub fn doi_url(doi: &str) -> String {
    format!("https://doi.org/{}", doi)
}

/// Is `s` something [`Downloader`] can fetch.
pub fn is_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://") || s.starts_with("file://")
}
