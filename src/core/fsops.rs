//! AL-013: Filesystem helpers for package materialization.

use super::error::{AlbumError, Result};
use std::path::Path;

/// Recursively copy `src` into `dst`, creating `dst`.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| AlbumError::io(dst, e))?;
    let entries = std::fs::read_dir(src).map_err(|e| AlbumError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| AlbumError::io(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let ft = entry.file_type().map_err(|e| AlbumError::io(&from, e))?;
        if ft.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| AlbumError::io(&from, e))?;
        }
    }
    Ok(())
}

/// Remove a directory tree if it exists.
pub fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| AlbumError::io(path, e))?;
    }
    Ok(())
}

/// Replace `dst` with a fresh copy of `src`. A no-op when both are the same path.
pub fn replace_dir(src: &Path, dst: &Path) -> Result<()> {
    if src == dst {
        return Ok(());
    }
    remove_dir(dst)?;
    copy_dir(src, dst)
}

/// Move `src` to `dst`, falling back to copy + delete across filesystems.
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    remove_dir(dst)?;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AlbumError::io(parent, e))?;
    }
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_dir(src, dst)?;
    remove_dir(src)
}
