//! AL-003: Configuration and on-disk layout of an album base directory.
//!
//! ```text
//! <base>/album.yaml                 optional config
//! <base>/catalogs/<name>/           local copy of each catalog
//! <base>/collection/album_collection.db
//! <base>/installations/<catalog>/<group>/<name>/<version>/
//! <base>/envs/<environment>/
//! <base>/tmp/
//! <base>/events.jsonl
//! ```

use super::error::{AlbumError, Result};
use super::types::Coordinates;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "album.yaml";
pub const BASE_DIR_ENV: &str = "ALBUM_BASE_DIR";

/// User configuration plus the resolved base directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumConfig {
    #[serde(skip)]
    pub base_dir: PathBuf,

    /// Catalogs added on `init`.
    #[serde(default)]
    pub default_catalogs: Vec<CatalogSpec>,

    /// Task manager worker count.
    #[serde(default = "default_workers")]
    pub task_workers: usize,

    /// Upgrade all catalogs once when an exact lookup misses.
    #[serde(default)]
    pub refresh_on_miss: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub src: String,
    #[serde(default)]
    pub branch: Option<String>,
}

fn default_workers() -> usize {
    2
}

impl AlbumConfig {
    /// Defaults rooted at `base_dir`.
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            default_catalogs: Vec::new(),
            task_workers: default_workers(),
            refresh_on_miss: false,
        }
    }

    /// Load `<base>/album.yaml` if present, else defaults.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::new(base_dir));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| AlbumError::io(&path, e))?;
        let mut config: Self = serde_yaml_ng::from_str(&content).map_err(|e| {
            AlbumError::Validation(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.base_dir = base_dir.to_path_buf();
        if config.task_workers == 0 {
            return Err(AlbumError::Validation(
                "task_workers must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.base_dir.join(CONFIG_FILE);
        let yaml = serde_yaml_ng::to_string(self).map_err(AlbumError::serialization)?;
        std::fs::create_dir_all(&self.base_dir).map_err(|e| AlbumError::io(&self.base_dir, e))?;
        std::fs::write(&path, yaml).map_err(|e| AlbumError::io(&path, e))
    }

    pub fn catalogs_dir(&self) -> PathBuf {
        self.base_dir.join("catalogs")
    }

    pub fn collection_db(&self) -> PathBuf {
        self.base_dir.join("collection").join("album_collection.db")
    }

    pub fn installation_dir(&self, catalog: &str, coords: &Coordinates) -> PathBuf {
        self.base_dir
            .join("installations")
            .join(catalog)
            .join(&coords.group)
            .join(&coords.name)
            .join(&coords.version)
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.base_dir.join("envs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.base_dir.join("tmp")
    }

    /// Create every layout directory.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.catalogs_dir(),
            self.base_dir.join("collection"),
            self.base_dir.join("installations"),
            self.envs_dir(),
            self.tmp_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| AlbumError::io(&dir, e))?;
        }
        Ok(())
    }
}

/// Base directory: explicit, else `$ALBUM_BASE_DIR`, else `$HOME/.album`.
pub fn resolve_base_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var(BASE_DIR_ENV) {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".album"),
        Err(_) => PathBuf::from(".album"),
    }
}
