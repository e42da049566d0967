//! AL-030: Catalogs. On-disk catalog directories and the catalog manager.
//!
//! A catalog directory holds `album_catalog_index.json` (name, version,
//! type), `album_catalog_index.db`, and `solutions/<group>/<name>/<version>/`
//! packages. The manager keeps the collection's catalog table in step with
//! the directories under `<base>/catalogs/`.

pub mod source;
pub mod sync;

use crate::core::config::AlbumConfig;
use crate::core::error::{AlbumError, Result};
use crate::core::fsops;
use crate::core::parser::{SolutionLoader, DESCRIPTOR_FILE};
use crate::core::types::{
    CatalogMeta, CatalogRecord, CollectionEntry, Coordinates, InstallState, ProvenanceEvent,
    SolutionMetadata,
};
use crate::provenance::{eventlog, hasher};
use crate::store::catalog_index::{CatalogIndex, EXPORT_FILE};
use crate::store::collection_index::{CollectionIndex, NewCatalog};
use source::CatalogSource;
use std::path::{Path, PathBuf};
use sync::Synchronizer;
use tracing::{debug, info};

pub const CATALOG_META_FILE: &str = "album_catalog_index.json";
pub const CATALOG_INDEX_FILE: &str = "album_catalog_index.db";
pub const SOLUTIONS_DIR: &str = "solutions";
pub const CACHE_CATALOG_NAME: &str = "cache_catalog";

/// Package directory of `coords` inside a catalog directory.
pub fn solution_dir(catalog_path: &Path, coords: &Coordinates) -> PathBuf {
    catalog_path
        .join(SOLUTIONS_DIR)
        .join(&coords.group)
        .join(&coords.name)
        .join(&coords.version)
}

pub fn read_catalog_meta(dir: &Path) -> Result<CatalogMeta> {
    let path = dir.join(CATALOG_META_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| AlbumError::io(&path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        AlbumError::Validation(format!("invalid catalog meta {}: {}", path.display(), e))
    })
}

pub fn write_catalog_meta(dir: &Path, meta: &CatalogMeta) -> Result<()> {
    let path = dir.join(CATALOG_META_FILE);
    std::fs::create_dir_all(dir).map_err(|e| AlbumError::io(dir, e))?;
    let json = serde_json::to_string_pretty(meta).map_err(AlbumError::serialization)?;
    std::fs::write(&path, json).map_err(|e| AlbumError::io(&path, e))
}

/// A catalog directory with its index.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub meta: CatalogMeta,
    pub path: PathBuf,
    index: CatalogIndex,
}

impl Catalog {
    /// Initialize an empty catalog at `path`.
    pub fn create(path: &Path, name: &str) -> Result<Self> {
        let meta = CatalogMeta {
            name: name.to_string(),
            version: "0.1.0".to_string(),
            catalog_type: "direct".to_string(),
        };
        write_catalog_meta(path, &meta)?;
        std::fs::create_dir_all(path.join(SOLUTIONS_DIR))
            .map_err(|e| AlbumError::io(path, e))?;
        let index = CatalogIndex::open(&path.join(CATALOG_INDEX_FILE))?;
        index.set_meta(&meta.name, &meta.version)?;
        Ok(Self {
            meta,
            path: path.to_path_buf(),
            index,
        })
    }

    /// Open an existing catalog directory.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = read_catalog_meta(path)?;
        let index = CatalogIndex::open(&path.join(CATALOG_INDEX_FILE))?;
        Ok(Self {
            meta,
            path: path.to_path_buf(),
            index,
        })
    }

    pub fn index(&self) -> &CatalogIndex {
        &self.index
    }

    pub fn solution_dir(&self, coords: &Coordinates) -> PathBuf {
        solution_dir(&self.path, coords)
    }

    /// Copy a solution package into the catalog and index it.
    pub fn publish(&self, package: &Path, loader: &dyn SolutionLoader) -> Result<SolutionMetadata> {
        let loaded = loader.load(package)?;
        let meta = loaded.descriptor.metadata;
        let dest = self.solution_dir(&meta.coordinates());
        fsops::replace_dir(&loaded.package_dir, &dest)?;
        self.index.insert(&meta)?;
        debug!("published {} into catalog {}", meta.coordinates(), self.meta.name);
        Ok(meta)
    }

    pub fn unpublish(&self, coords: &Coordinates) -> Result<bool> {
        let removed = self.index.remove(coords)?;
        fsops::remove_dir(&self.solution_dir(coords))?;
        Ok(removed)
    }

    /// Re-index every `solutions/*/*/*/solution.yml` and drop rows without a
    /// package. Returns the number of indexed solutions.
    pub fn rebuild_index(&self, loader: &dyn SolutionLoader) -> Result<usize> {
        let mut on_disk = Vec::new();
        for descriptor in find_descriptors(&self.path.join(SOLUTIONS_DIR))? {
            let loaded = loader.load(&descriptor)?;
            let meta = loaded.descriptor.metadata;
            let expected = self.solution_dir(&meta.coordinates());
            if loaded.package_dir != expected {
                return Err(AlbumError::Validation(format!(
                    "{} declares {} but lives in {}",
                    descriptor.display(),
                    meta.coordinates(),
                    loaded.package_dir.display()
                )));
            }
            self.index.insert(&meta)?;
            on_disk.push(meta.coordinates());
        }
        for stale in self.index.list_all()? {
            if !on_disk.contains(&stale.coordinates()) {
                self.index.remove(&stale.coordinates())?;
            }
        }
        self.index.set_meta(&self.meta.name, &self.meta.version)?;
        Ok(on_disk.len())
    }

    /// Write `catalog_solution_list.json` next to the index.
    pub fn export(&self) -> Result<PathBuf> {
        let path = self.path.join(EXPORT_FILE);
        self.index.export(&path)?;
        Ok(path)
    }
}

fn find_descriptors(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !root.is_dir() {
        return Ok(found);
    }
    let mut stack = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = stack.pop() {
        if depth == 3 {
            let file = dir.join(DESCRIPTOR_FILE);
            if file.is_file() {
                found.push(file);
            }
            continue;
        }
        for entry in std::fs::read_dir(&dir).map_err(|e| AlbumError::io(&dir, e))? {
            let entry = entry.map_err(|e| AlbumError::io(&dir, e))?;
            if entry.path().is_dir() {
                stack.push((entry.path(), depth + 1));
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Adds, removes, and lists the catalogs of a collection.
pub struct CatalogManager<'a> {
    config: &'a AlbumConfig,
    collection: &'a CollectionIndex,
    source: &'a dyn CatalogSource,
}

impl<'a> CatalogManager<'a> {
    pub fn new(
        config: &'a AlbumConfig,
        collection: &'a CollectionIndex,
        source: &'a dyn CatalogSource,
    ) -> Self {
        Self {
            config,
            collection,
            source,
        }
    }

    /// The cache catalog, created on first use.
    pub fn ensure_cache_catalog(&self) -> Result<CatalogRecord> {
        match self.collection.get_cache_catalog() {
            Ok(record) => Ok(record),
            Err(AlbumError::NotFound(_)) => {
                let path = self.config.catalogs_dir().join(CACHE_CATALOG_NAME);
                let catalog = Catalog::create(&path, CACHE_CATALOG_NAME)?;
                let record = self.collection.insert_catalog(&NewCatalog {
                    name: CACHE_CATALOG_NAME.to_string(),
                    src: None,
                    path,
                    branch: None,
                    catalog_type: catalog.meta.catalog_type,
                    is_cache: true,
                    deletable: false,
                    version: Some(catalog.meta.version),
                })?;
                info!("created cache catalog at {}", record.path.display());
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch, register, and synchronize a catalog from `src`.
    pub fn add_catalog(&self, src: &str, branch: Option<&str>) -> Result<CatalogRecord> {
        self.ensure_cache_catalog()?;
        if let Some(existing) = self.collection.get_catalog_by_src(src)? {
            return Err(AlbumError::Validation(format!(
                "catalog '{}' already added from {}",
                existing.name, src
            )));
        }

        let staging = self
            .config
            .tmp_dir()
            .join(format!("catalog-{}", hasher::short_digest(src)));
        fsops::remove_dir(&staging)?;
        let meta = self.source.fetch_index(src, branch, &staging)?;
        if self.collection.get_catalog_by_name(&meta.name)?.is_some() {
            fsops::remove_dir(&staging)?;
            return Err(AlbumError::Validation(format!(
                "catalog named '{}' already exists",
                meta.name
            )));
        }

        let dest = self.config.catalogs_dir().join(&meta.name);
        fsops::move_dir(&staging, &dest)?;
        let record = self.collection.insert_catalog(&NewCatalog {
            name: meta.name.clone(),
            src: Some(src.to_string()),
            path: dest,
            branch: branch.map(str::to_string),
            catalog_type: meta.catalog_type.clone(),
            is_cache: false,
            deletable: true,
            version: Some(meta.version.clone()),
        })?;

        let sync = Synchronizer::new(self.config, self.collection, self.source);
        let changes = sync.diff_catalog(&record)?;
        sync.apply(&record, &changes)?;

        eventlog::record(
            &self.config.base_dir,
            ProvenanceEvent::CatalogAdded {
                catalog: record.name.clone(),
                src: src.to_string(),
            },
        );
        info!("added catalog {} ({} solutions)", record.name, changes.len());
        Ok(record)
    }

    /// Remove a deletable catalog without installed solutions.
    pub fn remove_catalog(&self, name: &str) -> Result<CatalogRecord> {
        let record = self
            .get_by_name(name)?
            .ok_or_else(|| AlbumError::NotFound(format!("catalog '{}'", name)))?;
        if record.is_cache || !record.deletable {
            return Err(AlbumError::Validation(format!(
                "catalog '{}' cannot be removed",
                name
            )));
        }
        let installed: Vec<String> = self
            .collection
            .list_by_catalog(record.catalog_id)?
            .iter()
            .filter(|e| e.state.installed)
            .map(|e| e.coordinates().to_string())
            .collect();
        if !installed.is_empty() {
            return Err(AlbumError::Validation(format!(
                "catalog '{}' has installed solutions: {}",
                name,
                installed.join(", ")
            )));
        }
        self.collection.remove_catalog(record.catalog_id)?;
        fsops::remove_dir(&record.path)?;
        eventlog::record(
            &self.config.base_dir,
            ProvenanceEvent::CatalogRemoved {
                catalog: record.name.clone(),
            },
        );
        info!("removed catalog {}", name);
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<CatalogRecord>> {
        self.collection.list_catalogs()
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<CatalogRecord>> {
        self.collection.get_catalog_by_name(name)
    }

    /// Register a local package in the cache catalog. Keeps the install
    /// state of an existing row; unchanged metadata leaves the row untouched.
    pub fn add_to_cache_catalog(
        &self,
        meta: &SolutionMetadata,
        package_dir: &Path,
    ) -> Result<CollectionEntry> {
        let cache = self.ensure_cache_catalog()?;
        let coords = meta.coordinates();
        let dest = solution_dir(&cache.path, &coords);
        fsops::replace_dir(package_dir, &dest)?;

        match self.collection.get_solution(cache.catalog_id, &coords)? {
            Some(existing) if existing.metadata == *meta => {}
            Some(existing) => {
                self.collection
                    .update_solution(cache.catalog_id, meta, &existing.state)?;
            }
            None => {
                self.collection
                    .add_solution(cache.catalog_id, meta, &InstallState::default())?;
            }
        }
        CatalogIndex::open(&cache.path.join(CATALOG_INDEX_FILE))?.insert(meta)?;

        self.collection
            .get_solution(cache.catalog_id, &coords)?
            .ok_or_else(|| AlbumError::NotFound(coords.to_string()))
    }

    /// Drop a solution from the cache catalog, rows and files.
    pub fn remove_from_cache_catalog(&self, coords: &Coordinates) -> Result<()> {
        let cache = self.ensure_cache_catalog()?;
        self.collection.remove_solution(cache.catalog_id, coords)?;
        CatalogIndex::open(&cache.path.join(CATALOG_INDEX_FILE))?.remove(coords)?;
        fsops::remove_dir(&solution_dir(&cache.path, coords))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Catalog fixtures shared by tests across the crate.

    use super::*;
    use crate::core::parser::DescriptorLoader;

    /// Write a `solution.yml` package under `root/<name>-<version>`.
    pub fn write_package(root: &Path, group: &str, name: &str, version: &str, extra: &str) -> PathBuf {
        let dir = root.join(format!("{}-{}", name, version));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(DESCRIPTOR_FILE),
            format!(
                "group: {}\nname: {}\nversion: '{}'\n{}",
                group, name, version, extra
            ),
        )
        .unwrap();
        dir
    }

    /// A source catalog directory with the given `(group, name, version)` packages.
    pub fn source_catalog(root: &Path, name: &str, solutions: &[(&str, &str, &str)]) -> Catalog {
        let catalog = Catalog::create(&root.join(name), name).unwrap();
        let packages = root.join(format!("{}-packages", name));
        for (g, n, v) in solutions {
            let pkg = write_package(&packages, g, n, v, "hooks:\n  run: echo run\n");
            catalog.publish(&pkg, &DescriptorLoader).unwrap();
        }
        catalog
    }
}
