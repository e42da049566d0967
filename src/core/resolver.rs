//! AL-006: Handle resolution.
//!
//! Maps a handle string to a [`ResolveResult`]. Categories are tried in
//! priority order and the first one that matches the handle's shape wins:
//!
//! 1. filesystem path or URL: materialized and registered in the cache catalog
//! 2. DOI (`doi:10.1234/x` or `10.1234/x`): looked up across the collection
//! 3. `group:name:version` or `catalog:group:name:version`: exact lookup
//! 4. anything else: a guess by name, name+version, or group+name

use super::config::AlbumConfig;
use super::error::{AlbumError, Result};
use super::fsops;
use super::parser::{SolutionLoader, DESCRIPTOR_FILE};
use super::types::{CatalogRecord, CollectionEntry, Coordinates, ResolveResult};
use crate::catalog::source::CatalogSource;
use crate::catalog::sync::Synchronizer;
use crate::catalog::{solution_dir, CatalogManager};
use crate::provenance::hasher;
use crate::store::collection_index::CollectionIndex;
use crate::transport::download::{doi_url, is_url, Downloader};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

const DOI_PATTERN: &str = r"^(?:doi:)?(\d+\.\d+)/(.+)$";

static DOI_RE: OnceLock<Regex> = OnceLock::new();

fn doi_regex() -> Result<&'static Regex> {
    if let Some(re) = DOI_RE.get() {
        return Ok(re);
    }
    let re = Regex::new(DOI_PATTERN).map_err(|e| AlbumError::Validation(e.to_string()))?;
    Ok(DOI_RE.get_or_init(|| re))
}

/// Shape of a handle string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handle {
    Path(PathBuf),
    Url(String),
    /// `prefix/suffix` without the `doi:` scheme.
    Doi(String),
    Coordinates {
        catalog: Option<String>,
        coordinates: Coordinates,
    },
    /// One or two `:`-separated parts.
    Guess(Vec<String>),
}

/// Classify a handle string.
pub fn classify(handle: &str) -> Result<Handle> {
    let handle = handle.trim();
    if handle.is_empty() {
        return Err(AlbumError::Validation("empty solution handle".to_string()));
    }
    if is_url(handle) {
        return Ok(Handle::Url(handle.to_string()));
    }
    let as_path = Path::new(handle);
    if as_path.exists() {
        return Ok(Handle::Path(as_path.to_path_buf()));
    }
    if let Some(caps) = doi_regex()?.captures(handle) {
        return Ok(Handle::Doi(format!("{}/{}", &caps[1], &caps[2])));
    }
    if handle.contains(['/', '\\']) || handle.ends_with(".yml") || handle.ends_with(".yaml") {
        return Ok(Handle::Path(as_path.to_path_buf()));
    }

    let parts: Vec<&str> = handle.split(':').collect();
    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(AlbumError::Validation(format!(
            "malformed solution handle '{}'",
            handle
        )));
    }
    match parts.as_slice() {
        [g, n, v] => Ok(Handle::Coordinates {
            catalog: None,
            coordinates: Coordinates::new(g, n, v),
        }),
        [c, g, n, v] => Ok(Handle::Coordinates {
            catalog: Some(c.to_string()),
            coordinates: Coordinates::new(g, n, v),
        }),
        [_] | [_, _] => Ok(Handle::Guess(parts.iter().map(|p| p.to_string()).collect())),
        _ => Err(AlbumError::Validation(format!(
            "malformed solution handle '{}': too many ':' separated parts",
            handle
        ))),
    }
}

/// Resolves handles against the collection.
pub struct Resolver<'a> {
    config: &'a AlbumConfig,
    collection: &'a CollectionIndex,
    source: &'a dyn CatalogSource,
    loader: &'a dyn SolutionLoader,
    downloader: &'a dyn Downloader,
}

impl<'a> Resolver<'a> {
    pub fn new(
        config: &'a AlbumConfig,
        collection: &'a CollectionIndex,
        source: &'a dyn CatalogSource,
        loader: &'a dyn SolutionLoader,
        downloader: &'a dyn Downloader,
    ) -> Self {
        Self {
            config,
            collection,
            source,
            loader,
            downloader,
        }
    }

    /// Resolve a handle to its catalog, coordinates, and package path.
    pub fn resolve(&self, handle: &str) -> Result<ResolveResult> {
        debug!("resolving '{}'", handle);
        match classify(handle)? {
            Handle::Path(path) => self.resolve_path(&path),
            Handle::Url(url) => self.resolve_url(&url),
            Handle::Doi(doi) => self.resolve_doi(&doi),
            Handle::Coordinates {
                catalog,
                coordinates,
            } => self.resolve_coordinates(catalog.as_deref(), &coordinates, true),
            Handle::Guess(parts) => self.guess(handle, &parts),
        }
    }

    /// Like [`resolve`](Self::resolve), but the solution must be installed.
    pub fn resolve_installed(&self, handle: &str) -> Result<ResolveResult> {
        let result = self.resolve(handle)?;
        if !result.is_installed() {
            return Err(AlbumError::NotInstalled(result.coordinates.to_string()));
        }
        Ok(result)
    }

    /// Resolve and load the descriptor found at the resolved path.
    pub fn resolve_and_load(&self, handle: &str) -> Result<ResolveResult> {
        let result = self.resolve(handle)?;
        self.load(result)
    }

    pub fn resolve_installed_and_load(&self, handle: &str) -> Result<ResolveResult> {
        let result = self.resolve_installed(handle)?;
        self.load(result)
    }

    fn load(&self, mut result: ResolveResult) -> Result<ResolveResult> {
        let loaded = self.loader.load(&result.path)?;
        if loaded.coordinates() != result.coordinates {
            return Err(AlbumError::Validation(format!(
                "{} contains {} instead of {}",
                result.path.display(),
                loaded.coordinates(),
                result.coordinates
            )));
        }
        result.loaded = Some(loaded);
        Ok(result)
    }

    fn catalogs(&self) -> CatalogManager<'_> {
        CatalogManager::new(self.config, self.collection, self.source)
    }

    fn resolve_path(&self, path: &Path) -> Result<ResolveResult> {
        if !path.exists() {
            return Err(AlbumError::NotFound(format!("path {}", path.display())));
        }
        let canonical = path.canonicalize().map_err(|e| AlbumError::io(path, e))?;
        let staging = self.staging_dir("path", &canonical.to_string_lossy());
        if canonical.is_dir() {
            fsops::replace_dir(&canonical, &staging)?;
        } else {
            fsops::remove_dir(&staging)?;
            std::fs::create_dir_all(&staging).map_err(|e| AlbumError::io(&staging, e))?;
            std::fs::copy(&canonical, staging.join(DESCRIPTOR_FILE))
                .map_err(|e| AlbumError::io(&canonical, e))?;
        }
        self.materialize(&staging)
    }

    fn resolve_url(&self, url: &str) -> Result<ResolveResult> {
        let staging = self.staging_dir("url", url);
        fsops::remove_dir(&staging)?;
        self.downloader
            .download(url, &staging.join(DESCRIPTOR_FILE))?;
        self.materialize(&staging)
    }

    fn resolve_doi(&self, doi: &str) -> Result<ResolveResult> {
        let matches = self.collection.get_solutions_by_doi(doi)?;
        if matches.is_empty() {
            debug!("doi {} not in collection, downloading", doi);
            return self.resolve_url(&doi_url(doi));
        }
        let (entry, _) = self.pick(doi, matches, false)?;
        self.result_for(entry)
    }

    fn resolve_coordinates(
        &self,
        catalog: Option<&str>,
        coords: &Coordinates,
        allow_refresh: bool,
    ) -> Result<ResolveResult> {
        let found = match catalog {
            Some(name) => {
                let record = self
                    .collection
                    .get_catalog_by_name(name)?
                    .ok_or_else(|| AlbumError::NotFound(format!("catalog '{}'", name)))?;
                self.collection
                    .get_solution(record.catalog_id, coords)?
                    .map(|e| (record, e))
            }
            None => {
                let mut hit = None;
                for record in self.priority_order()? {
                    if let Some(entry) = self.collection.get_solution(record.catalog_id, coords)? {
                        hit = Some((record, entry));
                        break;
                    }
                }
                hit
            }
        };

        match found {
            Some((record, entry)) => Ok(self.result_with(record, entry)),
            None if allow_refresh && self.config.refresh_on_miss => {
                debug!("{} not found, refreshing catalogs", coords);
                Synchronizer::new(self.config, self.collection, self.source).upgrade(None, false)?;
                self.resolve_coordinates(catalog, coords, false)
            }
            None => Err(AlbumError::NotFound(match catalog {
                Some(name) => format!("{} in catalog '{}'", coords, name),
                None => coords.to_string(),
            })),
        }
    }

    fn guess(&self, handle: &str, parts: &[String]) -> Result<ResolveResult> {
        let matches = match parts {
            [name] => self.collection.get_solutions_by_name(name)?,
            [a, b] => {
                let by_name_version = self.collection.get_solutions_by_name_version(a, b)?;
                if by_name_version.is_empty() {
                    self.collection.get_solutions_by_group_name(a, b)?
                } else {
                    by_name_version
                }
            }
            _ => {
                return Err(AlbumError::Validation(format!(
                    "malformed solution handle '{}'",
                    handle
                )))
            }
        };
        let (entry, _) = self.pick(handle, matches, true)?;
        self.result_for(entry)
    }

    /// Narrow matches to one entry, preferring the cache catalog. A `loose`
    /// handle (a bare name or `name:version`) always warns; a DOI warns only
    /// when the cache catalog broke a tie. Returns whether it warned.
    fn pick(
        &self,
        handle: &str,
        mut matches: Vec<CollectionEntry>,
        loose: bool,
    ) -> Result<(CollectionEntry, bool)> {
        if matches.len() > 1 {
            let cache_id = self.cache_catalog_id()?;
            let in_cache: Vec<usize> = matches
                .iter()
                .enumerate()
                .filter(|(_, e)| Some(e.catalog_id) == cache_id)
                .map(|(i, _)| i)
                .collect();
            if let [only] = in_cache.as_slice() {
                let entry = matches.swap_remove(*only);
                warn!(
                    "'{}' matched several solutions, using {} from the cache catalog; \
                     this is not fully reproducible, use the full coordinates",
                    handle,
                    entry.coordinates()
                );
                return Ok((entry, true));
            }
            let mut candidates = Vec::new();
            for e in &matches {
                let catalog = self
                    .collection
                    .get_catalog(e.catalog_id)?
                    .map(|c| c.name)
                    .unwrap_or_else(|| e.catalog_id.to_string());
                candidates.push(format!("{}:{}", catalog, e.coordinates()));
            }
            return Err(AlbumError::Ambiguous {
                handle: handle.to_string(),
                candidates,
            });
        }
        let entry = matches
            .pop()
            .ok_or_else(|| AlbumError::NotFound(format!("solution '{}'", handle)))?;
        if loose {
            warn!(
                "'{}' resolved to {}; this is not fully reproducible, use the full coordinates",
                handle,
                entry.coordinates()
            );
        }
        Ok((entry, loose))
    }

    fn cache_catalog_id(&self) -> Result<Option<i64>> {
        match self.collection.get_cache_catalog() {
            Ok(c) => Ok(Some(c.catalog_id)),
            Err(AlbumError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Cache catalog first, then the rest in catalog id order.
    fn priority_order(&self) -> Result<Vec<CatalogRecord>> {
        let (mut ordered, rest): (Vec<_>, Vec<_>) = self
            .collection
            .list_catalogs()?
            .into_iter()
            .partition(|c| c.is_cache);
        ordered.extend(rest);
        Ok(ordered)
    }

    fn staging_dir(&self, kind: &str, key: &str) -> PathBuf {
        self.config
            .tmp_dir()
            .join(format!("{}-{}", kind, hasher::short_digest(key)))
    }

    fn materialize(&self, package_dir: &Path) -> Result<ResolveResult> {
        let loaded = self.loader.load(package_dir)?;
        let entry = self
            .catalogs()
            .add_to_cache_catalog(&loaded.descriptor.metadata, package_dir)?;
        self.result_for(entry)
    }

    fn result_for(&self, entry: CollectionEntry) -> Result<ResolveResult> {
        let record = self.collection.get_catalog(entry.catalog_id)?.ok_or_else(|| {
            AlbumError::StorageCorruption(format!(
                "{} points at missing catalog id {}",
                entry.coordinates(),
                entry.catalog_id
            ))
        })?;
        Ok(self.result_with(record, entry))
    }

    fn result_with(&self, catalog: CatalogRecord, entry: CollectionEntry) -> ResolveResult {
        let coordinates = entry.coordinates();
        let path = if entry.is_installed() {
            self.config.installation_dir(&catalog.name, &coordinates)
        } else {
            solution_dir(&catalog.path, &coordinates)
        };
        ResolveResult {
            path,
            catalog,
            entry: Some(entry),
            coordinates,
            loaded: None,
        }
    }
}
