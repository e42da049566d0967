//! AL-032: Catalog synchronization. Diff a fresh catalog snapshot against
//! the collection and apply the changes.
//!
//! Change detection compares content hashes. A `CHANGED` entry keeps the
//! prior install snapshot so applying it never clears install state.

use super::source::CatalogSource;
use super::{solution_dir, CATALOG_INDEX_FILE};
use crate::core::config::AlbumConfig;
use crate::core::error::{AlbumError, Result};
use crate::core::fsops;
use crate::core::parser::DESCRIPTOR_FILE;
use crate::core::types::{
    CatalogRecord, ChangeType, CollectionEntry, Coordinates, InstallState, ProvenanceEvent,
    SolutionChange, SolutionMetadata,
};
use crate::provenance::{eventlog, hasher};
use crate::store::catalog_index::CatalogIndex;
use crate::store::collection_index::CollectionIndex;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Compute the changes that turn `current` into `fresh`, sorted by coordinates.
/// Repeated coordinates on either side are a corruption error.
pub fn diff(fresh: &[SolutionMetadata], current: &[CollectionEntry]) -> Result<Vec<SolutionChange>> {
    let current_len = current.len();
    let current: HashMap<Coordinates, &CollectionEntry> =
        current.iter().map(|e| (e.coordinates(), e)).collect();
    if current.len() != current_len {
        return Err(AlbumError::StorageCorruption(format!(
            "collection holds {} duplicate solution row(s) for one catalog",
            current_len - current.len()
        )));
    }
    let fresh_map: HashMap<Coordinates, &SolutionMetadata> =
        fresh.iter().map(|m| (m.coordinates(), m)).collect();
    if fresh_map.len() != fresh.len() {
        return Err(AlbumError::StorageCorruption(format!(
            "catalog index holds {} duplicate solution row(s)",
            fresh.len() - fresh_map.len()
        )));
    }

    let mut changes = Vec::new();
    for (coords, meta) in &fresh_map {
        match current.get(coords) {
            None => changes.push(SolutionChange {
                coordinates: coords.clone(),
                change_type: ChangeType::Added,
                change_log: meta.changelog.clone(),
                prior: None,
                metadata: Some((*meta).clone()),
            }),
            Some(entry) if entry.metadata.hash != meta.hash => changes.push(SolutionChange {
                coordinates: coords.clone(),
                change_type: ChangeType::Changed,
                change_log: meta.changelog.clone(),
                prior: Some(entry.state.clone()),
                metadata: Some((*meta).clone()),
            }),
            Some(_) => {}
        }
    }
    for (coords, entry) in &current {
        if !fresh_map.contains_key(coords) {
            changes.push(SolutionChange {
                coordinates: coords.clone(),
                change_type: ChangeType::Removed,
                change_log: None,
                prior: Some(entry.state.clone()),
                metadata: None,
            });
        }
    }
    changes.sort_by(|a, b| {
        a.coordinates
            .cmp(&b.coordinates)
            .then(a.change_type.cmp(&b.change_type))
    });
    Ok(changes)
}

/// Per-catalog change sets, keyed by catalog name.
pub type ChangeSets = BTreeMap<String, Vec<SolutionChange>>;

/// Refreshes catalogs and keeps their collection rows in step.
pub struct Synchronizer<'a> {
    config: &'a AlbumConfig,
    collection: &'a CollectionIndex,
    source: &'a dyn CatalogSource,
}

impl<'a> Synchronizer<'a> {
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

    /// Pull a fresh snapshot over the local copy. Returns `false` when the
    /// catalog was skipped (cache catalog, or source unreachable).
    pub fn refresh(&self, catalog: &CatalogRecord) -> Result<bool> {
        let Some(src) = catalog.src.as_deref().filter(|_| !catalog.is_cache) else {
            return Ok(false);
        };
        let staging = self
            .config
            .tmp_dir()
            .join(format!("refresh-{}", hasher::short_digest(src)));
        match self
            .source
            .fetch_index(src, catalog.branch.as_deref(), &staging)
        {
            Ok(meta) => {
                fsops::move_dir(&staging, &catalog.path)?;
                self.collection
                    .set_catalog_version(catalog.catalog_id, &meta.version)?;
                Ok(true)
            }
            Err(e) if e.is_recoverable() => {
                warn!("skipping catalog {}: {}", catalog.name, e);
                fsops::remove_dir(&staging)?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Diff the local copy of `catalog` against its collection rows.
    pub fn diff_catalog(&self, catalog: &CatalogRecord) -> Result<Vec<SolutionChange>> {
        if catalog.is_cache {
            return Ok(Vec::new());
        }
        let index = CatalogIndex::open(&catalog.path.join(CATALOG_INDEX_FILE))?;
        let fresh = index.list_all()?;
        let current = self.collection.list_by_catalog(catalog.catalog_id)?;
        diff(&fresh, &current)
    }

    /// Apply `changes` to the rows of `catalog`.
    pub fn apply(&self, catalog: &CatalogRecord, changes: &[SolutionChange]) -> Result<()> {
        let (mut added, mut removed, mut changed) = (0u32, 0u32, 0u32);
        for change in changes {
            match change.change_type {
                ChangeType::Added => {
                    let meta = fresh_metadata(change)?;
                    self.collection.add_solution(
                        catalog.catalog_id,
                        meta,
                        &InstallState::default(),
                    )?;
                    added += 1;
                }
                ChangeType::Removed => {
                    if change.prior.as_ref().is_some_and(|s| s.installed) {
                        warn!(
                            "{} was removed from catalog {} but stays installed at {}",
                            change.coordinates,
                            catalog.name,
                            self.config
                                .installation_dir(&catalog.name, &change.coordinates)
                                .display()
                        );
                    }
                    self.collection
                        .remove_solution(catalog.catalog_id, &change.coordinates)?;
                    removed += 1;
                }
                ChangeType::Changed => {
                    let meta = fresh_metadata(change)?;
                    let prior = change.prior.clone().unwrap_or_default();
                    self.collection
                        .update_solution(catalog.catalog_id, meta, &prior)?;
                    if prior.installed && !catalog.is_cache {
                        self.refresh_installed_descriptor(catalog, &change.coordinates)?;
                        warn!(
                            "{} changed in catalog {}; a reinstall may be needed",
                            change.coordinates, catalog.name
                        );
                    }
                    changed += 1;
                }
            }
        }
        if !changes.is_empty() {
            info!(
                "catalog {}: {} added, {} removed, {} changed",
                catalog.name, added, removed, changed
            );
        }
        eventlog::record(
            &self.config.base_dir,
            ProvenanceEvent::CatalogUpdated {
                catalog: catalog.name.clone(),
                added,
                removed,
                changed,
            },
        );
        Ok(())
    }

    /// Refresh and diff every catalog, or only `name`.
    pub fn update(&self, name: Option<&str>) -> Result<ChangeSets> {
        let mut sets = ChangeSets::new();
        for catalog in self.select(name)? {
            let changes = if self.refresh(&catalog)? {
                self.diff_catalog(&catalog)?
            } else {
                Vec::new()
            };
            sets.insert(catalog.name.clone(), changes);
        }
        Ok(sets)
    }

    /// [`update`](Self::update), then apply unless `dry_run`.
    pub fn upgrade(&self, name: Option<&str>, dry_run: bool) -> Result<ChangeSets> {
        let sets = self.update(name)?;
        if dry_run {
            return Ok(sets);
        }
        for catalog in self.select(name)? {
            if let Some(changes) = sets.get(&catalog.name) {
                if !catalog.is_cache {
                    self.apply(&catalog, changes)?;
                }
            }
        }
        Ok(sets)
    }

    fn select(&self, name: Option<&str>) -> Result<Vec<CatalogRecord>> {
        match name {
            None => self.collection.list_catalogs(),
            Some(n) => Ok(vec![self
                .collection
                .get_catalog_by_name(n)?
                .ok_or_else(|| AlbumError::NotFound(format!("catalog '{}'", n)))?]),
        }
    }

    fn refresh_installed_descriptor(&self, catalog: &CatalogRecord, coords: &Coordinates) -> Result<()> {
        let from = solution_dir(&catalog.path, coords).join(DESCRIPTOR_FILE);
        let install_dir = self.config.installation_dir(&catalog.name, coords);
        if !from.is_file() || !install_dir.is_dir() {
            return Ok(());
        }
        let to = install_dir.join(DESCRIPTOR_FILE);
        std::fs::copy(&from, &to).map_err(|e| AlbumError::io(&from, e))?;
        Ok(())
    }
}

fn fresh_metadata(change: &SolutionChange) -> Result<&SolutionMetadata> {
    change.metadata.as_ref().ok_or_else(|| {
        AlbumError::Validation(format!(
            "{} change for {} carries no metadata",
            change.change_type, change.coordinates
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::super::source::DirSource;
    use super::super::testutil::*;
    use super::super::CatalogManager;
    use super::*;
    use crate::core::parser::DescriptorLoader;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn meta(name: &str, hash: &str) -> SolutionMetadata {
        SolutionMetadata {
            group: "g".to_string(),
            name: name.to_string(),
            version: "1".to_string(),
            hash: hash.to_string(),
            ..SolutionMetadata::default()
        }
    }

    fn entry(name: &str, hash: &str, installed: bool) -> CollectionEntry {
        CollectionEntry {
            collection_id: 1,
            catalog_id: 1,
            metadata: meta(name, hash),
            state: InstallState {
                installed,
                install_date: installed.then(|| "2026-01-01T00:00:00Z".to_string()),
                ..InstallState::default()
            },
        }
    }

    #[test]
    fn test_al032_diff_classifies() {
        let fresh = vec![meta("a", "h1"), meta("b", "h2-new"), meta("d", "h4")];
        let current = vec![entry("a", "h1", false), entry("b", "h2", true), entry("c", "h3", false)];
        let changes = diff(&fresh, &current).unwrap();
        let kinds: Vec<_> = changes
            .iter()
            .map(|c| (c.coordinates.name.as_str(), c.change_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("b", ChangeType::Changed),
                ("c", ChangeType::Removed),
                ("d", ChangeType::Added)
            ]
        );
        let changed = &changes[0];
        assert!(changed.prior.as_ref().unwrap().installed);
        assert_eq!(changed.metadata.as_ref().unwrap().hash, "h2-new");
    }

    #[test]
    fn test_al032_diff_identical_is_empty() {
        let fresh = vec![meta("a", "h1")];
        let current = vec![entry("a", "h1", true)];
        assert!(diff(&fresh, &current).unwrap().is_empty());
    }

    #[test]
    fn test_al032_diff_rejects_duplicate_rows() {
        let fresh = vec![meta("a", "h1")];
        let current = vec![entry("a", "h1", true), entry("a", "h2", false)];
        assert!(matches!(
            diff(&fresh, &current),
            Err(AlbumError::StorageCorruption(_))
        ));

        let fresh = vec![meta("a", "h1"), meta("a", "h1")];
        assert!(matches!(
            diff(&fresh, &[]),
            Err(AlbumError::StorageCorruption(_))
        ));
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        config: AlbumConfig,
        collection: CollectionIndex,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let config = AlbumConfig::new(&root.join("base"));
        config.ensure_layout().unwrap();
        let collection = CollectionIndex::open(&config.collection_db()).unwrap();
        Fixture {
            _dir: dir,
            root,
            config,
            collection,
        }
    }

    fn coords_of(collection: &CollectionIndex, catalog_id: i64) -> BTreeSet<Coordinates> {
        collection
            .list_by_catalog(catalog_id)
            .unwrap()
            .iter()
            .map(CollectionEntry::coordinates)
            .collect()
    }

    #[test]
    fn test_al032_apply_converges_to_snapshot() {
        let f = fixture();
        let src = source_catalog(&f.root, "remote", &[("g", "a", "1"), ("g", "b", "1")]);
        let mgr = CatalogManager::new(&f.config, &f.collection, &DirSource);
        let record = mgr.add_catalog(&src.path.to_string_lossy(), None).unwrap();

        // the source drops b and gains c
        src.unpublish(&Coordinates::new("g", "b", "1")).unwrap();
        let pkg = write_package(&f.root.join("more"), "g", "c", "1", "");
        src.publish(&pkg, &DescriptorLoader).unwrap();

        let sync = Synchronizer::new(&f.config, &f.collection, &DirSource);
        let sets = sync.upgrade(Some("remote"), false).unwrap();
        assert_eq!(sets["remote"].len(), 2);

        let expected: BTreeSet<_> = src
            .index()
            .list_all()
            .unwrap()
            .iter()
            .map(SolutionMetadata::coordinates)
            .collect();
        assert_eq!(coords_of(&f.collection, record.catalog_id), expected);

        // removed coordinates do not come back on a second pass
        let again = sync.upgrade(None, false).unwrap();
        assert!(again["remote"].is_empty());
        assert!(!coords_of(&f.collection, record.catalog_id)
            .contains(&Coordinates::new("g", "b", "1")));
    }

    #[test]
    fn test_al032_changed_preserves_install_state() {
        let f = fixture();
        let src = source_catalog(&f.root, "remote", &[("g", "a", "1")]);
        let mgr = CatalogManager::new(&f.config, &f.collection, &DirSource);
        let record = mgr.add_catalog(&src.path.to_string_lossy(), None).unwrap();
        let coords = Coordinates::new("g", "a", "1");
        f.collection
            .set_installed(record.catalog_id, &coords, "2026-03-01T00:00:00Z")
            .unwrap();
        let install_dir = f.config.installation_dir("remote", &coords);
        std::fs::create_dir_all(&install_dir).unwrap();

        let pkg = write_package(&f.root.join("v2"), "g", "a", "1", "title: Updated\n");
        src.publish(&pkg, &DescriptorLoader).unwrap();

        let sync = Synchronizer::new(&f.config, &f.collection, &DirSource);
        let sets = sync.upgrade(Some("remote"), false).unwrap();
        assert_eq!(sets["remote"][0].change_type, ChangeType::Changed);

        let e = f.collection.get_solution(record.catalog_id, &coords).unwrap().unwrap();
        assert!(e.state.installed);
        assert_eq!(e.state.install_date.as_deref(), Some("2026-03-01T00:00:00Z"));
        assert_eq!(e.metadata.title.as_deref(), Some("Updated"));
        let copied = std::fs::read_to_string(install_dir.join(DESCRIPTOR_FILE)).unwrap();
        assert!(copied.contains("Updated"));
    }

    #[test]
    fn test_al032_dry_run_applies_nothing() {
        let f = fixture();
        let src = source_catalog(&f.root, "remote", &[("g", "a", "1")]);
        let mgr = CatalogManager::new(&f.config, &f.collection, &DirSource);
        let record = mgr.add_catalog(&src.path.to_string_lossy(), None).unwrap();
        src.unpublish(&Coordinates::new("g", "a", "1")).unwrap();

        let sync = Synchronizer::new(&f.config, &f.collection, &DirSource);
        let sets = sync.upgrade(None, true).unwrap();
        assert_eq!(sets["remote"][0].change_type, ChangeType::Removed);
        assert_eq!(coords_of(&f.collection, record.catalog_id).len(), 1);
    }

    #[test]
    fn test_al032_unreachable_catalog_is_skipped() {
        let f = fixture();
        let gone = source_catalog(&f.root, "gone", &[("g", "a", "1")]);
        let ok = source_catalog(&f.root, "ok", &[("g", "b", "1")]);
        let mgr = CatalogManager::new(&f.config, &f.collection, &DirSource);
        mgr.add_catalog(&gone.path.to_string_lossy(), None).unwrap();
        let ok_record = mgr.add_catalog(&ok.path.to_string_lossy(), None).unwrap();

        fsops::remove_dir(&gone.path).unwrap();
        ok.unpublish(&Coordinates::new("g", "b", "1")).unwrap();

        let sync = Synchronizer::new(&f.config, &f.collection, &DirSource);
        let sets = sync.upgrade(None, false).unwrap();
        assert!(sets["gone"].is_empty());
        assert_eq!(sets["ok"].len(), 1);
        assert!(coords_of(&f.collection, ok_record.catalog_id).is_empty());
    }

    #[test]
    fn test_al032_cache_catalog_never_refreshed() {
        let f = fixture();
        let mgr = CatalogManager::new(&f.config, &f.collection, &DirSource);
        let cache = mgr.ensure_cache_catalog().unwrap();
        let sync = Synchronizer::new(&f.config, &f.collection, &DirSource);
        assert!(!sync.refresh(&cache).unwrap());
        assert!(sync.diff_catalog(&cache).unwrap().is_empty());
        assert!(matches!(
            sync.update(Some("nope")),
            Err(AlbumError::NotFound(_))
        ));
    }

    #[test]
    fn test_al032_apply_records_event() {
        let f = fixture();
        let src = source_catalog(&f.root, "remote", &[("g", "a", "1")]);
        let mgr = CatalogManager::new(&f.config, &f.collection, &DirSource);
        mgr.add_catalog(&src.path.to_string_lossy(), None).unwrap();
        let events = eventlog::read_events(&f.config.base_dir).unwrap();
        assert!(events.iter().any(|e| matches!(
            e.event,
            ProvenanceEvent::CatalogUpdated { added: 1, .. }
        )));
    }
}
