//! AL-023: Collection index. Every catalog and every known solution with
//! its install state (`album_collection.db`).
//!
//! Rows of non-cache catalogs are written by the synchronizer; the cache
//! catalog's rows are written by direct local installs. Lookups by full key
//! fail with [`AlbumError::StorageCorruption`] when more than one row matches.

use super::tables::{self, SideTables, METADATA_COLUMNS, METADATA_COLUMN_COUNT, METADATA_COLUMN_DEFS};
use super::{at_most_one, Store};
use crate::core::error::{AlbumError, Result};
use crate::core::types::{CatalogRecord, CollectionEntry, Coordinates, InstallState, SolutionMetadata};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};

const SIDE: SideTables = SideTables {
    prefix: "collection",
    owner_table: "collection",
    owner_key: "collection_id",
};

const CATALOG_COLUMNS: &str =
    "catalog_id, name, src, path, branch, type, is_cache, deletable, version";

fn schema() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS catalog (\n\
             catalog_id INTEGER PRIMARY KEY AUTOINCREMENT,\n\
             name TEXT NOT NULL UNIQUE,\n\
             src TEXT,\n\
             path TEXT NOT NULL,\n\
             branch TEXT,\n\
             type TEXT NOT NULL,\n\
             is_cache INTEGER NOT NULL DEFAULT 0,\n\
             deletable INTEGER NOT NULL DEFAULT 1,\n\
             version TEXT\n\
         );\n\
         CREATE TABLE IF NOT EXISTS collection (\n\
             collection_id INTEGER PRIMARY KEY AUTOINCREMENT,\n\
             catalog_id INTEGER NOT NULL REFERENCES catalog(catalog_id) ON DELETE CASCADE,\n\
             {},\n\
             installed INTEGER NOT NULL DEFAULT 0,\n\
             installation_unfinished INTEGER NOT NULL DEFAULT 0,\n\
             install_date TEXT,\n\
             last_execution TEXT,\n\
             parent_id INTEGER REFERENCES collection(collection_id) ON DELETE SET NULL\n\
         );\n\
         CREATE INDEX IF NOT EXISTS collection_key ON collection(catalog_id, \"group\", name, version);\n\
         CREATE INDEX IF NOT EXISTS collection_doi ON collection(doi);\n\
         CREATE INDEX IF NOT EXISTS collection_parent ON collection(parent_id);\n\
         {}",
        METADATA_COLUMN_DEFS,
        SIDE.schema()
    )
}

/// A catalog about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCatalog {
    pub name: String,
    pub src: Option<String>,
    pub path: PathBuf,
    pub branch: Option<String>,
    pub catalog_type: String,
    pub is_cache: bool,
    pub deletable: bool,
    pub version: Option<String>,
}

/// Cross-catalog store of solutions and install state.
#[derive(Debug, Clone)]
pub struct CollectionIndex {
    store: Store,
}

impl CollectionIndex {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            store: Store::open(path, &schema())?,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    // ------------------------------------------------------------------
    // Catalogs
    // ------------------------------------------------------------------

    /// Insert a catalog. A second cache catalog is rejected.
    pub fn insert_catalog(&self, new: &NewCatalog) -> Result<CatalogRecord> {
        let id = self.store.with_tx(|tx| {
            if new.is_cache {
                let caches: i64 =
                    tx.query_row("SELECT COUNT(*) FROM catalog WHERE is_cache = 1", [], |r| {
                        r.get(0)
                    })?;
                if caches > 0 {
                    return Err(AlbumError::Validation(format!(
                        "cannot add '{}': a cache catalog already exists",
                        new.name
                    )));
                }
            }
            let taken: i64 = tx.query_row(
                "SELECT COUNT(*) FROM catalog WHERE name = ?1",
                params![new.name],
                |r| r.get(0),
            )?;
            if taken > 0 {
                return Err(AlbumError::Validation(format!(
                    "catalog '{}' already exists",
                    new.name
                )));
            }
            tx.execute(
                "INSERT INTO catalog (name, src, path, branch, type, is_cache, deletable, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.name,
                    new.src,
                    new.path.to_string_lossy(),
                    new.branch,
                    new.catalog_type,
                    new.is_cache,
                    new.deletable,
                    new.version
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;
        self.get_catalog(id)?
            .ok_or_else(|| AlbumError::NotFound(format!("catalog id {}", id)))
    }

    pub fn get_catalog(&self, catalog_id: i64) -> Result<Option<CatalogRecord>> {
        let conn = self.store.connection()?;
        let rows = query_catalogs(&conn, "WHERE catalog_id = ?1", params![catalog_id])?;
        at_most_one(rows, || format!("catalog id {}", catalog_id))
    }

    pub fn get_catalog_by_name(&self, name: &str) -> Result<Option<CatalogRecord>> {
        let conn = self.store.connection()?;
        let rows = query_catalogs(&conn, "WHERE name = ?1", params![name])?;
        at_most_one(rows, || format!("catalog '{}'", name))
    }

    pub fn get_catalog_by_src(&self, src: &str) -> Result<Option<CatalogRecord>> {
        let conn = self.store.connection()?;
        let rows = query_catalogs(&conn, "WHERE src = ?1", params![src])?;
        at_most_one(rows, || format!("catalog src '{}'", src))
    }

    /// All catalogs in priority (insertion) order.
    pub fn list_catalogs(&self) -> Result<Vec<CatalogRecord>> {
        let conn = self.store.connection()?;
        query_catalogs(&conn, "", [])
    }

    /// The single writable catalog.
    pub fn get_cache_catalog(&self) -> Result<CatalogRecord> {
        let conn = self.store.connection()?;
        let rows = query_catalogs(&conn, "WHERE is_cache = 1", [])?;
        at_most_one(rows, || "cache catalog".to_string())?
            .ok_or_else(|| AlbumError::NotFound("cache catalog".to_string()))
    }

    pub fn set_catalog_version(&self, catalog_id: i64, version: &str) -> Result<()> {
        self.store.with_tx(|tx| {
            tx.execute(
                "UPDATE catalog SET version = ?1 WHERE catalog_id = ?2",
                params![version, catalog_id],
            )?;
            Ok(())
        })
    }

    /// Delete a catalog and, by cascade, all its collection rows.
    pub fn remove_catalog(&self, catalog_id: i64) -> Result<bool> {
        self.store.with_tx(|tx| {
            let n = tx.execute(
                "DELETE FROM catalog WHERE catalog_id = ?1",
                params![catalog_id],
            )?;
            Ok(n > 0)
        })
    }

    // ------------------------------------------------------------------
    // Solutions
    // ------------------------------------------------------------------

    /// Insert a solution under `catalog_id`, replacing a row with the same key.
    pub fn add_solution(
        &self,
        catalog_id: i64,
        meta: &SolutionMetadata,
        state: &InstallState,
    ) -> Result<i64> {
        self.store.with_tx(|tx| {
            tx.execute(
                r#"DELETE FROM collection WHERE catalog_id = ?1 AND "group" = ?2 AND name = ?3 AND version = ?4"#,
                params![catalog_id, meta.group, meta.name, meta.version],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO collection (catalog_id, {}, installed, installation_unfinished, \
                     install_date, last_execution, parent_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                    METADATA_COLUMNS
                ),
                params![
                    catalog_id,
                    meta.group,
                    meta.name,
                    meta.version,
                    meta.title,
                    meta.description,
                    meta.doi,
                    meta.license,
                    meta.changelog,
                    meta.acknowledgement,
                    meta.timestamp,
                    meta.album_api_version,
                    meta.hash,
                    state.installed,
                    state.installation_unfinished,
                    state.install_date,
                    state.last_execution,
                    state.parent_id
                ],
            )?;
            let id = tx.last_insert_rowid();
            SIDE.write(tx, id, meta)?;
            Ok(id)
        })
    }

    /// Rewrite metadata and state of an existing row in place, keeping its id.
    pub fn update_solution(
        &self,
        catalog_id: i64,
        meta: &SolutionMetadata,
        state: &InstallState,
    ) -> Result<()> {
        let coords = meta.coordinates();
        self.store.with_tx(|tx| {
            let id = require_id(tx, catalog_id, &coords)?;
            tx.execute(
                "UPDATE collection SET title = ?1, description = ?2, doi = ?3, license = ?4, \
                 changelog = ?5, acknowledgement = ?6, timestamp = ?7, album_api_version = ?8, \
                 hash = ?9, installed = ?10, installation_unfinished = ?11, install_date = ?12, \
                 last_execution = ?13, parent_id = ?14 WHERE collection_id = ?15",
                params![
                    meta.title,
                    meta.description,
                    meta.doi,
                    meta.license,
                    meta.changelog,
                    meta.acknowledgement,
                    meta.timestamp,
                    meta.album_api_version,
                    meta.hash,
                    state.installed,
                    state.installation_unfinished,
                    state.install_date,
                    state.last_execution,
                    state.parent_id,
                    id
                ],
            )?;
            SIDE.clear(tx, id)?;
            SIDE.write(tx, id, meta)?;
            Ok(())
        })
    }

    /// Lookup by full key. Unknown catalog ids yield `None`.
    pub fn get_solution(
        &self,
        catalog_id: i64,
        coords: &Coordinates,
    ) -> Result<Option<CollectionEntry>> {
        let conn = self.store.connection()?;
        let rows = query_entries(
            &conn,
            r#"WHERE catalog_id = ?1 AND "group" = ?2 AND name = ?3 AND version = ?4"#,
            params![catalog_id, coords.group, coords.name, coords.version],
        )?;
        at_most_one(rows, || format!("catalog {} / {}", catalog_id, coords))
    }

    pub fn get_solution_by_id(&self, collection_id: i64) -> Result<Option<CollectionEntry>> {
        let conn = self.store.connection()?;
        let rows = query_entries(&conn, "WHERE collection_id = ?1", params![collection_id])?;
        at_most_one(rows, || format!("collection id {}", collection_id))
    }

    /// Every catalog's row for `coords`, in catalog priority order.
    pub fn get_solutions_by_coordinates(&self, coords: &Coordinates) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(
            &conn,
            r#"WHERE "group" = ?1 AND name = ?2 AND version = ?3"#,
            params![coords.group, coords.name, coords.version],
        )
    }

    pub fn get_solutions_by_doi(&self, doi: &str) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(&conn, "WHERE doi = ?1", params![doi])
    }

    pub fn get_solutions_by_hash(&self, hash: &str) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(&conn, "WHERE hash = ?1", params![hash])
    }

    pub fn get_solutions_by_name(&self, name: &str) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(&conn, "WHERE name = ?1", params![name])
    }

    pub fn get_solutions_by_name_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(
            &conn,
            "WHERE name = ?1 AND version = ?2",
            params![name, version],
        )
    }

    pub fn get_solutions_by_group_name(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(
            &conn,
            r#"WHERE "group" = ?1 AND name = ?2"#,
            params![group, name],
        )
    }

    pub fn list_by_catalog(&self, catalog_id: i64) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(&conn, "WHERE catalog_id = ?1", params![catalog_id])
    }

    pub fn list_all(&self) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(&conn, "", [])
    }

    pub fn list_installed(&self) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(
            &conn,
            "WHERE installed = 1 AND installation_unfinished = 0",
            [],
        )
    }

    /// Entries whose parent link points at `collection_id`.
    pub fn children_of(&self, collection_id: i64) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        query_entries(&conn, "WHERE parent_id = ?1", params![collection_id])
    }

    /// Case-insensitive substring search over name, title, description, and tags.
    pub fn search(&self, keyword: &str) -> Result<Vec<CollectionEntry>> {
        let conn = self.store.connection()?;
        let pattern = format!("%{}%", keyword.to_lowercase());
        query_entries(
            &conn,
            "WHERE lower(name) LIKE ?1 OR lower(coalesce(title, '')) LIKE ?1 \
             OR lower(coalesce(description, '')) LIKE ?1 \
             OR collection_id IN (SELECT owner_id FROM collection_tag WHERE lower(tag) LIKE ?1)",
            params![pattern],
        )
    }

    // ------------------------------------------------------------------
    // Install state
    // ------------------------------------------------------------------

    /// Mark installed and finished, stamping `install_date`.
    pub fn set_installed(&self, catalog_id: i64, coords: &Coordinates, date: &str) -> Result<()> {
        self.mutate(
            catalog_id,
            coords,
            "installed = 1, installation_unfinished = 0, install_date = ?1",
            Some(date),
        )
    }

    /// Flag an installation in progress.
    pub fn set_installation_unfinished(&self, catalog_id: i64, coords: &Coordinates) -> Result<()> {
        self.mutate(
            catalog_id,
            coords,
            "installed = 1, installation_unfinished = 1",
            None,
        )
    }

    pub fn set_uninstalled(&self, catalog_id: i64, coords: &Coordinates) -> Result<()> {
        self.mutate(
            catalog_id,
            coords,
            "installed = 0, installation_unfinished = 0, install_date = NULL, parent_id = NULL",
            None,
        )
    }

    pub fn set_last_execution(&self, catalog_id: i64, coords: &Coordinates, date: &str) -> Result<()> {
        self.mutate(catalog_id, coords, "last_execution = ?1", Some(date))
    }

    /// Link a child entry to its parent entry.
    pub fn set_parent(
        &self,
        catalog_id: i64,
        coords: &Coordinates,
        parent_collection_id: Option<i64>,
    ) -> Result<()> {
        let coords = coords.clone();
        self.store.with_tx(move |tx| {
            let id = require_id(tx, catalog_id, &coords)?;
            tx.execute(
                "UPDATE collection SET parent_id = ?1 WHERE collection_id = ?2",
                params![parent_collection_id, id],
            )?;
            Ok(())
        })
    }

    /// Physically remove a row. Returns whether it existed.
    pub fn remove_solution(&self, catalog_id: i64, coords: &Coordinates) -> Result<bool> {
        self.store.with_tx(|tx| {
            let n = tx.execute(
                r#"DELETE FROM collection WHERE catalog_id = ?1 AND "group" = ?2 AND name = ?3 AND version = ?4"#,
                params![catalog_id, coords.group, coords.name, coords.version],
            )?;
            Ok(n > 0)
        })
    }

    pub fn remove_solutions_by_catalog(&self, catalog_id: i64) -> Result<usize> {
        self.store.with_tx(|tx| {
            let n = tx.execute(
                "DELETE FROM collection WHERE catalog_id = ?1",
                params![catalog_id],
            )?;
            Ok(n)
        })
    }

    fn mutate(
        &self,
        catalog_id: i64,
        coords: &Coordinates,
        assignments: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.store.with_tx(|tx| {
            let id = require_id(tx, catalog_id, coords)?;
            match value {
                Some(v) => tx.execute(
                    &format!(
                        "UPDATE collection SET {} WHERE collection_id = ?2",
                        assignments
                    ),
                    params![v, id],
                )?,
                None => tx.execute(
                    &format!(
                        "UPDATE collection SET {} WHERE collection_id = ?1",
                        assignments
                    ),
                    params![id],
                )?,
            };
            Ok(())
        })
    }
}

fn require_id(conn: &Connection, catalog_id: i64, coords: &Coordinates) -> Result<i64> {
    let mut stmt = conn.prepare(
        r#"SELECT collection_id FROM collection WHERE catalog_id = ?1 AND "group" = ?2 AND name = ?3 AND version = ?4"#,
    )?;
    let ids = stmt
        .query_map(
            params![catalog_id, coords.group, coords.name, coords.version],
            |r| r.get::<_, i64>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    at_most_one(ids, || format!("catalog {} / {}", catalog_id, coords))?.ok_or_else(|| {
        AlbumError::NotFound(format!("{} in catalog id {}", coords, catalog_id))
    })
}

fn catalog_from_row(r: &Row<'_>) -> rusqlite::Result<CatalogRecord> {
    let path: String = r.get(3)?;
    Ok(CatalogRecord {
        catalog_id: r.get(0)?,
        name: r.get(1)?,
        src: r.get(2)?,
        path: PathBuf::from(path),
        branch: r.get(4)?,
        catalog_type: r.get(5)?,
        is_cache: r.get(6)?,
        deletable: r.get(7)?,
        version: r.get(8)?,
    })
}

fn query_catalogs(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CatalogRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM catalog {} ORDER BY catalog_id",
        CATALOG_COLUMNS, filter
    ))?;
    let rows = stmt
        .query_map(params, catalog_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn entry_from_row(r: &Row<'_>) -> rusqlite::Result<CollectionEntry> {
    let state_at = 2 + METADATA_COLUMN_COUNT;
    Ok(CollectionEntry {
        collection_id: r.get(0)?,
        catalog_id: r.get(1)?,
        metadata: tables::metadata_from_row(r, 2)?,
        state: InstallState {
            installed: r.get(state_at)?,
            installation_unfinished: r.get(state_at + 1)?,
            install_date: r.get(state_at + 2)?,
            last_execution: r.get(state_at + 3)?,
            parent_id: r.get(state_at + 4)?,
        },
    })
}

fn query_entries(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CollectionEntry>> {
    let mut stmt = conn.prepare(&format!(
        r#"SELECT collection_id, catalog_id, {}, installed, installation_unfinished,
                  install_date, last_execution, parent_id
           FROM collection {} ORDER BY catalog_id, "group", name, version"#,
        METADATA_COLUMNS, filter
    ))?;
    let mut entries = stmt
        .query_map(params, entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for entry in &mut entries {
        SIDE.read(conn, entry.collection_id, &mut entry.metadata)?;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Citation;

    fn open() -> (tempfile::TempDir, CollectionIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = CollectionIndex::open(&dir.path().join("album_collection.db")).unwrap();
        (dir, index)
    }

    fn catalog(index: &CollectionIndex, name: &str, is_cache: bool) -> CatalogRecord {
        index
            .insert_catalog(&NewCatalog {
                name: name.to_string(),
                src: if is_cache { None } else { Some(format!("/srv/{}", name)) },
                path: PathBuf::from(format!("/tmp/{}", name)),
                branch: Some("main".to_string()),
                catalog_type: "direct".to_string(),
                is_cache,
                deletable: !is_cache,
                version: Some("0.1.0".to_string()),
            })
            .unwrap()
    }

    fn meta(group: &str, name: &str, version: &str) -> SolutionMetadata {
        SolutionMetadata {
            group: group.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            hash: format!("blake3:{}{}{}", group, name, version),
            doi: Some(format!("10.5281/zenodo.{}", name.len())),
            cite: vec![Citation {
                text: "c".to_string(),
                ..Citation::default()
            }],
            ..SolutionMetadata::default()
        }
    }

    #[test]
    fn test_al023_catalog_crud() {
        let (_dir, index) = open();
        let cache = catalog(&index, "cache_catalog", true);
        let remote = catalog(&index, "remote", false);
        assert!(cache.is_cache);
        assert!(!remote.is_cache);
        assert_eq!(index.get_cache_catalog().unwrap(), cache);
        assert_eq!(index.get_catalog_by_name("remote").unwrap().unwrap(), remote);
        assert_eq!(
            index.get_catalog_by_src("/srv/remote").unwrap().unwrap(),
            remote
        );
        let names: Vec<_> = index
            .list_catalogs()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["cache_catalog", "remote"]);
        index.set_catalog_version(remote.catalog_id, "0.2.0").unwrap();
        assert_eq!(
            index.get_catalog(remote.catalog_id).unwrap().unwrap().version.as_deref(),
            Some("0.2.0")
        );
    }

    #[test]
    fn test_al023_single_cache_catalog() {
        let (_dir, index) = open();
        catalog(&index, "cache_catalog", true);
        let err = index
            .insert_catalog(&NewCatalog {
                name: "second_cache".to_string(),
                src: None,
                path: PathBuf::from("/tmp/x"),
                branch: None,
                catalog_type: "direct".to_string(),
                is_cache: true,
                deletable: false,
                version: None,
            })
            .unwrap_err();
        assert!(matches!(err, AlbumError::Validation(_)));
    }

    #[test]
    fn test_al023_missing_cache_catalog_is_not_found() {
        let (_dir, index) = open();
        assert!(matches!(
            index.get_cache_catalog(),
            Err(AlbumError::NotFound(_))
        ));
    }

    #[test]
    fn test_al023_lookup_scoped_by_catalog() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let b = catalog(&index, "b", false);
        let m = meta("g", "blur", "1.0.0");
        index.add_solution(a.catalog_id, &m, &InstallState::default()).unwrap();

        let hit = index.get_solution(a.catalog_id, &m.coordinates()).unwrap().unwrap();
        assert_eq!(hit.metadata, m);
        assert_eq!(hit.catalog_id, a.catalog_id);
        assert!(index.get_solution(b.catalog_id, &m.coordinates()).unwrap().is_none());
        assert!(index.get_solution(9999, &m.coordinates()).unwrap().is_none());
        assert!(index.list_by_catalog(9999).unwrap().is_empty());
    }

    #[test]
    fn test_al023_duplicate_key_is_corruption() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let m = meta("g", "blur", "1");
        index.add_solution(a.catalog_id, &m, &InstallState::default()).unwrap();
        let conn = index.store.connection().unwrap();
        conn.execute(
            r#"INSERT INTO collection (catalog_id, "group", name, version) VALUES (?1, 'g', 'blur', '1')"#,
            params![a.catalog_id],
        )
        .unwrap();
        assert!(matches!(
            index.get_solution(a.catalog_id, &m.coordinates()),
            Err(AlbumError::StorageCorruption(_))
        ));
        assert!(matches!(
            index.set_last_execution(a.catalog_id, &m.coordinates(), "now"),
            Err(AlbumError::StorageCorruption(_))
        ));
    }

    #[test]
    fn test_al023_install_state_mutators() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let m = meta("g", "blur", "1");
        let c = m.coordinates();
        index.add_solution(a.catalog_id, &m, &InstallState::default()).unwrap();

        index.set_installation_unfinished(a.catalog_id, &c).unwrap();
        let e = index.get_solution(a.catalog_id, &c).unwrap().unwrap();
        assert!(e.state.installation_unfinished);
        assert!(!e.is_installed());

        index.set_installed(a.catalog_id, &c, "2026-01-01T00:00:00Z").unwrap();
        let e = index.get_solution(a.catalog_id, &c).unwrap().unwrap();
        assert!(e.is_installed());
        assert_eq!(e.state.install_date.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(index.list_installed().unwrap().len(), 1);

        index.set_last_execution(a.catalog_id, &c, "2026-01-02T00:00:00Z").unwrap();
        index.set_uninstalled(a.catalog_id, &c).unwrap();
        let e = index.get_solution(a.catalog_id, &c).unwrap().unwrap();
        assert!(!e.state.installed);
        assert!(e.state.install_date.is_none());
        assert_eq!(e.state.last_execution.as_deref(), Some("2026-01-02T00:00:00Z"));
    }

    #[test]
    fn test_al023_mutator_on_missing_row() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let err = index
            .set_installed(a.catalog_id, &Coordinates::new("g", "x", "1"), "d")
            .unwrap_err();
        assert!(matches!(err, AlbumError::NotFound(_)));
    }

    #[test]
    fn test_al023_parent_link_and_children() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let parent_id = index
            .add_solution(a.catalog_id, &meta("g", "parent", "1"), &InstallState::default())
            .unwrap();
        let child = meta("g", "child", "1");
        index.add_solution(a.catalog_id, &child, &InstallState::default()).unwrap();
        index
            .set_parent(a.catalog_id, &child.coordinates(), Some(parent_id))
            .unwrap();

        let kids = index.children_of(parent_id).unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].metadata.name, "child");

        // deleting the parent clears the link
        index
            .remove_solution(a.catalog_id, &Coordinates::new("g", "parent", "1"))
            .unwrap();
        let c = index.get_solution(a.catalog_id, &child.coordinates()).unwrap().unwrap();
        assert_eq!(c.state.parent_id, None);
    }

    #[test]
    fn test_al023_update_keeps_id_and_state() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let m = meta("g", "blur", "1");
        let state = InstallState {
            installed: true,
            install_date: Some("d".to_string()),
            ..InstallState::default()
        };
        let id = index.add_solution(a.catalog_id, &m, &state).unwrap();
        let mut changed = m.clone();
        changed.hash = "blake3:new".to_string();
        changed.tags = vec!["new".to_string()];
        index.update_solution(a.catalog_id, &changed, &state).unwrap();
        let e = index.get_solution(a.catalog_id, &m.coordinates()).unwrap().unwrap();
        assert_eq!(e.collection_id, id);
        assert_eq!(e.metadata.hash, "blake3:new");
        assert_eq!(e.metadata.tags, vec!["new"]);
        assert!(e.state.installed);
        assert_eq!(e.state.install_date.as_deref(), Some("d"));
    }

    #[test]
    fn test_al023_partial_lookups() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let b = catalog(&index, "b", false);
        index.add_solution(a.catalog_id, &meta("g", "blur", "1"), &InstallState::default()).unwrap();
        index.add_solution(a.catalog_id, &meta("g", "blur", "2"), &InstallState::default()).unwrap();
        index.add_solution(b.catalog_id, &meta("h", "blur", "1"), &InstallState::default()).unwrap();

        assert_eq!(index.get_solutions_by_name("blur").unwrap().len(), 3);
        assert_eq!(index.get_solutions_by_name_version("blur", "1").unwrap().len(), 2);
        assert_eq!(index.get_solutions_by_group_name("g", "blur").unwrap().len(), 2);
        let by_coords = index
            .get_solutions_by_coordinates(&Coordinates::new("g", "blur", "1"))
            .unwrap();
        assert_eq!(by_coords.len(), 1);
        assert_eq!(
            index.get_solutions_by_doi("10.5281/zenodo.4").unwrap().len(),
            3
        );
        assert_eq!(index.get_solutions_by_hash("blake3:gblur1").unwrap().len(), 1);
    }

    #[test]
    fn test_al023_search() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let mut m = meta("g", "blur", "1");
        m.tags = vec!["Filtering".to_string()];
        index.add_solution(a.catalog_id, &m, &InstallState::default()).unwrap();
        index.add_solution(a.catalog_id, &meta("g", "segment", "1"), &InstallState::default()).unwrap();
        assert_eq!(index.search("BLU").unwrap().len(), 1);
        assert_eq!(index.search("filter").unwrap().len(), 1);
        assert!(index.search("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_al023_remove_catalog_cascades() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        let keep = catalog(&index, "keep", false);
        index.add_solution(a.catalog_id, &meta("g", "x", "1"), &InstallState::default()).unwrap();
        index.add_solution(keep.catalog_id, &meta("g", "y", "1"), &InstallState::default()).unwrap();
        assert!(index.remove_catalog(a.catalog_id).unwrap());
        assert!(index.list_by_catalog(a.catalog_id).unwrap().is_empty());
        assert_eq!(index.list_all().unwrap().len(), 1);
        let conn = index.store.connection().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM collection_citation", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_al023_remove_solutions_by_catalog() {
        let (_dir, index) = open();
        let a = catalog(&index, "a", false);
        index.add_solution(a.catalog_id, &meta("g", "x", "1"), &InstallState::default()).unwrap();
        index.add_solution(a.catalog_id, &meta("g", "y", "1"), &InstallState::default()).unwrap();
        assert_eq!(index.remove_solutions_by_catalog(a.catalog_id).unwrap(), 2);
        assert!(index.get_catalog(a.catalog_id).unwrap().is_some());
    }
}
