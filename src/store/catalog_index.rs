//! AL-022: Per-catalog solution index (`album_catalog_index.db`).
//!
//! One `solution` row per solution plus normalized side tables. The export
//! flattens each row with its side tables into one self-contained JSON
//! record, which is what catalog maintainers publish next to the database.

use super::tables::{self, SideTables, METADATA_COLUMNS, METADATA_COLUMN_DEFS};
use super::{at_most_one, Store};
use crate::core::error::{AlbumError, Result};
use crate::core::types::{Coordinates, SolutionMetadata};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const EXPORT_FILE: &str = "catalog_solution_list.json";

const SIDE: SideTables = SideTables {
    prefix: "solution",
    owner_table: "solution",
    owner_key: "solution_id",
};

fn schema() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS catalog_index (\n\
             catalog_index_id INTEGER PRIMARY KEY CHECK (catalog_index_id = 1),\n\
             name TEXT NOT NULL,\n\
             version TEXT NOT NULL\n\
         );\n\
         CREATE TABLE IF NOT EXISTS solution (\n\
             solution_id INTEGER PRIMARY KEY AUTOINCREMENT,\n\
             {}\n\
         );\n\
         CREATE INDEX IF NOT EXISTS solution_coordinates ON solution(\"group\", name, version);\n\
         CREATE INDEX IF NOT EXISTS solution_hash ON solution(hash);\n\
         {}",
        METADATA_COLUMN_DEFS,
        SIDE.schema()
    )
}

/// Flat export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogExport {
    pub catalog: String,
    pub version: String,
    pub solutions: Vec<SolutionMetadata>,
}

/// The index database of one catalog.
#[derive(Debug, Clone)]
pub struct CatalogIndex {
    store: Store,
}

impl CatalogIndex {
    /// Open or create the index at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            store: Store::open(path, &schema())?,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Record the catalog name and index version.
    pub fn set_meta(&self, name: &str, version: &str) -> Result<()> {
        self.store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO catalog_index (catalog_index_id, name, version) VALUES (1, ?1, ?2)
                 ON CONFLICT(catalog_index_id) DO UPDATE SET name = excluded.name, version = excluded.version",
                params![name, version],
            )?;
            Ok(())
        })
    }

    pub fn meta(&self) -> Result<Option<(String, String)>> {
        let conn = self.store.connection()?;
        let meta = conn
            .query_row(
                "SELECT name, version FROM catalog_index WHERE catalog_index_id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(meta)
    }

    /// Insert `meta`, replacing any row with the same coordinates.
    pub fn insert(&self, meta: &SolutionMetadata) -> Result<i64> {
        self.store.with_tx(|tx| {
            delete_by_coordinates(tx, &meta.coordinates())?;
            tx.execute(
                &format!(
                    "INSERT INTO solution ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    METADATA_COLUMNS
                ),
                params![
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
                    meta.hash
                ],
            )?;
            let id = tx.last_insert_rowid();
            SIDE.write(tx, id, meta)?;
            Ok(id)
        })
    }

    /// Remove a solution. Returns whether a row existed.
    pub fn remove(&self, coords: &Coordinates) -> Result<bool> {
        self.store
            .with_tx(|tx| Ok(delete_by_coordinates(tx, coords)? > 0))
    }

    pub fn get(&self, coords: &Coordinates) -> Result<Option<SolutionMetadata>> {
        let conn = self.store.connection()?;
        let rows = query(
            &conn,
            r#"WHERE "group" = ?1 AND name = ?2 AND version = ?3"#,
            params![coords.group, coords.name, coords.version],
        )?;
        at_most_one(rows, || coords.to_string())
    }

    pub fn get_by_hash(&self, hash: &str) -> Result<Vec<SolutionMetadata>> {
        let conn = self.store.connection()?;
        query(&conn, "WHERE hash = ?1", params![hash])
    }

    /// Every solution, ordered by coordinates.
    pub fn list_all(&self) -> Result<Vec<SolutionMetadata>> {
        let conn = self.store.connection()?;
        query(&conn, "", [])
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.store.connection()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM solution", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Write the flat JSON export to `path`.
    pub fn export(&self, path: &Path) -> Result<usize> {
        let (catalog, version) = self.meta()?.unwrap_or_default();
        let doc = CatalogExport {
            catalog,
            version,
            solutions: self.list_all()?,
        };
        let json = serde_json::to_string_pretty(&doc).map_err(AlbumError::serialization)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AlbumError::io(parent, e))?;
        }
        std::fs::write(path, json).map_err(|e| AlbumError::io(path, e))?;
        Ok(doc.solutions.len())
    }
}

/// Read an export written by [`CatalogIndex::export`].
pub fn parse_export(path: &Path) -> Result<CatalogExport> {
    let content = std::fs::read_to_string(path).map_err(|e| AlbumError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        AlbumError::Validation(format!("invalid catalog export {}: {}", path.display(), e))
    })
}

fn delete_by_coordinates(conn: &Connection, coords: &Coordinates) -> Result<usize> {
    let n = conn.execute(
        r#"DELETE FROM solution WHERE "group" = ?1 AND name = ?2 AND version = ?3"#,
        params![coords.group, coords.name, coords.version],
    )?;
    Ok(n)
}

fn query(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<SolutionMetadata>> {
    let mut stmt = conn.prepare(&format!(
        r#"SELECT solution_id, {} FROM solution {} ORDER BY "group", name, version"#,
        METADATA_COLUMNS, filter
    ))?;
    let rows = stmt
        .query_map(params, |r| Ok((r.get::<_, i64>(0)?, tables::metadata_from_row(r, 1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, mut meta) in rows {
        SIDE.read(conn, id, &mut meta)?;
        out.push(meta);
    }
    Ok(out)
}
