//! AL-021: Shared metadata row layout and normalized side tables.
//!
//! Both the per-catalog index and the collection index persist a
//! [`SolutionMetadata`] as one owner row plus seven side tables keyed by the
//! owner id. Side-table rows keep their list position so reads return the
//! descriptor's order.

use crate::core::error::Result;
use crate::core::types::{Argument, Citation, Cover, SolutionMetadata};
use rusqlite::{params, Connection, Row};

/// Metadata columns of an owner row, in select order.
pub const METADATA_COLUMNS: &str = r#""group", name, version, title, description, doi, license, changelog, acknowledgement, timestamp, album_api_version, hash"#;

/// Column definitions for [`METADATA_COLUMNS`].
pub const METADATA_COLUMN_DEFS: &str = r#""group" TEXT NOT NULL,
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    title TEXT,
    description TEXT,
    doi TEXT,
    license TEXT,
    changelog TEXT,
    acknowledgement TEXT,
    timestamp TEXT,
    album_api_version TEXT,
    hash TEXT NOT NULL DEFAULT ''"#;

/// Number of columns in [`METADATA_COLUMNS`].
pub const METADATA_COLUMN_COUNT: usize = 12;

/// Read the scalar metadata columns starting at `offset`.
pub fn metadata_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<SolutionMetadata> {
    Ok(SolutionMetadata {
        group: row.get(offset)?,
        name: row.get(offset + 1)?,
        version: row.get(offset + 2)?,
        title: row.get(offset + 3)?,
        description: row.get(offset + 4)?,
        doi: row.get(offset + 5)?,
        license: row.get(offset + 6)?,
        changelog: row.get(offset + 7)?,
        acknowledgement: row.get(offset + 8)?,
        timestamp: row.get(offset + 9)?,
        album_api_version: row.get(offset + 10)?,
        hash: row.get(offset + 11)?,
        ..SolutionMetadata::default()
    })
}

/// Side tables belonging to one owner table.
#[derive(Debug, Clone, Copy)]
pub struct SideTables {
    /// Prefix of every side-table name, e.g. `solution` → `solution_tag`.
    pub prefix: &'static str,
    pub owner_table: &'static str,
    pub owner_key: &'static str,
}

impl SideTables {
    fn table(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// DDL for all side tables.
    pub fn schema(&self) -> String {
        let fk = format!(
            "owner_id INTEGER NOT NULL REFERENCES {}({}) ON DELETE CASCADE",
            self.owner_table, self.owner_key
        );
        let mut ddl = String::new();
        let tables = [
            ("author", "name TEXT NOT NULL"),
            ("tag", "tag TEXT NOT NULL"),
            ("citation", "text TEXT NOT NULL, doi TEXT, url TEXT"),
            (
                "argument",
                "name TEXT NOT NULL, type TEXT NOT NULL, description TEXT, default_value TEXT, required INTEGER NOT NULL",
            ),
            ("cover", "source TEXT NOT NULL, description TEXT"),
            ("documentation", "source TEXT NOT NULL"),
            ("custom", "key TEXT NOT NULL, value TEXT NOT NULL"),
        ];
        for (suffix, columns) in tables {
            let name = self.table(suffix);
            ddl.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {name} ({fk}, position INTEGER NOT NULL, {columns});\n\
                 CREATE INDEX IF NOT EXISTS {name}_owner ON {name}(owner_id);\n"
            ));
        }
        ddl
    }

    /// Write all list-valued fields of `meta` for `owner_id`.
    pub fn write(&self, conn: &Connection, owner_id: i64, meta: &SolutionMetadata) -> Result<()> {
        for (i, author) in meta.authors.iter().enumerate() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (owner_id, position, name) VALUES (?1, ?2, ?3)",
                    self.table("author")
                ),
                params![owner_id, i as i64, author],
            )?;
        }
        for (i, tag) in meta.tags.iter().enumerate() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (owner_id, position, tag) VALUES (?1, ?2, ?3)",
                    self.table("tag")
                ),
                params![owner_id, i as i64, tag],
            )?;
        }
        for (i, c) in meta.cite.iter().enumerate() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (owner_id, position, text, doi, url) VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.table("citation")
                ),
                params![owner_id, i as i64, c.text, c.doi, c.url],
            )?;
        }
        for (i, a) in meta.args.iter().enumerate() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (owner_id, position, name, type, description, default_value, required) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    self.table("argument")
                ),
                params![owner_id, i as i64, a.name, a.arg_type, a.description, a.default, a.required],
            )?;
        }
        for (i, c) in meta.covers.iter().enumerate() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (owner_id, position, source, description) VALUES (?1, ?2, ?3, ?4)",
                    self.table("cover")
                ),
                params![owner_id, i as i64, c.source, c.description],
            )?;
        }
        for (i, doc) in meta.documentation.iter().enumerate() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (owner_id, position, source) VALUES (?1, ?2, ?3)",
                    self.table("documentation")
                ),
                params![owner_id, i as i64, doc],
            )?;
        }
        for (i, (k, v)) in meta.custom.iter().enumerate() {
            conn.execute(
                &format!(
                    "INSERT INTO {} (owner_id, position, key, value) VALUES (?1, ?2, ?3, ?4)",
                    self.table("custom")
                ),
                params![owner_id, i as i64, k, v],
            )?;
        }
        Ok(())
    }

    /// Delete every side-table row of `owner_id`.
    pub fn clear(&self, conn: &Connection, owner_id: i64) -> Result<()> {
        for suffix in [
            "author",
            "tag",
            "citation",
            "argument",
            "cover",
            "documentation",
            "custom",
        ] {
            conn.execute(
                &format!("DELETE FROM {} WHERE owner_id = ?1", self.table(suffix)),
                params![owner_id],
            )?;
        }
        Ok(())
    }

    /// Fill the list-valued fields of `meta` from the side tables.
    pub fn read(&self, conn: &Connection, owner_id: i64, meta: &mut SolutionMetadata) -> Result<()> {
        meta.authors = self.read_list(conn, "author", "name", owner_id)?;
        meta.tags = self.read_list(conn, "tag", "tag", owner_id)?;
        meta.documentation = self.read_list(conn, "documentation", "source", owner_id)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT text, doi, url FROM {} WHERE owner_id = ?1 ORDER BY position",
            self.table("citation")
        ))?;
        meta.cite = stmt
            .query_map(params![owner_id], |r| {
                Ok(Citation {
                    text: r.get(0)?,
                    doi: r.get(1)?,
                    url: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT name, type, description, default_value, required FROM {} \
             WHERE owner_id = ?1 ORDER BY position",
            self.table("argument")
        ))?;
        meta.args = stmt
            .query_map(params![owner_id], |r| {
                Ok(Argument {
                    name: r.get(0)?,
                    arg_type: r.get(1)?,
                    description: r.get(2)?,
                    default: r.get(3)?,
                    required: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT source, description FROM {} WHERE owner_id = ?1 ORDER BY position",
            self.table("cover")
        ))?;
        meta.covers = stmt
            .query_map(params![owner_id], |r| {
                Ok(Cover {
                    source: r.get(0)?,
                    description: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT key, value FROM {} WHERE owner_id = ?1 ORDER BY position",
            self.table("custom")
        ))?;
        meta.custom = stmt
            .query_map(params![owner_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(())
    }

    fn read_list(
        &self,
        conn: &Connection,
        suffix: &str,
        column: &str,
        owner_id: i64,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE owner_id = ?1 ORDER BY position",
            column,
            self.table(suffix)
        ))?;
        let values = stmt
            .query_map(params![owner_id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }
}
