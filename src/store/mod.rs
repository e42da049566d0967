//! AL-020: SQLite persistence. Catalog indices and the collection index.
//!
//! A [`Store`] owns a database path and hands out a fresh connection per
//! call. Nothing holds a connection or transaction across calls, so each
//! thread works on its own connection and every write commits before the
//! call returns.

pub mod catalog_index;
pub mod collection_index;
pub mod tables;

use crate::core::error::{AlbumError, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to one SQLite database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (creating parent directories) and initialize with `schema`.
    pub fn open(path: &Path, schema: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AlbumError::io(parent, e))?;
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        let conn = store.connection()?;
        conn.execute_batch(schema)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A new connection for the calling thread.
    pub fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Run `f` inside an immediate transaction and commit.
    pub fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

/// Collapse a lookup that must match at most one row.
pub(crate) fn at_most_one<T>(mut rows: Vec<T>, what: impl FnOnce() -> String) -> Result<Option<T>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        n => Err(AlbumError::StorageCorruption(format!(
            "{} rows for unique key {}",
            n,
            what()
        ))),
    }
}
