//! Leaf index storage
//!
//! The index holds one row per leaf item lifted from the damaged volume's
//! metadata tree: the encoded [`RecordLocator`](crate::fs::btrfs::RecordLocator)
//! as key and the encoded leaf item as value. Rows are enumerated in key byte
//! order, which is the tree order of the records.

use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RestoreError, Result};

/// Name of the table holding the leaf records
pub const INDEX_TABLE: &str = "index";

/// Ordered enumeration of raw (key, value) leaf records
pub trait LeafSource {
    /// Call `visit` once per record in key order, stopping at the first error
    fn for_each_leaf(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()>;

    /// Number of records, when cheap to know
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// SQLite-backed leaf index
pub struct IndexStore {
    conn: Connection,
    path: PathBuf,
}

impl IndexStore {
    /// Open an existing index read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![INDEX_TABLE],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(RestoreError::MissingTable(INDEX_TABLE.to_string()));
        }

        tracing::debug!("Opened leaf index {}", path.display());
        Ok(Self { conn, path })
    }

    /// Create (or reopen for writing) an index at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS "index" (
                key BLOB PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            ) WITHOUT ROWID;
            "#,
        )?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn.execute(
            r#"INSERT OR REPLACE INTO "index" (key, value) VALUES (?1, ?2)"#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Insert many records in one transaction
    pub fn insert_all<'a, I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt =
                tx.prepare(r#"INSERT OR REPLACE INTO "index" (key, value) VALUES (?1, ?2)"#)?;
            for (key, value) in entries {
                stmt.execute(params![key, value])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    /// Number of stored records
    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(r#"SELECT COUNT(*) FROM "index""#, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl LeafSource for IndexStore {
    fn for_each_leaf(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare(r#"SELECT key, value FROM "index" ORDER BY key"#)?;
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let key: Vec<u8> = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            visit(&key, &value)?;
        }

        Ok(())
    }

    fn len_hint(&self) -> Option<u64> {
        self.len().ok()
    }
}

impl LeafSource for BTreeMap<Vec<u8>, Vec<u8>> {
    fn for_each_leaf(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()> {
        for (key, value) in self {
            visit(key, value)?;
        }
        Ok(())
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}
