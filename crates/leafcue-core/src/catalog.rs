//! Inode catalog
//!
//! The catalog is the list of inodes that survived in the metadata index,
//! each with the path it should be restored to. It is built once before the
//! extent pass and only read afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{RestoreError, Result};

/// One inode and where to restore it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    /// Generation the inode was last written in; extents must match it
    pub generation: u64,
    pub inode: u64,
    pub parent_inode: u64,
    pub name: String,
    pub is_file: bool,
    /// Destination, relative to the output root
    pub full_path: String,
    /// Declared file size in bytes
    pub size: u64,
}

/// Read-only lookup table from inode number to [`InodeRecord`]
#[derive(Debug, Default)]
pub struct InodeCatalog {
    records: Vec<InodeRecord>,
    by_inode: HashMap<u64, usize>,
}

impl InodeCatalog {
    /// Build the catalog; when an inode number repeats the first record wins
    pub fn load(records: Vec<InodeRecord>) -> Self {
        let mut by_inode = HashMap::with_capacity(records.len());
        let mut duplicates = 0usize;

        for (idx, record) in records.iter().enumerate() {
            if by_inode.contains_key(&record.inode) {
                duplicates += 1;
                continue;
            }
            by_inode.insert(record.inode, idx);
        }

        if duplicates > 0 {
            tracing::warn!("Catalog has {} duplicate inode records; keeping the first of each", duplicates);
        }

        Self { records, by_inode }
    }

    /// Load a catalog serialized as a JSON array of records
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let records: Vec<InodeRecord> = serde_json::from_reader(reader)?;
        Ok(Self::load(records))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let catalog = Self::from_reader(BufReader::new(file))?;
        tracing::info!(
            "Loaded {} inode records ({} directories) from {}",
            catalog.len(),
            catalog.directories().count(),
            path.as_ref().display()
        );
        Ok(catalog)
    }

    pub fn lookup(&self, inode: u64) -> Result<&InodeRecord> {
        self.by_inode
            .get(&inode)
            .map(|&idx| &self.records[idx])
            .ok_or(RestoreError::NotFound { inode })
    }

    /// Non-file records, in catalog order
    pub fn directories(&self) -> impl Iterator<Item = &InodeRecord> {
        self.records.iter().filter(|record| !record.is_file)
    }

    pub fn records(&self) -> &[InodeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
