//! Restore results

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::error::RestoreError;
use crate::fs::btrfs::RecordLocator;

/// One materializer write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub inode: u64,
    pub generation: u64,
    pub path: String,
    /// `None` when the write replaced the whole file
    pub file_offset: Option<u64>,
    pub length: u64,
    /// Hex SHA-256 of the written bytes
    pub sha256: String,
    /// Data was compressed or encrypted on disk and written as stored
    pub raw_encoded: bool,
}

/// A record left out under the skip policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Hex of the raw index key, empty for catalog-level failures
    pub key: String,
    pub objectid: Option<u64>,
    pub error: String,
}

impl RecordFailure {
    pub fn new(key: &[u8], error: &RestoreError) -> Self {
        let mut hex = String::with_capacity(key.len() * 2);
        for byte in key {
            let _ = write!(hex, "{:02x}", byte);
        }
        Self {
            key: hex,
            objectid: RecordLocator::parse(key).ok().map(|locator| locator.objectid),
            error: error.to_string(),
        }
    }
}

/// Counters and details for one restore run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    pub directories_created: u64,
    pub records_seen: u64,
    /// Records carrying file extent data
    pub extent_records: u64,
    pub stale_records: u64,
    pub non_file_records: u64,
    pub preallocated_records: u64,
    pub unsupported_records: u64,
    pub raw_encoded_records: u64,
    pub bytes_written: u64,
    pub writes: Vec<FileWrite>,
    pub failures: Vec<RecordFailure>,
}

impl RestoreReport {
    /// Distinct paths written
    pub fn files_restored(&self) -> usize {
        let mut paths: Vec<&str> = self.writes.iter().map(|w| w.path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        paths.len()
    }

    pub(crate) fn record_write(&mut self, write: FileWrite) {
        self.bytes_written += write.length;
        if write.raw_encoded {
            self.raw_encoded_records += 1;
        }
        self.writes.push(write);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records, {} extents, {} files restored ({} bytes), {} stale, {} failed",
            self.records_seen,
            self.extent_records,
            self.files_restored(),
            self.bytes_written,
            self.stale_records,
            self.failures.len()
        )
    }
}
