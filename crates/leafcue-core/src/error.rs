//! Error taxonomy for leaf-index restores
//!
//! Decoding failures, catalog misses and integrity violations are
//! record-scoped: under [`ErrorPolicy::Skip`](crate::restore::ErrorPolicy)
//! they are collected into the report and the run moves on. Everything that
//! touches the disk image, the output tree or the index store is fatal.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestoreError {
    /// A byte window is shorter than the structure it should hold
    #[error("truncated {structure}: need {needed} bytes, have {actual}")]
    TruncatedInput {
        structure: &'static str,
        needed: usize,
        actual: usize,
    },

    /// Inline extent whose declared size disagrees with its payload
    #[error("inline extent for inode {inode} declares {declared} bytes but carries {actual}")]
    IntegrityMismatch {
        inode: u64,
        declared: u64,
        actual: u64,
    },

    #[error("inode {inode} not found in catalog")]
    NotFound { inode: u64 },

    #[error("read of {length} bytes at offset {offset} exceeds disk image of {size} bytes")]
    ImageRange { offset: u64, length: u64, size: u64 },

    #[error("destination path escapes output root: {0}")]
    UnsafePath(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("index store has no '{0}' table")]
    MissingTable(String),

    #[error("index store error: {0}")]
    IndexStore(#[from] rusqlite::Error),
}

impl RestoreError {
    pub(crate) fn truncated(structure: &'static str, needed: usize, actual: usize) -> Self {
        RestoreError::TruncatedInput {
            structure,
            needed,
            actual,
        }
    }

    /// Whether the failure is confined to the record that raised it
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            RestoreError::TruncatedInput { .. }
                | RestoreError::IntegrityMismatch { .. }
                | RestoreError::NotFound { .. }
                | RestoreError::UnsafePath(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
