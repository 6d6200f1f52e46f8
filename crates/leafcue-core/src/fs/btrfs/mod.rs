/// Btrfs on-disk structures
use crate::error::{RestoreError, Result};

pub mod index;
pub mod items;

pub use index::{BtrfsItem, LeafRecord, RecordLocator};
pub use items::{
    BtrfsDirItem, BtrfsExtentLocation, BtrfsFileExtentItem, BtrfsInodeItem, BtrfsInodeRef,
    BtrfsKey, BtrfsTimespec, ExtentType,
};

/// Btrfs item types
pub const BTRFS_INODE_ITEM_KEY: u8 = 1;
pub const BTRFS_INODE_REF_KEY: u8 = 12;
pub const BTRFS_INODE_EXTREF_KEY: u8 = 13;
pub const BTRFS_XATTR_ITEM_KEY: u8 = 24;
pub const BTRFS_ORPHAN_ITEM_KEY: u8 = 48;
pub const BTRFS_DIR_ITEM_KEY: u8 = 84;
pub const BTRFS_DIR_INDEX_KEY: u8 = 96;
pub const BTRFS_EXTENT_DATA_KEY: u8 = 108;

/// Well-known object IDs
pub const BTRFS_FS_TREE_OBJECTID: u64 = 5;
pub const BTRFS_FIRST_FREE_OBJECTID: u64 = 256;

/// Human-readable name of an item type, for diagnostics
pub fn item_type_name(item_type: u8) -> &'static str {
    match item_type {
        BTRFS_INODE_ITEM_KEY => "INODE_ITEM",
        BTRFS_INODE_REF_KEY => "INODE_REF",
        BTRFS_INODE_EXTREF_KEY => "INODE_EXTREF",
        BTRFS_XATTR_ITEM_KEY => "XATTR_ITEM",
        BTRFS_ORPHAN_ITEM_KEY => "ORPHAN_ITEM",
        BTRFS_DIR_ITEM_KEY => "DIR_ITEM",
        BTRFS_DIR_INDEX_KEY => "DIR_INDEX",
        BTRFS_EXTENT_DATA_KEY => "EXTENT_DATA",
        _ => "UNKNOWN",
    }
}

/// Fail with `TruncatedInput` unless `data` holds at least `needed` bytes
pub(crate) fn ensure_len(data: &[u8], needed: usize, structure: &'static str) -> Result<()> {
    if data.len() < needed {
        return Err(RestoreError::truncated(structure, needed, data.len()));
    }
    Ok(())
}
