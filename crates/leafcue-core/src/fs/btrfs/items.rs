/// Btrfs on-disk item layouts
///
/// Decoders for the leaf item payloads found in a filesystem tree. All fields
/// are little-endian at fixed offsets; variable-length names follow a fixed
/// header and are sliced by their declared length.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::io::Cursor;

use super::ensure_len;
use crate::error::Result;

// ============================================================================
// Timestamps and keys
// ============================================================================

/// Btrfs timespec (seconds + nanoseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BtrfsTimespec {
    pub sec: u64,
    pub nsec: u32,
}

impl BtrfsTimespec {
    pub const SIZE: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "BtrfsTimespec")?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            sec: cursor.read_u64::<LittleEndian>()?,
            nsec: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let sec = i64::try_from(self.sec).ok()?;
        DateTime::from_timestamp(sec, self.nsec)
    }
}

/// Btrfs tree key - identifies an item in the tree
///
/// Field order gives the tree ordering: objectid, then type, then offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BtrfsKey {
    pub objectid: u64,
    pub item_type: u8,
    pub offset: u64,
}

impl BtrfsKey {
    /// Size of a key in bytes
    pub const SIZE: usize = 17;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "BtrfsKey")?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            objectid: cursor.read_u64::<LittleEndian>()?,
            item_type: cursor.read_u8()?,
            offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        // Writes into a Vec cannot fail
        let _ = out.write_u64::<LittleEndian>(self.objectid);
        out.push(self.item_type);
        let _ = out.write_u64::<LittleEndian>(self.offset);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out);
        out
    }
}

// ============================================================================
// Inode items
// ============================================================================

/// Btrfs inode item - contains file metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtrfsInodeItem {
    pub generation: u64,
    pub transid: u64,
    pub size: u64,
    pub nbytes: u64, // Actual bytes used on disk
    pub block_group: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u64,
    pub flags: u64,
    pub sequence: u64,
    /// Opaque, carried through unmodified
    pub reserved: [u64; 4],
    pub atime: BtrfsTimespec,
    pub ctime: BtrfsTimespec,
    pub mtime: BtrfsTimespec,
    pub otime: BtrfsTimespec, // Creation time
}

impl BtrfsInodeItem {
    pub const SIZE: usize = 160;

    const RESERVED_OFFSET: usize = 80;
    const ATIME_OFFSET: usize = 112;
    const CTIME_OFFSET: usize = 124;
    const MTIME_OFFSET: usize = 136;
    const OTIME_OFFSET: usize = 148;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "BtrfsInodeItem")?;

        let mut cursor = Cursor::new(data);

        let generation = cursor.read_u64::<LittleEndian>()?;
        let transid = cursor.read_u64::<LittleEndian>()?;
        let size = cursor.read_u64::<LittleEndian>()?;
        let nbytes = cursor.read_u64::<LittleEndian>()?;
        let block_group = cursor.read_u64::<LittleEndian>()?;
        let nlink = cursor.read_u32::<LittleEndian>()?;
        let uid = cursor.read_u32::<LittleEndian>()?;
        let gid = cursor.read_u32::<LittleEndian>()?;
        let mode = cursor.read_u32::<LittleEndian>()?;
        let rdev = cursor.read_u64::<LittleEndian>()?;
        let flags = cursor.read_u64::<LittleEndian>()?;
        let sequence = cursor.read_u64::<LittleEndian>()?;

        debug_assert_eq!(cursor.position() as usize, Self::RESERVED_OFFSET);
        let mut reserved = [0u64; 4];
        for word in reserved.iter_mut() {
            *word = cursor.read_u64::<LittleEndian>()?;
        }

        Ok(Self {
            generation,
            transid,
            size,
            nbytes,
            block_group,
            nlink,
            uid,
            gid,
            mode,
            rdev,
            flags,
            sequence,
            reserved,
            atime: BtrfsTimespec::parse(&data[Self::ATIME_OFFSET..])?,
            ctime: BtrfsTimespec::parse(&data[Self::CTIME_OFFSET..])?,
            mtime: BtrfsTimespec::parse(&data[Self::MTIME_OFFSET..])?,
            otime: BtrfsTimespec::parse(&data[Self::OTIME_OFFSET..])?,
        })
    }

    /// Check if this is a regular file (not directory/symlink/etc)
    pub fn is_regular_file(&self) -> bool {
        (self.mode & 0o170000) == 0o100000
    }

    pub fn is_directory(&self) -> bool {
        (self.mode & 0o170000) == 0o040000
    }
}

/// Btrfs inode reference - links inode to directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtrfsInodeRef {
    pub index: u64,
    pub name_len: u16,
    pub name: Vec<u8>,
}

impl BtrfsInodeRef {
    /// Fixed header before the name
    pub const HEADER_SIZE: usize = 10;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::HEADER_SIZE, "BtrfsInodeRef")?;

        let mut cursor = Cursor::new(data);
        let index = cursor.read_u64::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()?;

        let end = Self::HEADER_SIZE + name_len as usize;
        ensure_len(data, end, "BtrfsInodeRef name")?;

        Ok(Self {
            index,
            name_len,
            name: data[Self::HEADER_SIZE..end].to_vec(),
        })
    }

    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Btrfs directory entry (DIR_ITEM / DIR_INDEX / XATTR_ITEM payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtrfsDirItem {
    pub location: BtrfsKey,
    pub transid: u64,
    pub data_len: u16,
    pub name_len: u16,
    pub entry_type: u8,
    pub name: Vec<u8>,
}

impl BtrfsDirItem {
    pub const HEADER_SIZE: usize = 30;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::HEADER_SIZE, "BtrfsDirItem")?;

        let location = BtrfsKey::parse(data)?;
        let mut cursor = Cursor::new(&data[BtrfsKey::SIZE..]);
        let transid = cursor.read_u64::<LittleEndian>()?;
        let data_len = cursor.read_u16::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()?;
        let entry_type = cursor.read_u8()?;

        let end = Self::HEADER_SIZE + name_len as usize;
        ensure_len(data, end, "BtrfsDirItem name")?;

        Ok(Self {
            location,
            transid,
            data_len,
            name_len,
            entry_type,
            name: data[Self::HEADER_SIZE..end].to_vec(),
        })
    }

    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

// ============================================================================
// File extents
// ============================================================================

/// How a file extent stores its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentType {
    Inline,
    Regular,
    Prealloc,
    Unknown(u8),
}

impl From<u8> for ExtentType {
    fn from(value: u8) -> Self {
        match value {
            0 => ExtentType::Inline,
            1 => ExtentType::Regular,
            2 => ExtentType::Prealloc,
            other => ExtentType::Unknown(other),
        }
    }
}

impl From<ExtentType> for u8 {
    fn from(value: ExtentType) -> Self {
        match value {
            ExtentType::Inline => 0,
            ExtentType::Regular => 1,
            ExtentType::Prealloc => 2,
            ExtentType::Unknown(other) => other,
        }
    }
}

/// Btrfs file extent header (EXTENT_DATA payload without its trailer)
///
/// Inline extents carry the file data right after this header; regular and
/// preallocated extents carry a [`BtrfsExtentLocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtrfsFileExtentItem {
    pub generation: u64,
    pub ram_bytes: u64,  // Uncompressed size
    pub compression: u8, // 0=none, 1=zlib, 2=lzo, 3=zstd
    pub encryption: u8,
    pub other_encoding: u16,
    pub extent_type: ExtentType,
}

impl BtrfsFileExtentItem {
    pub const SIZE: usize = 21;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "BtrfsFileExtentItem")?;

        let mut cursor = Cursor::new(data);
        Ok(Self {
            generation: cursor.read_u64::<LittleEndian>()?,
            ram_bytes: cursor.read_u64::<LittleEndian>()?,
            compression: cursor.read_u8()?,
            encryption: cursor.read_u8()?,
            other_encoding: cursor.read_u16::<LittleEndian>()?,
            extent_type: cursor.read_u8()?.into(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        let _ = out.write_u64::<LittleEndian>(self.generation);
        let _ = out.write_u64::<LittleEndian>(self.ram_bytes);
        out.push(self.compression);
        out.push(self.encryption);
        let _ = out.write_u16::<LittleEndian>(self.other_encoding);
        out.push(self.extent_type.into());
        out
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption != 0 || self.other_encoding != 0
    }
}

/// Physical placement of a regular or preallocated extent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BtrfsExtentLocation {
    pub disk_bytenr: u64,    // Location on disk
    pub disk_num_bytes: u64, // Allocated size on disk
    pub offset: u64,         // Within extent
    pub num_bytes: u64,      // Logical size
}

impl BtrfsExtentLocation {
    pub const SIZE: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "BtrfsExtentLocation")?;

        let mut cursor = Cursor::new(data);
        Ok(Self {
            disk_bytenr: cursor.read_u64::<LittleEndian>()?,
            disk_num_bytes: cursor.read_u64::<LittleEndian>()?,
            offset: cursor.read_u64::<LittleEndian>()?,
            num_bytes: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        for field in [
            self.disk_bytenr,
            self.disk_num_bytes,
            self.offset,
            self.num_bytes,
        ] {
            let _ = out.write_u64::<LittleEndian>(field);
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
