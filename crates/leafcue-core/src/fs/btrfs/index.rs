/// Leaf index record decoding
///
/// Every leaf item lifted out of the metadata tree is stored in the index as
/// one key/value pair:
///
/// * key: owner tree, item type, object id, key offset and node generation,
///   all big-endian so that byte order equals sort order
/// * value: the little-endian leaf item header (key, data offset, data size)
///   followed by the item data
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt::Write as _;
use std::io::Cursor;

use super::items::BtrfsKey;
use super::{ensure_len, item_type_name};
use crate::error::Result;

/// Index key: where a leaf record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordLocator {
    /// Tree that owned the leaf
    pub owner: u64,
    pub item_type: u8,
    pub objectid: u64,
    pub offset: u64,
    /// Generation of the leaf node the record was found in
    pub generation: u64,
}

impl RecordLocator {
    pub const SIZE: usize = 33;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "RecordLocator")?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            owner: cursor.read_u64::<BigEndian>()?,
            item_type: cursor.read_u8()?,
            objectid: cursor.read_u64::<BigEndian>()?,
            offset: cursor.read_u64::<BigEndian>()?,
            generation: cursor.read_u64::<BigEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        let _ = out.write_u64::<BigEndian>(self.owner);
        out.push(self.item_type);
        let _ = out.write_u64::<BigEndian>(self.objectid);
        let _ = out.write_u64::<BigEndian>(self.offset);
        let _ = out.write_u64::<BigEndian>(self.generation);
        out
    }
}

/// Item header for leaf nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtrfsItem {
    pub key: BtrfsKey,
    pub offset: u32, // Offset from end of header to item data
    pub size: u32,   // Size of item data
}

impl BtrfsItem {
    pub const SIZE: usize = 25;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE, "BtrfsItem")?;
        let key = BtrfsKey::parse(data)?;
        let mut cursor = Cursor::new(&data[BtrfsKey::SIZE..]);
        Ok(Self {
            key,
            offset: cursor.read_u32::<LittleEndian>()?,
            size: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.key.write_to(&mut out);
        let _ = out.write_u32::<LittleEndian>(self.offset);
        let _ = out.write_u32::<LittleEndian>(self.size);
        out
    }

    /// Build an index value for `payload`, with `size` taken from it
    pub fn encode_value(key: BtrfsKey, offset: u32, payload: &[u8]) -> Vec<u8> {
        let item = BtrfsItem {
            key,
            offset,
            size: payload.len() as u32,
        };
        let mut out = item.to_bytes();
        out.extend_from_slice(payload);
        out
    }
}

/// One decoded index entry, borrowing its payload from the stored value
#[derive(Debug, Clone, Copy)]
pub struct LeafRecord<'a> {
    pub locator: RecordLocator,
    pub item: BtrfsItem,
    pub payload: &'a [u8],
}

impl<'a> LeafRecord<'a> {
    pub fn parse(key: &[u8], value: &'a [u8]) -> Result<Self> {
        let locator = RecordLocator::parse(key)?;
        let item = BtrfsItem::parse(value)?;

        // Type 0 marks an item without data; its size field is not trusted
        let payload = if item.key.item_type == 0 {
            &value[..0]
        } else {
            let end = BtrfsItem::SIZE + item.size as usize;
            ensure_len(value, end, "leaf item payload")?;
            &value[BtrfsItem::SIZE..end]
        };

        Ok(Self {
            locator,
            item,
            payload,
        })
    }

    /// One-line summary with the payload as escaped text and hex
    pub fn describe(&self) -> String {
        let mut line = format!(
            "[G:{} O:{} ID:{} OF1:{} T:{} ({}) OF2:{} S:{}]",
            self.locator.generation,
            self.locator.owner,
            self.locator.objectid,
            self.locator.offset,
            self.locator.item_type,
            item_type_name(self.locator.item_type),
            self.item.offset,
            self.item.size,
        );
        if !self.payload.is_empty() {
            line.push(' ');
            line.push_str(&escape_bytes(self.payload));
            line.push_str(", ");
            for byte in self.payload {
                let _ = write!(line, "{:02x}", byte);
            }
        }
        line
    }
}

fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &byte in data {
        if (0x20..=0x7E).contains(&byte) {
            out.push(byte as char);
        } else {
            let _ = write!(out, "\\x{:02x}", byte);
        }
    }
    out
}
