/// Disk image access
use memmap2::MmapOptions;
use std::fs::File;
use std::path::Path;

use crate::error::{RestoreError, Result};

/// A byte source addressed by absolute offset
pub trait DiskImage: Sync {
    /// Size of the image in bytes
    fn size(&self) -> u64;

    /// Borrow `length` bytes starting at `offset`; the whole range must exist
    fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]>;
}

/// A memory-mapped image file, opened once and shared read-only
pub struct BlockDevice {
    _file: File,
    mmap: Option<memmap2::Mmap>,
    size: u64,
}

impl BlockDevice {
    /// Open a block device or image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();

        // Zero-length files cannot be mapped
        let mmap = if size == 0 {
            None
        } else {
            Some(unsafe { MmapOptions::new().map(&file)? })
        };

        tracing::debug!("Mapped disk image {} ({} bytes)", path.as_ref().display(), size);

        Ok(BlockDevice {
            _file: file,
            mmap,
            size,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl DiskImage for BlockDevice {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        slice_range(self.bytes(), offset, length)
    }
}

impl DiskImage for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        slice_range(self, offset, length)
    }
}

fn slice_range(data: &[u8], offset: u64, length: usize) -> Result<&[u8]> {
    let out_of_range = || RestoreError::ImageRange {
        offset,
        length: length as u64,
        size: data.len() as u64,
    };

    let start = usize::try_from(offset).map_err(|_| out_of_range())?;
    let end = start.checked_add(length).ok_or_else(out_of_range)?;
    if end > data.len() {
        return Err(out_of_range());
    }

    Ok(&data[start..end])
}
