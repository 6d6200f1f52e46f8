//! Output tree materialization

use std::collections::BTreeMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::error::{RestoreError, Result};

/// Receives the directories and file contents produced by a restore
///
/// Paths are catalog destination paths, relative to whatever root the
/// implementation writes under.
pub trait Materializer: Sync {
    fn create_dir(&self, path: &str) -> Result<()>;

    /// Replace the whole file with `data`
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Write `data` at `offset`, keeping the rest of the file
    fn write_range(&self, path: &str, offset: u64, data: &[u8]) -> Result<()>;
}

/// Writes the restored tree below an output directory
pub struct DirectoryMaterializer {
    root: PathBuf,
}

impl DirectoryMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a destination path under the root; `..` is refused
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(RestoreError::UnsafePath(PathBuf::from(path)));
                }
            }
        }
        Ok(resolved)
    }

    fn open_for_write(&self, path: &str, truncate: bool) -> Result<(PathBuf, File)> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(truncate);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }

        let file = options.open(&target)?;
        Ok((target, file))
    }
}

impl Materializer for DirectoryMaterializer {
    fn create_dir(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        create_dir_all(&target)?;
        tracing::debug!("Created directory {}", target.display());
        Ok(())
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let (target, mut file) = self.open_for_write(path, true)?;
        file.write_all(data)?;
        file.flush()?;
        tracing::debug!("Wrote {} bytes to {}", data.len(), target.display());
        Ok(())
    }

    fn write_range(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        let (target, mut file) = self.open_for_write(path, false)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        tracing::debug!(
            "Wrote {} bytes at offset {} to {}",
            data.len(),
            offset,
            target.display()
        );
        Ok(())
    }
}

/// In-memory tree, for dry runs and inspection
#[derive(Debug, Default)]
pub struct MemoryMaterializer {
    state: Mutex<MemoryTree>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryTree {
    pub directories: Vec<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    /// Number of write calls per path
    pub write_counts: BTreeMap<String, usize>,
}

impl MemoryMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything materialized so far
    pub fn snapshot(&self) -> MemoryTree {
        self.lock().clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTree> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Materializer for MemoryMaterializer {
    fn create_dir(&self, path: &str) -> Result<()> {
        self.lock().directories.push(path.to_string());
        Ok(())
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut tree = self.lock();
        tree.files.insert(path.to_string(), data.to_vec());
        *tree.write_counts.entry(path.to_string()).or_default() += 1;
        Ok(())
    }

    fn write_range(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| RestoreError::ImageRange {
            offset,
            length: data.len() as u64,
            size: 0,
        })?;

        let mut tree = self.lock();
        let file = tree.files.entry(path.to_string()).or_default();
        if file.len() < start + data.len() {
            file.resize(start + data.len(), 0);
        }
        file[start..start + data.len()].copy_from_slice(data);
        *tree.write_counts.entry(path.to_string()).or_default() += 1;
        Ok(())
    }
}
