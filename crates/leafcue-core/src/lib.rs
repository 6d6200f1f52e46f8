use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod catalog;
pub mod error;
pub mod fs;
pub mod index_store;
pub mod restore;

pub use catalog::{InodeCatalog, InodeRecord};
pub use error::RestoreError;
pub use fs::{BlockDevice, DiskImage};
pub use index_store::{IndexStore, LeafSource};

// Re-export the restore API
pub use restore::{
    DirectoryMaterializer, ErrorPolicy, ExtentRestorer, FileWrite, Materializer, ReadLength,
    RecordFailure, RestoreEvent, RestoreOptions, RestoreReport,
};

/// Everything a restore run needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Root of the restored tree
    pub output_dir: PathBuf,
    /// JSON inode catalog
    pub catalog_path: PathBuf,
    /// SQLite leaf index
    pub index_path: PathBuf,
    /// Raw image holding the volume's data blocks
    pub image_path: PathBuf,
    pub options: RestoreOptions,
}

impl RestoreConfig {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        catalog_path: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
        image_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            catalog_path: catalog_path.into(),
            index_path: index_path.into(),
            image_path: image_path.into(),
            options: RestoreOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RestoreOptions) -> Self {
        self.options = options;
        self
    }
}

/// Restore a volume from its catalog, leaf index and disk image
///
/// Loads the catalog, maps the image once for the whole run, creates the
/// catalog's directories under the output root and then replays every leaf
/// record in key order. `on_event` receives progress notifications.
pub fn restore_volume<F>(config: &RestoreConfig, on_event: F) -> Result<RestoreReport>
where
    F: Fn(RestoreEvent<'_>) + Send + Sync + 'static,
{
    tracing::info!(
        "Restoring {} into {}",
        config.image_path.display(),
        config.output_dir.display()
    );

    let catalog = InodeCatalog::open(&config.catalog_path)
        .with_context(|| format!("Failed to load catalog {}", config.catalog_path.display()))?;
    let index = IndexStore::open(&config.index_path)
        .with_context(|| format!("Failed to open index {}", config.index_path.display()))?;
    let image = BlockDevice::open(&config.image_path)
        .with_context(|| format!("Failed to open disk image {}", config.image_path.display()))?;

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_dir.display()
        )
    })?;
    let materializer = DirectoryMaterializer::new(&config.output_dir);

    let mut restorer =
        ExtentRestorer::new(&catalog, &image, &materializer, config.options.clone());
    restorer.set_event_callback(on_event);

    let report = restorer.run(&index).context("Restore aborted")?;
    Ok(report)
}
