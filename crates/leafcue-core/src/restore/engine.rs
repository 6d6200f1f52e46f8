/// Extent reconstruction engine
///
/// Walks the leaf index in key order and turns every EXTENT_DATA record whose
/// generation matches its inode into file content: inline extents are written
/// from the record itself, regular extents are read from the disk image.
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use super::materialize::Materializer;
use super::report::{FileWrite, RecordFailure, RestoreReport};
use crate::catalog::InodeCatalog;
use crate::error::{RestoreError, Result};
use crate::fs::btrfs::{
    BtrfsExtentLocation, BtrfsFileExtentItem, ExtentType, LeafRecord, RecordLocator,
    BTRFS_EXTENT_DATA_KEY,
};
use crate::fs::common::DiskImage;
use crate::index_store::LeafSource;

/// What a record-scoped failure does to the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Stop at the first failure
    #[default]
    Abort,
    /// Record the failure in the report and continue
    Skip,
}

/// How many bytes a regular extent contributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadLength {
    /// The inode's declared size from the extent's disk start, written as the
    /// whole file. Only right for single-extent files.
    #[default]
    InodeSize,
    /// The extent's own logical range, written at the record's file offset
    ExtentLength,
}

/// Restore engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreOptions {
    pub error_policy: ErrorPolicy,
    pub read_length: ReadLength,
    /// Classify sequentially, then apply writes on the rayon pool
    pub parallel: bool,
}

/// Result of processing one index record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Not file extent data
    Ignored { item_type: u8 },
    /// Written in a different generation than the catalog's inode
    Stale {
        inode: u64,
        record_generation: u64,
        inode_generation: u64,
    },
    /// Owner is a directory or other non-file inode
    NotFile { inode: u64 },
    Preallocated { inode: u64 },
    Unsupported { inode: u64, extent_type: u8 },
    Written(FileWrite),
}

/// Where the bytes of a planned write come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    Inline(Vec<u8>),
    Disk { offset: u64, length: u64 },
    Zeroes(u64),
}

/// A checked, not yet performed write
#[derive(Debug, Clone)]
pub struct WritePlan {
    pub locator: RecordLocator,
    pub path: String,
    /// `None` replaces the whole file
    pub file_offset: Option<u64>,
    pub source: PlanSource,
    pub raw_encoded: bool,
}

#[derive(Debug)]
pub enum Classified {
    Done(RecordOutcome),
    Write(WritePlan),
}

/// Progress notifications
#[derive(Debug, Clone, Copy)]
pub enum RestoreEvent<'e> {
    Started { total_records: Option<u64> },
    DirectoryCreated(&'e str),
    RecordProcessed { records_seen: u64 },
    FileWritten(&'e FileWrite),
}

type EventCallback = Box<dyn Fn(RestoreEvent<'_>) + Send + Sync>;

pub struct ExtentRestorer<'a> {
    catalog: &'a InodeCatalog,
    image: &'a dyn DiskImage,
    materializer: &'a dyn Materializer,
    options: RestoreOptions,
    /// Paths already written this run, for offset writes
    touched: HashSet<String>,
    event_callback: Option<EventCallback>,
}

impl<'a> ExtentRestorer<'a> {
    pub fn new(
        catalog: &'a InodeCatalog,
        image: &'a dyn DiskImage,
        materializer: &'a dyn Materializer,
        options: RestoreOptions,
    ) -> Self {
        Self {
            catalog,
            image,
            materializer,
            options,
            touched: HashSet::new(),
            event_callback: None,
        }
    }

    pub fn set_event_callback<F>(&mut self, callback: F)
    where
        F: Fn(RestoreEvent<'_>) + Send + Sync + 'static,
    {
        self.event_callback = Some(Box::new(callback));
    }

    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    /// Create every catalog directory, then restore all records from `source`
    pub fn run(&mut self, source: &dyn LeafSource) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        self.emit(RestoreEvent::Started {
            total_records: source.len_hint(),
        });

        self.create_directories(&mut report)?;
        tracing::info!("Created {} directories", report.directories_created);

        if self.options.parallel {
            self.run_parallel(source, &mut report)?;
        } else {
            self.run_sequential(source, &mut report)?;
        }

        tracing::info!("Restore finished: {}", report.summary());
        Ok(report)
    }

    /// Create all non-file catalog entries
    pub fn create_directories(&self, report: &mut RestoreReport) -> Result<()> {
        for dir in self.catalog.directories() {
            match self.materializer.create_dir(&dir.full_path) {
                Ok(()) => {
                    report.directories_created += 1;
                    self.emit(RestoreEvent::DirectoryCreated(&dir.full_path));
                }
                Err(err) => self.contain(err, report, |e| RecordFailure {
                    key: String::new(),
                    objectid: Some(dir.inode),
                    error: e.to_string(),
                })?,
            }
        }
        Ok(())
    }

    /// Classify and, when due, write one record
    pub fn process_record(&mut self, key: &[u8], value: &[u8]) -> Result<RecordOutcome> {
        match self.classify(key, value)? {
            Classified::Done(outcome) => Ok(outcome),
            Classified::Write(plan) => {
                let fresh = self.touched.insert(plan.path.clone());
                Ok(RecordOutcome::Written(self.apply(&plan, fresh)?))
            }
        }
    }

    /// Decide what a record contributes without touching the image or output
    pub fn classify(&self, key: &[u8], value: &[u8]) -> Result<Classified> {
        let record = LeafRecord::parse(key, value)?;
        let locator = record.locator;

        if locator.item_type != BTRFS_EXTENT_DATA_KEY {
            return Ok(Classified::Done(RecordOutcome::Ignored {
                item_type: locator.item_type,
            }));
        }
        tracing::debug!("{}", record.describe());

        let extent = BtrfsFileExtentItem::parse(record.payload)?;
        let inode = self.catalog.lookup(locator.objectid)?;
        let trailer = &record.payload[BtrfsFileExtentItem::SIZE..];
        let raw_encoded = extent.is_compressed() || extent.is_encrypted();

        // Checked for every inline extent, stale or not
        if extent.extent_type == ExtentType::Inline && extent.ram_bytes != trailer.len() as u64 {
            return Err(RestoreError::IntegrityMismatch {
                inode: locator.objectid,
                declared: extent.ram_bytes,
                actual: trailer.len() as u64,
            });
        }

        if locator.generation != inode.generation {
            tracing::debug!(
                "Skipping stale extent for inode {} (record gen {}, inode gen {})",
                locator.objectid,
                locator.generation,
                inode.generation
            );
            return Ok(Classified::Done(RecordOutcome::Stale {
                inode: locator.objectid,
                record_generation: locator.generation,
                inode_generation: inode.generation,
            }));
        }

        if !inode.is_file {
            return Ok(Classified::Done(RecordOutcome::NotFile {
                inode: locator.objectid,
            }));
        }

        let file_offset = match self.options.read_length {
            ReadLength::InodeSize => None,
            ReadLength::ExtentLength => Some(locator.offset),
        };

        let source = match extent.extent_type {
            ExtentType::Inline => PlanSource::Inline(trailer.to_vec()),
            ExtentType::Regular => {
                let location = BtrfsExtentLocation::parse(trailer)?;
                tracing::debug!("  extent location {:?}", location);
                self.regular_source(&location, inode.size, raw_encoded)?
            }
            ExtentType::Prealloc => {
                return Ok(Classified::Done(RecordOutcome::Preallocated {
                    inode: locator.objectid,
                }))
            }
            ExtentType::Unknown(extent_type) => {
                tracing::warn!(
                    "Unknown extent type {} for inode {}",
                    extent_type,
                    locator.objectid
                );
                return Ok(Classified::Done(RecordOutcome::Unsupported {
                    inode: locator.objectid,
                    extent_type,
                }));
            }
        };

        Ok(Classified::Write(WritePlan {
            locator,
            path: inode.full_path.clone(),
            file_offset,
            source,
            raw_encoded,
        }))
    }

    fn regular_source(
        &self,
        location: &BtrfsExtentLocation,
        inode_size: u64,
        raw_encoded: bool,
    ) -> Result<PlanSource> {
        // No disk backing: a sparse range reads back as zeroes
        if location.disk_bytenr == 0 {
            return Ok(match self.options.read_length {
                ReadLength::InodeSize => PlanSource::Zeroes(inode_size),
                ReadLength::ExtentLength => PlanSource::Zeroes(location.num_bytes),
            });
        }

        let source = match self.options.read_length {
            ReadLength::InodeSize => PlanSource::Disk {
                offset: location.disk_bytenr,
                length: inode_size,
            },
            // Encoded extents are only meaningful as a whole
            ReadLength::ExtentLength if raw_encoded => PlanSource::Disk {
                offset: location.disk_bytenr,
                length: location.disk_num_bytes,
            },
            ReadLength::ExtentLength => PlanSource::Disk {
                offset: location
                    .disk_bytenr
                    .checked_add(location.offset)
                    .ok_or(RestoreError::ImageRange {
                        offset: location.disk_bytenr,
                        length: location.num_bytes,
                        size: self.image.size(),
                    })?,
                length: location.num_bytes,
            },
        };
        Ok(source)
    }

    /// Perform a planned write; `fresh` truncates before an offset write
    pub fn apply(&self, plan: &WritePlan, fresh: bool) -> Result<FileWrite> {
        let zeroes: Vec<u8>;
        let data: &[u8] = match &plan.source {
            PlanSource::Inline(bytes) => bytes.as_slice(),
            PlanSource::Disk { offset, length } => {
                tracing::debug!("Reading offset {} and length {}", offset, length);
                let length = self.buffer_len(*offset, *length)?;
                self.image.read_bytes(*offset, length)?
            }
            PlanSource::Zeroes(length) => {
                zeroes = vec![0u8; self.buffer_len(0, *length)?];
                &zeroes
            }
        };

        match plan.file_offset {
            None => self.materializer.write_file(&plan.path, data)?,
            Some(offset) => {
                if fresh {
                    self.materializer.write_file(&plan.path, &[])?;
                }
                self.materializer.write_range(&plan.path, offset, data)?;
            }
        }

        if plan.raw_encoded {
            tracing::warn!(
                "Extent of inode {} is compressed or encrypted; wrote stored bytes to {}",
                plan.locator.objectid,
                plan.path
            );
        }
        tracing::info!(
            "[GEN:{}] Wrote {} bytes to {}",
            plan.locator.generation,
            data.len(),
            plan.path
        );

        Ok(FileWrite {
            inode: plan.locator.objectid,
            generation: plan.locator.generation,
            path: plan.path.clone(),
            file_offset: plan.file_offset,
            length: data.len() as u64,
            sha256: format!("{:x}", Sha256::digest(data)),
            raw_encoded: plan.raw_encoded,
        })
    }

    fn buffer_len(&self, offset: u64, length: u64) -> Result<usize> {
        usize::try_from(length).map_err(|_| RestoreError::ImageRange {
            offset,
            length,
            size: self.image.size(),
        })
    }

    fn run_sequential(&mut self, source: &dyn LeafSource, report: &mut RestoreReport) -> Result<()> {
        source.for_each_leaf(&mut |key, value| {
            report.records_seen += 1;
            match self.process_record(key, value) {
                Ok(outcome) => self.tally(report, outcome),
                Err(err) => self.contain(err, report, |e| RecordFailure::new(key, e))?,
            }
            self.emit(RestoreEvent::RecordProcessed {
                records_seen: report.records_seen,
            });
            Ok(())
        })
    }

    fn run_parallel(&self, source: &dyn LeafSource, report: &mut RestoreReport) -> Result<()> {
        let mut plans = Vec::new();
        source.for_each_leaf(&mut |key, value| {
            report.records_seen += 1;
            match self.classify(key, value) {
                Ok(Classified::Write(plan)) => {
                    report.extent_records += 1;
                    plans.push(plan);
                }
                Ok(Classified::Done(outcome)) => self.tally(report, outcome),
                Err(err) => self.contain(err, report, |e| RecordFailure::new(key, e))?,
            }
            self.emit(RestoreEvent::RecordProcessed {
                records_seen: report.records_seen,
            });
            Ok(())
        })?;

        tracing::info!("Applying {} planned writes in parallel", plans.len());

        // One batch per destination, in first-seen order; batches run
        // concurrently, writes within a batch keep key order
        let mut order: Vec<String> = Vec::new();
        let mut batches: HashMap<String, Vec<WritePlan>> = HashMap::new();
        for plan in plans {
            if !batches.contains_key(&plan.path) {
                order.push(plan.path.clone());
            }
            batches.entry(plan.path.clone()).or_default().push(plan);
        }
        let batches: Vec<Vec<WritePlan>> = order
            .iter()
            .filter_map(|path| batches.remove(path))
            .collect();

        let results: Vec<Vec<(RecordLocator, Result<FileWrite>)>> = batches
            .par_iter()
            .map(|batch| {
                let mut applied = Vec::with_capacity(batch.len());
                for (idx, plan) in batch.iter().enumerate() {
                    let result = self.apply(plan, idx == 0);
                    let failed = result.is_err();
                    applied.push((plan.locator, result));
                    if failed {
                        break;
                    }
                }
                applied
            })
            .collect();

        for (locator, result) in results.into_iter().flatten() {
            match result {
                Ok(write) => self.record_written(report, write),
                Err(err) => {
                    self.contain(err, report, |e| RecordFailure::new(&locator.to_bytes(), e))?
                }
            }
        }
        Ok(())
    }

    fn tally(&self, report: &mut RestoreReport, outcome: RecordOutcome) {
        if !matches!(outcome, RecordOutcome::Ignored { .. }) {
            report.extent_records += 1;
        }
        match outcome {
            RecordOutcome::Ignored { .. } => {}
            RecordOutcome::Stale { .. } => report.stale_records += 1,
            RecordOutcome::NotFile { .. } => report.non_file_records += 1,
            RecordOutcome::Preallocated { .. } => report.preallocated_records += 1,
            RecordOutcome::Unsupported { .. } => report.unsupported_records += 1,
            RecordOutcome::Written(write) => self.record_written(report, write),
        }
    }

    fn record_written(&self, report: &mut RestoreReport, write: FileWrite) {
        self.emit(RestoreEvent::FileWritten(&write));
        report.record_write(write);
    }

    /// Apply the error policy: keep going past record-scoped failures when
    /// skipping, otherwise hand the error back
    fn contain<F>(&self, err: RestoreError, report: &mut RestoreReport, failure: F) -> Result<()>
    where
        F: FnOnce(&RestoreError) -> RecordFailure,
    {
        if self.options.error_policy == ErrorPolicy::Skip && err.is_per_record() {
            let failure = failure(&err);
            tracing::warn!("Skipping record {}: {}", failure.key, err);
            report.failures.push(failure);
            Ok(())
        } else {
            Err(err)
        }
    }

    fn emit(&self, event: RestoreEvent<'_>) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InodeRecord;
    use crate::fs::btrfs::{
        BtrfsItem, BtrfsKey, BTRFS_FIRST_FREE_OBJECTID, BTRFS_FS_TREE_OBJECTID,
        BTRFS_INODE_ITEM_KEY,
    };
    use crate::restore::materialize::MemoryMaterializer;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn file(inode: u64, generation: u64, path: &str, size: u64) -> InodeRecord {
        InodeRecord {
            generation,
            inode,
            parent_inode: BTRFS_FIRST_FREE_OBJECTID,
            name: path.to_string(),
            is_file: true,
            full_path: path.to_string(),
            size,
        }
    }

    fn dir(inode: u64, path: &str) -> InodeRecord {
        InodeRecord {
            is_file: false,
            ..file(inode, 1, path, 0)
        }
    }

    fn header(extent_type: ExtentType, ram_bytes: u64) -> BtrfsFileExtentItem {
        BtrfsFileExtentItem {
            generation: 1,
            ram_bytes,
            compression: 0,
            encryption: 0,
            other_encoding: 0,
            extent_type,
        }
    }

    fn record(
        inode: u64,
        generation: u64,
        file_offset: u64,
        extent: BtrfsFileExtentItem,
        trailer: &[u8],
    ) -> (Vec<u8>, Vec<u8>) {
        let locator = RecordLocator {
            owner: BTRFS_FS_TREE_OBJECTID,
            item_type: BTRFS_EXTENT_DATA_KEY,
            objectid: inode,
            offset: file_offset,
            generation,
        };
        let key = BtrfsKey {
            objectid: inode,
            item_type: BTRFS_EXTENT_DATA_KEY,
            offset: file_offset,
        };
        let mut payload = extent.to_bytes();
        payload.extend_from_slice(trailer);
        (locator.to_bytes(), BtrfsItem::encode_value(key, 0, &payload))
    }

    fn inline(inode: u64, generation: u64, data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        record(inode, generation, 0, header(ExtentType::Inline, data.len() as u64), data)
    }

    fn regular(
        inode: u64,
        generation: u64,
        file_offset: u64,
        location: BtrfsExtentLocation,
    ) -> (Vec<u8>, Vec<u8>) {
        record(
            inode,
            generation,
            file_offset,
            header(ExtentType::Regular, location.num_bytes),
            &location.to_bytes(),
        )
    }

    fn source(records: Vec<(Vec<u8>, Vec<u8>)>) -> BTreeMap<Vec<u8>, Vec<u8>> {
        records.into_iter().collect()
    }

    fn image_with(offset: usize, data: &[u8]) -> Vec<u8> {
        let mut image = vec![0xEEu8; offset + data.len() + 4096];
        image[offset..offset + data.len()].copy_from_slice(data);
        image
    }

    #[test]
    fn test_inline_extent_written() {
        let catalog = InodeCatalog::load(vec![file(257, 5, "a.txt", 5)]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let report = restorer.run(&source(vec![inline(257, 5, b"hello")])).unwrap();

        assert_eq!(out.file("a.txt").unwrap(), b"hello");
        assert_eq!(report.extent_records, 1);
        assert_eq!(report.writes.len(), 1);
        assert_eq!(
            report.writes[0].sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_stale_generation_skipped() {
        let catalog = InodeCatalog::load(vec![file(257, 5, "a.txt", 5)]);
        let image = image_with(4096, b"0123456789");
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let location = BtrfsExtentLocation {
            disk_bytenr: 4096,
            disk_num_bytes: 4096,
            offset: 0,
            num_bytes: 5,
        };
        let report = restorer
            .run(&source(vec![
                inline(257, 4, b"hello"),
                regular(257, 6, 0, location),
            ]))
            .unwrap();

        assert!(out.snapshot().files.is_empty());
        assert_eq!(report.stale_records, 2);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_regular_extent_reads_inode_size() {
        let catalog = InodeCatalog::load(vec![file(258, 7, "b.bin", 10)]);
        let image = image_with(4096, b"0123456789");
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let location = BtrfsExtentLocation {
            disk_bytenr: 4096,
            disk_num_bytes: 4096,
            offset: 0,
            num_bytes: 4096,
        };
        restorer.run(&source(vec![regular(258, 7, 0, location)])).unwrap();

        assert_eq!(out.file("b.bin").unwrap(), b"0123456789");
    }

    #[test]
    fn test_integrity_mismatch_aborts() {
        let catalog = InodeCatalog::load(vec![file(257, 5, "a.txt", 6)]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let bad = record(257, 5, 0, header(ExtentType::Inline, 6), b"hello");
        let err = restorer.run(&source(vec![bad])).unwrap_err();

        assert!(matches!(
            err,
            RestoreError::IntegrityMismatch { inode: 257, declared: 6, actual: 5 }
        ));
        assert!(out.snapshot().files.is_empty());
    }

    #[test]
    fn test_skip_policy_contains_record_failures() {
        let catalog = InodeCatalog::load(vec![
            file(257, 5, "a.txt", 6),
            file(259, 5, "c.txt", 2),
        ]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let options = RestoreOptions {
            error_policy: ErrorPolicy::Skip,
            ..Default::default()
        };
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, options);

        let bad = record(257, 5, 0, header(ExtentType::Inline, 6), b"hello");
        let orphan = inline(258, 5, b"lost");
        let good = inline(259, 5, b"ok");
        let report = restorer.run(&source(vec![bad, orphan, good])).unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].objectid, Some(257));
        assert_eq!(report.failures[1].objectid, Some(258));
        assert_eq!(out.file("c.txt").unwrap(), b"ok");
        assert!(out.file("a.txt").is_none());
    }

    #[test]
    fn test_unknown_inode_aborts() {
        let catalog = InodeCatalog::load(vec![]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let err = restorer.run(&source(vec![inline(300, 1, b"x")])).unwrap_err();
        assert!(matches!(err, RestoreError::NotFound { inode: 300 }));
    }

    #[test]
    fn test_image_errors_stay_fatal_when_skipping() {
        let catalog = InodeCatalog::load(vec![file(258, 7, "b.bin", 10)]);
        let image = vec![0u8; 100];
        let out = MemoryMaterializer::new();
        let options = RestoreOptions {
            error_policy: ErrorPolicy::Skip,
            ..Default::default()
        };
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, options);

        let location = BtrfsExtentLocation {
            disk_bytenr: 4096,
            disk_num_bytes: 4096,
            offset: 0,
            num_bytes: 10,
        };
        let err = restorer.run(&source(vec![regular(258, 7, 0, location)])).unwrap_err();
        assert!(matches!(err, RestoreError::ImageRange { offset: 4096, .. }));
    }

    #[test]
    fn test_non_extent_records_ignored() {
        let catalog = InodeCatalog::load(vec![]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let locator = RecordLocator {
            owner: BTRFS_FS_TREE_OBJECTID,
            item_type: BTRFS_INODE_ITEM_KEY,
            objectid: 999,
            offset: 0,
            generation: 1,
        };
        let key = BtrfsKey {
            objectid: 999,
            item_type: BTRFS_INODE_ITEM_KEY,
            offset: 0,
        };
        let value = BtrfsItem::encode_value(key, 0, &[0u8; 160]);

        let outcome = restorer.process_record(&locator.to_bytes(), &value).unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Ignored {
                item_type: BTRFS_INODE_ITEM_KEY
            }
        );
    }

    #[test]
    fn test_truncated_extent_header() {
        let catalog = InodeCatalog::load(vec![file(257, 5, "a.txt", 5)]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let (key, _) = inline(257, 5, b"hello");
        let item_key = BtrfsKey {
            objectid: 257,
            item_type: BTRFS_EXTENT_DATA_KEY,
            offset: 0,
        };
        let value = BtrfsItem::encode_value(item_key, 0, &[0u8; 12]);

        let err = restorer.process_record(&key, &value).unwrap_err();
        assert!(matches!(
            err,
            RestoreError::TruncatedInput { needed: 21, actual: 12, .. }
        ));
    }

    #[test]
    fn test_preallocated_and_directory_extents() {
        let catalog = InodeCatalog::load(vec![file(257, 5, "a.txt", 4096), dir(258, "docs")]);
        let image = vec![0u8; 8192];
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let location = BtrfsExtentLocation {
            disk_bytenr: 4096,
            disk_num_bytes: 4096,
            offset: 0,
            num_bytes: 4096,
        };
        let prealloc = record(
            257,
            5,
            0,
            header(ExtentType::Prealloc, 4096),
            &location.to_bytes(),
        );
        let on_dir = record(258, 1, 0, header(ExtentType::Inline, 2), b"xx");

        let report = restorer.run(&source(vec![prealloc, on_dir])).unwrap();

        assert_eq!(report.preallocated_records, 1);
        assert_eq!(report.non_file_records, 1);
        assert!(out.snapshot().files.is_empty());
        assert_eq!(out.snapshot().directories, vec!["docs".to_string()]);
    }

    #[test]
    fn test_compressed_inline_written_raw() {
        let catalog = InodeCatalog::load(vec![file(257, 5, "a.txt", 4096)]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let mut extent = header(ExtentType::Inline, 2);
        extent.compression = 1;
        let report = restorer
            .run(&source(vec![record(257, 5, 0, extent, b"\x78\x9c")]))
            .unwrap();

        assert_eq!(out.file("a.txt").unwrap(), b"\x78\x9c");
        assert_eq!(report.raw_encoded_records, 1);
        assert!(report.writes[0].raw_encoded);
    }

    #[test]
    fn test_compressed_inline_size_mismatch_aborts() {
        let catalog = InodeCatalog::load(vec![file(257, 5, "a.txt", 6)]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let mut extent = header(ExtentType::Inline, 6);
        extent.compression = 1;
        let (key, value) = record(257, 5, 0, extent, b"hello");
        let err = restorer.process_record(&key, &value).unwrap_err();

        assert!(matches!(
            err,
            RestoreError::IntegrityMismatch { inode: 257, declared: 6, actual: 5 }
        ));
        assert!(out.file("a.txt").is_none());

        // Encrypted extents get no exemption either
        let mut extent = header(ExtentType::Inline, 6);
        extent.encryption = 1;
        let (key, value) = record(257, 5, 0, extent, b"hello");
        assert!(matches!(
            restorer.process_record(&key, &value),
            Err(RestoreError::IntegrityMismatch { .. })
        ));
        assert!(out.snapshot().files.is_empty());
    }

    #[test]
    fn test_extent_length_assembles_multi_extent_file() {
        let catalog = InodeCatalog::load(vec![file(260, 9, "big.bin", 12)]);
        let mut image = vec![0u8; 12288];
        image[4096..4100].copy_from_slice(b"AAAA");
        image[8192..8200].copy_from_slice(b"xxBBBByy");
        let out = MemoryMaterializer::new();
        let options = RestoreOptions {
            read_length: ReadLength::ExtentLength,
            ..Default::default()
        };
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, options);

        let first = BtrfsExtentLocation {
            disk_bytenr: 4096,
            disk_num_bytes: 4096,
            offset: 0,
            num_bytes: 4,
        };
        let hole = BtrfsExtentLocation {
            disk_bytenr: 0,
            disk_num_bytes: 0,
            offset: 0,
            num_bytes: 4,
        };
        let third = BtrfsExtentLocation {
            disk_bytenr: 8192,
            disk_num_bytes: 4096,
            offset: 2,
            num_bytes: 4,
        };
        let report = restorer
            .run(&source(vec![
                regular(260, 9, 0, first),
                regular(260, 9, 4, hole),
                regular(260, 9, 8, third),
            ]))
            .unwrap();

        assert_eq!(out.file("big.bin").unwrap(), b"AAAA\0\0\0\0BBBB");
        assert_eq!(report.files_restored(), 1);
        assert_eq!(report.writes[2].file_offset, Some(8));
    }

    #[test]
    fn test_hole_only_file_written_as_zeroes() {
        let catalog = InodeCatalog::load(vec![file(260, 9, "sparse.bin", 8)]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let hole = BtrfsExtentLocation {
            disk_bytenr: 0,
            disk_num_bytes: 0,
            offset: 0,
            num_bytes: 4096,
        };
        let outcome = {
            let (key, value) = regular(260, 9, 0, hole);
            restorer.process_record(&key, &value).unwrap()
        };

        match outcome {
            RecordOutcome::Written(write) => {
                assert_eq!(write.length, 8);
                assert_eq!(write.file_offset, None);
            }
            other => panic!("expected a write, got {:?}", other),
        }
        assert_eq!(out.file("sparse.bin").unwrap(), vec![0u8; 8]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let catalog = InodeCatalog::load(vec![
            dir(256, "docs"),
            file(257, 5, "docs/a.txt", 5),
            file(258, 7, "b.bin", 10),
            file(259, 3, "c.txt", 2),
        ]);
        let image = image_with(4096, b"0123456789");
        let location = BtrfsExtentLocation {
            disk_bytenr: 4096,
            disk_num_bytes: 4096,
            offset: 0,
            num_bytes: 4096,
        };
        let records = source(vec![
            inline(257, 5, b"hello"),
            regular(258, 7, 0, location),
            inline(259, 2, b"no"),
            inline(259, 3, b"ok"),
        ]);

        let sequential_out = MemoryMaterializer::new();
        let sequential = ExtentRestorer::new(&catalog, &image, &sequential_out, RestoreOptions::default())
            .run(&records)
            .unwrap();

        let parallel_out = MemoryMaterializer::new();
        let options = RestoreOptions {
            parallel: true,
            ..Default::default()
        };
        let parallel = ExtentRestorer::new(&catalog, &image, &parallel_out, options)
            .run(&records)
            .unwrap();

        assert_eq!(sequential_out.snapshot().files, parallel_out.snapshot().files);
        assert_eq!(sequential.writes, parallel.writes);
        assert_eq!(sequential.stale_records, parallel.stale_records);
        assert_eq!(parallel.extent_records, 4);
    }

    #[test]
    fn test_events_reported() {
        let catalog = InodeCatalog::load(vec![dir(256, "docs"), file(257, 5, "a.txt", 5)]);
        let image: Vec<u8> = Vec::new();
        let out = MemoryMaterializer::new();
        let mut restorer = ExtentRestorer::new(&catalog, &image, &out, RestoreOptions::default());

        let written = Arc::new(AtomicUsize::new(0));
        let dirs = Arc::new(AtomicUsize::new(0));
        let (written_cb, dirs_cb) = (written.clone(), dirs.clone());
        restorer.set_event_callback(move |event| match event {
            RestoreEvent::FileWritten(_) => {
                written_cb.fetch_add(1, Ordering::SeqCst);
            }
            RestoreEvent::DirectoryCreated(_) => {
                dirs_cb.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        });

        restorer.run(&source(vec![inline(257, 5, b"hello")])).unwrap();
        assert_eq!(written.load(Ordering::SeqCst), 1);
        assert_eq!(dirs.load(Ordering::SeqCst), 1);
    }
}
