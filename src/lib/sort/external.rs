//! External merge sort over alignment records in the mate-aware order.
//!
//! # Algorithm
//!
//! 1. **Accept**: key each record as it arrives (the only point the mate lookup is
//!    consulted) and buffer it with its key.
//! 2. **Spill**: once `max_records_in_ram` records are buffered and another arrives, sort
//!    the buffer (in parallel with rayon when `threads > 1`) and write it to a keyed spill
//!    file.
//! 3. **Drain**: on [`ExternalSorter::finish`], either sort the buffer and hand it back
//!    directly (nothing was spilled), or flush it as a final spill file and k-way merge
//!    all spill files through a binary heap.
//!
//! Spill files live in a private [`TempDir`]. Each one is deleted as soon as the merge has
//! consumed it and the directory itself goes away when the drain completes, or when
//! either the sorter or the drain iterator is dropped, whatever the phase.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use noodles::sam::Header;
use noodles::sam::alignment::record_buf::RecordBuf;
use rayon::prelude::*;
use tempfile::TempDir;

use crate::errors::MateSortError;
use crate::logging::format_count;
use crate::sort::codec::BamRecordCodec;
use crate::sort::keys::{MateAwareKey, SpillKey};
use crate::sort::mate_cache::MateLookup;
use crate::sort::record::SortFields;
use crate::sort::spill::{SpillReader, SpillWriter};

/// Default number of records buffered before spilling.
pub const DEFAULT_MAX_RECORDS_IN_RAM: usize = 500_000;

/// Default BGZF level for spill files (fast).
pub const DEFAULT_TEMP_COMPRESSION: u32 = 1;

/// Highest BGZF compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 12;

/// Tunables for the sort engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOptions {
    /// Records buffered in memory before a spill.
    pub max_records_in_ram: usize,
    /// Parent directory for the private spill directory; system temp when `None`.
    pub temp_dir: Option<PathBuf>,
    /// Threads for in-memory sorting and spill compression.
    pub threads: usize,
    /// Spill file compression: 0 for none, 1-12 for BGZF.
    pub temp_compression: u32,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            max_records_in_ram: DEFAULT_MAX_RECORDS_IN_RAM,
            temp_dir: None,
            threads: 1,
            temp_compression: DEFAULT_TEMP_COMPRESSION,
        }
    }
}

impl SortOptions {
    /// Set the number of records buffered before spilling.
    #[must_use]
    pub fn max_records_in_ram(mut self, n: usize) -> Self {
        self.max_records_in_ram = n;
        self
    }

    /// Set the parent directory for spill files.
    #[must_use]
    pub fn temp_dir(mut self, path: PathBuf) -> Self {
        self.temp_dir = Some(path);
        self
    }

    /// Set the number of threads.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Set the spill file compression level.
    #[must_use]
    pub fn temp_compression(mut self, level: u32) -> Self {
        self.temp_compression = level;
        self
    }

    /// Check the options before any work is done.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::InvalidParameter`] for a zero batch size or an
    /// out-of-range compression level.
    pub fn validate(&self) -> crate::errors::Result<()> {
        if self.max_records_in_ram == 0 {
            return Err(MateSortError::InvalidParameter {
                parameter: "max-records-in-ram".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.temp_compression > MAX_COMPRESSION_LEVEL {
            return Err(MateSortError::InvalidParameter {
                parameter: "temp-compression".to_string(),
                reason: format!("must be between 0 and {MAX_COMPRESSION_LEVEL}"),
            });
        }
        Ok(())
    }

    /// Create the private spill directory.
    fn create_temp_dir(&self) -> Result<TempDir> {
        match &self.temp_dir {
            Some(base) => {
                fs::create_dir_all(base).with_context(|| {
                    format!("Failed to create temp directory: {}", base.display())
                })?;
                tempfile::Builder::new().prefix("matesort.").tempdir_in(base).with_context(|| {
                    format!("Failed to create temp directory in {}", base.display())
                })
            }
            None => tempfile::Builder::new()
                .prefix("matesort.")
                .tempdir()
                .context("Failed to create temp directory"),
        }
    }
}

/// Where a sort run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPhase {
    /// Records are being added.
    Accepting,
    /// Sorted records are being handed out.
    Draining,
    /// Every record has been handed out (or the drain failed).
    Exhausted,
}

/// Counters from a sort run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SortStats {
    /// Records accepted.
    pub records_read: u64,
    /// Accepted records keyed by their mate's bases.
    pub unmapped_records: u64,
    /// Records handed out in sorted order.
    pub records_written: u64,
    /// Spill files written.
    pub spill_files: usize,
}

/// Accepting side of the sort engine.
///
/// The mate lookup is borrowed for the whole accepting phase: every unmapped record is
/// keyed through it as it is added, and nothing after [`ExternalSorter::finish`] needs it.
pub struct ExternalSorter<L: MateLookup> {
    codec: BamRecordCodec,
    lookup: L,
    max_records_in_ram: usize,
    threads: usize,
    temp_compression: u32,
    batch: Vec<(MateAwareKey, RecordBuf)>,
    spill_files: Vec<PathBuf>,
    records_added: u64,
    unmapped_added: u64,
    encode_buf: Vec<u8>,
    temp_dir: TempDir,
}

impl<L: MateLookup> ExternalSorter<L> {
    /// Create a sorter for records described by `header`.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the spill directory cannot be
    /// created.
    pub fn new(header: Header, lookup: L, options: &SortOptions) -> Result<Self> {
        options.validate()?;
        let temp_dir = options.create_temp_dir()?;
        debug!("Spill directory: {}", temp_dir.path().display());
        Ok(Self {
            codec: BamRecordCodec::new(header),
            lookup,
            max_records_in_ram: options.max_records_in_ram,
            threads: options.threads.max(1),
            temp_compression: options.temp_compression,
            batch: Vec::new(),
            spill_files: Vec::new(),
            records_added: 0,
            unmapped_added: 0,
            encode_buf: Vec::new(),
            temp_dir,
        })
    }

    /// Always [`SortPhase::Accepting`]; draining happens on [`SortedRecords`].
    #[must_use]
    pub fn phase(&self) -> SortPhase {
        SortPhase::Accepting
    }

    /// Records added so far.
    #[must_use]
    pub fn records_added(&self) -> u64 {
        self.records_added
    }

    /// Spill files written so far.
    #[must_use]
    pub fn spill_count(&self) -> usize {
        self.spill_files.len()
    }

    /// The private spill directory.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The mate lookup records are keyed through.
    #[must_use]
    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Add one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be keyed (malformed, or its mate cannot be
    /// resolved) or if spilling the full buffer fails.
    pub fn add(&mut self, record: RecordBuf) -> Result<()> {
        if self.batch.len() >= self.max_records_in_ram {
            self.spill_batch()?;
        }
        let key = MateAwareKey::from_record(&record, self.records_added, &mut self.lookup)
            .with_context(|| {
                format!(
                    "Failed to compute sort key for record '{}'",
                    SortFields::from_record(&record).display_name()
                )
            })?;
        self.records_added += 1;
        if !key.is_mapped() {
            self.unmapped_added += 1;
        }
        self.batch.push((key, record));
        Ok(())
    }

    fn sort_batch(&mut self) {
        if self.threads > 1 {
            self.batch.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));
        } else {
            self.batch.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        }
    }

    /// Sort the buffer and write it to a new spill file.
    fn spill_batch(&mut self) -> Result<()> {
        self.sort_batch();
        let path = self.temp_dir.path().join(format!("spill_{:04}.bin", self.spill_files.len()));
        let mut writer =
            SpillWriter::<MateAwareKey>::create(&path, self.temp_compression, self.threads)?;
        for (key, record) in self.batch.drain(..) {
            self.codec.encode_into(&record, &mut self.encode_buf).with_context(|| {
                format!(
                    "Failed to encode record '{}' for spilling",
                    SortFields::from_record(&record).display_name()
                )
            })?;
            writer.write_record(&key, &self.encode_buf)?;
        }
        let written = writer.finish()?;
        debug!("Spilled {} records to {}", format_count(written), path.display());
        self.spill_files.push(path);
        Ok(())
    }

    /// Signal the end of input and start draining.
    ///
    /// # Errors
    ///
    /// Returns an error if the final spill or opening the spill files fails.
    pub fn finish(mut self) -> Result<SortedRecords> {
        let records_read = self.records_added;

        if self.spill_files.is_empty() {
            self.sort_batch();
            debug!("Sorted {} records in memory", format_count(records_read));
            let batch = std::mem::take(&mut self.batch);
            return Ok(SortedRecords {
                source: DrainSource::InMemory(batch.into_iter()),
                phase: SortPhase::Draining,
                records_read,
                unmapped_records: self.unmapped_added,
                records_written: 0,
                spill_files: 0,
                temp_dir: Some(self.temp_dir),
            });
        }

        if !self.batch.is_empty() {
            self.spill_batch()?;
        }
        info!(
            "Merging {} spill files holding {} records",
            self.spill_files.len(),
            format_count(records_read)
        );
        let merger = SpillMerger::open(&self.spill_files, self.codec)?;
        Ok(SortedRecords {
            source: DrainSource::Merge(merger),
            phase: SortPhase::Draining,
            records_read,
            unmapped_records: self.unmapped_added,
            records_written: 0,
            spill_files: self.spill_files.len(),
            temp_dir: Some(self.temp_dir),
        })
    }
}

enum DrainSource {
    InMemory(std::vec::IntoIter<(MateAwareKey, RecordBuf)>),
    Merge(SpillMerger<MateAwareKey>),
    Exhausted,
}

/// Draining side of the sort engine: the records in sorted order.
///
/// Yields `Err` at most once; after an error, or after the last record, the phase is
/// [`SortPhase::Exhausted`], the spill directory is gone and `next()` returns `None`.
pub struct SortedRecords {
    // Declared before `temp_dir` so open spill readers are dropped first.
    source: DrainSource,
    phase: SortPhase,
    records_read: u64,
    unmapped_records: u64,
    records_written: u64,
    spill_files: usize,
    temp_dir: Option<TempDir>,
}

impl SortedRecords {
    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SortPhase {
        self.phase
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SortStats {
        SortStats {
            records_read: self.records_read,
            unmapped_records: self.unmapped_records,
            records_written: self.records_written,
            spill_files: self.spill_files,
        }
    }

    /// The spill directory, while it still exists.
    #[must_use]
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    fn exhaust(&mut self) {
        self.source = DrainSource::Exhausted;
        self.phase = SortPhase::Exhausted;
        if let Some(dir) = self.temp_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove temp directory {}: {}", path.display(), e);
            }
        }
    }
}

impl Iterator for SortedRecords {
    type Item = Result<RecordBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match &mut self.source {
            DrainSource::InMemory(records) => Ok(records.next().map(|(_, record)| record)),
            DrainSource::Merge(merger) => merger.next_record(),
            DrainSource::Exhausted => return None,
        };
        match next {
            Ok(Some(record)) => {
                self.records_written += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.exhaust();
                None
            }
            Err(e) => {
                self.exhaust();
                Some(Err(e))
            }
        }
    }
}

/// Entry in the merge heap: a key, its still-encoded record, and the file it came from.
struct HeapEntry<K> {
    key: K,
    record: Vec<u8>,
    source: usize,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// K-way merge over spill files.
struct SpillMerger<K: SpillKey> {
    codec: BamRecordCodec,
    readers: Vec<Option<SpillReader<K>>>,
    heap: BinaryHeap<Reverse<HeapEntry<K>>>,
}

impl<K: SpillKey> SpillMerger<K> {
    fn open(paths: &[PathBuf], codec: BamRecordCodec) -> Result<Self> {
        let mut merger = Self {
            codec,
            readers: Vec::with_capacity(paths.len()),
            heap: BinaryHeap::with_capacity(paths.len()),
        };
        for path in paths {
            merger.readers.push(Some(SpillReader::open(path)?));
        }
        for source in 0..merger.readers.len() {
            merger.advance(source)?;
        }
        Ok(merger)
    }

    /// Pull the next entry of `source` into the heap, deleting the file once it is spent.
    fn advance(&mut self, source: usize) -> Result<()> {
        let Some(reader) = self.readers[source].as_mut() else {
            return Ok(());
        };
        match reader.next_record()? {
            Some((key, record)) => self.heap.push(Reverse(HeapEntry { key, record, source })),
            None => {
                if let Some(reader) = self.readers[source].take() {
                    let path = reader.path().to_path_buf();
                    drop(reader);
                    fs::remove_file(&path)
                        .map_err(|e| MateSortError::spill_io(&path, "delete", e))?;
                }
            }
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<RecordBuf>> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(entry.source)?;
        let record = self.codec.decode(&entry.record).context("Failed to decode spilled record")?;
        Ok(Some(record))
    }
}
