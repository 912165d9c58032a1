//! Drives a record stream through the sort engine into a sink.
//!
//! [`sort_records`] is the generic driver: records in, mate lookup and sink supplied by
//! the caller. [`MateAwareSort`] wires it to files: it validates the paths, opens the
//! primary and secondary cursors over the input, writes the output header and removes
//! a partially written output when anything fails. [`verify_sorted`] re-derives the keys
//! of a finished output and counts records out of order.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use log::{debug, info, warn};
use noodles::sam::Header;
use noodles::sam::alignment::record_buf::RecordBuf;

use crate::bam_io::{BamInput, BamSink, is_stdin_path};
use crate::header::{create_output_header, is_mate_sorted};
use crate::logging::{OperationTimer, format_count};
use crate::progress::ProgressLogger;
use crate::sort::external::{ExternalSorter, SortOptions, SortStats};
use crate::sort::keys::MateAwareKey;
use crate::sort::mate_cache::{DEFAULT_MATE_WINDOW, MateIndex, MateLookup, MateLookupCache};
use crate::sort::record::SortFields;
use crate::validation::{validate_file_readable, validate_output_writable, validate_positive};

/// Default BGZF level of the sorted output.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// Destination of sorted records.
pub trait RecordSink {
    /// Accept the next record in sorted order.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    fn write_record(&mut self, record: RecordBuf) -> Result<()>;

    /// Flush and close the sink. Called once, after the last record.
    ///
    /// # Errors
    /// Returns an error if buffered output cannot be flushed.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<RecordBuf> {
    fn write_record(&mut self, record: RecordBuf) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Sort `records` into `sink`.
///
/// Every record is keyed through `lookup` as it is accepted. Read and write progress are
/// logged every 10,000,000 records.
///
/// # Errors
///
/// Returns the first error from the input, the lookup, the engine or the sink. Temporary
/// files are removed before returning.
pub fn sort_records<I, L, S>(
    records: I,
    header: &Header,
    lookup: L,
    sink: &mut S,
    options: &SortOptions,
) -> Result<SortStats>
where
    I: IntoIterator<Item = Result<RecordBuf>>,
    L: MateLookup,
    S: RecordSink + ?Sized,
{
    let mut sorter = ExternalSorter::new(header.clone(), lookup, options)?;

    let mut read_progress = ProgressLogger::new("Read", "records");
    for record in records {
        let record = record?;
        read_progress.record(&record, header);
        sorter.add(record)?;
    }
    read_progress.log_final();

    let mut sorted = sorter.finish()?;
    let mut write_progress = ProgressLogger::new("Wrote", "records");
    for record in sorted.by_ref() {
        let record = record?;
        write_progress.record(&record, header);
        sink.write_record(record)?;
    }
    write_progress.log_final();
    sink.finish()?;

    let stats = sorted.stats();
    if stats.records_written != stats.records_read {
        bail!(
            "Sort lost records: read {} but wrote {}",
            stats.records_read,
            stats.records_written
        );
    }
    Ok(stats)
}

/// File-to-file mate-aware sort.
///
/// # Example
/// ```no_run
/// use matesort_lib::sort::{MateAwareSort, SortOptions};
/// use std::path::Path;
///
/// let stats = MateAwareSort::new()
///     .options(SortOptions::default().max_records_in_ram(1_000_000).threads(4))
///     .mate_window(250_000)
///     .sort(Path::new("in.bam"), Path::new("out.bam"))?;
/// println!("{} records", stats.records_written);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MateAwareSort {
    options: SortOptions,
    mate_window: usize,
    compression_level: u32,
    version: String,
    command_line: String,
}

impl Default for MateAwareSort {
    fn default() -> Self {
        Self {
            options: SortOptions::default(),
            mate_window: DEFAULT_MATE_WINDOW,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            version: env!("CARGO_PKG_VERSION").to_string(),
            command_line: "matesort sort".to_string(),
        }
    }
}

impl MateAwareSort {
    /// A file sort with default options, mate window and output compression.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine options (batch size, temp dir, threads, spill compression).
    #[must_use]
    pub fn options(mut self, options: SortOptions) -> Self {
        self.options = options;
        self
    }

    /// Distinct query names the mate scan may run ahead of a pending lookup.
    #[must_use]
    pub fn mate_window(mut self, window: usize) -> Self {
        self.mate_window = window;
        self
    }

    /// BGZF level of the output BAM.
    #[must_use]
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Version and command line recorded in the output's @PG record.
    #[must_use]
    pub fn program_info(
        mut self,
        version: impl Into<String>,
        command_line: impl Into<String>,
    ) -> Self {
        self.version = version.into();
        self.command_line = command_line.into();
        self
    }

    /// Sort `input` into `output`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options or paths, an unreadable input, an unresolvable
    /// mate, or any write failure. A partially written `output` is deleted first.
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortStats> {
        validate_positive(self.mate_window, "mate-window")?;
        self.options.validate()?;
        if is_stdin_path(input) {
            bail!("Input must be a file, not stdin: the mate scan reads it a second time");
        }
        validate_file_readable(input, "Input BAM")?;
        validate_output_writable(output, input, "Output BAM")?;

        let timer = OperationTimer::new("Sorting by mate-aware order");
        let result = self.run(input, output);
        match &result {
            Ok(stats) => timer.log_completion(stats.records_written),
            Err(_) => remove_partial_output(output),
        }
        result
    }

    fn run(&self, input: &Path, output: &Path) -> Result<SortStats> {
        info!("Input:  {}", input.display());
        info!("Output: {}", output.display());

        let bam = BamInput::open(input, self.options.threads)?;
        let output_header = create_output_header(bam.header(), &self.version, &self.command_line)?;

        let mut cache = MateLookupCache::new(bam.open_secondary()?, self.mate_window)?;
        let mut sink =
            BamSink::create(output, output_header, self.options.threads, self.compression_level)?;

        let stats =
            sort_records(bam.open_primary()?, bam.header(), &mut cache, &mut sink, &self.options)?;

        debug!(
            "Mate scan: {} records in {} query names, {} window evictions",
            format_count(cache.records_scanned()),
            format_count(cache.batches_scanned()),
            format_count(cache.evictions())
        );
        Ok(stats)
    }
}

fn remove_partial_output(output: &Path) {
    if !output.exists() {
        return;
    }
    match fs::remove_file(output) {
        Ok(()) => info!("Removed partial output {}", output.display()),
        Err(e) => warn!("Failed to remove partial output {}: {e}", output.display()),
    }
}

/// Outcome of [`verify_sorted`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyStats {
    /// Records examined.
    pub records_checked: u64,
    /// Records that sort before their predecessor.
    pub violations: u64,
    /// 1-based record number and name of the first violation.
    pub first_violation: Option<(u64, String)>,
    /// Whether the header declares the mate-aware order.
    pub header_declares_order: bool,
}

impl VerifyStats {
    /// True when no record is out of order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.violations == 0
    }
}

/// Check that a BAM file is in mate-aware order.
///
/// Sorted output places the two unmapped mates of a pair far apart, so no bounded
/// forward scan can resolve them. Mates are instead resolved from a [`MateIndex`] built
/// in two extra passes over the file, holding the bases of every pair with an unmapped
/// read.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a mate is missing from the file.
pub fn verify_sorted(input: &Path) -> Result<VerifyStats> {
    validate_file_readable(input, "Input BAM")?;

    let bam = BamInput::open(input, 1)?;
    let index = MateIndex::from_unmapped_pairs(bam.open_secondary()?, bam.open_secondary()?)?;
    debug!("Mate index holds {} mate sequences", format_count(index.len() as u64));
    let mut stats = verify_records(bam.open_primary()?, index)?;
    stats.header_declares_order = is_mate_sorted(bam.header());
    Ok(stats)
}

/// Count adjacent records of `records` that are out of mate-aware order.
///
/// Ties are allowed; only a record strictly less than its predecessor is a violation.
///
/// # Errors
///
/// Returns the first error from the input or the lookup.
pub fn verify_records<I, L>(records: I, mut lookup: L) -> Result<VerifyStats>
where
    I: IntoIterator<Item = Result<RecordBuf>>,
    L: MateLookup,
{
    let mut stats = VerifyStats::default();
    let mut previous: Option<MateAwareKey> = None;

    for record in records {
        let record = record?;
        let key = MateAwareKey::from_record(&record, stats.records_checked, &mut lookup)?;
        stats.records_checked += 1;

        if previous.as_ref().is_some_and(|prev| key.cmp_ignoring_ordinal(prev) == Ordering::Less)
        {
            stats.violations += 1;
            if stats.first_violation.is_none() {
                let name = SortFields::from_record(&record).display_name();
                stats.first_violation = Some((stats.records_checked, name));
            }
        }
        previous = Some(key);
    }
    Ok(stats)
}
