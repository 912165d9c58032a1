//! Progress logging for record streams.
//!
//! The logger counts records as they pass and logs a line each time the count reaches a
//! multiple of its interval, naming the position of the record that crossed it.

use bstr::ByteSlice;
use log::info;
use noodles::sam::Header;
use noodles::sam::alignment::record_buf::RecordBuf;

use crate::logging::format_count;

/// Default number of records between progress lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000_000;

/// Interval progress logger for a single record stream.
///
/// # Example
/// ```
/// use matesort_lib::progress::ProgressLogger;
/// use matesort_lib::sam::builder::{RecordBuilder, create_header};
///
/// let header = create_header(&[("chr1", 1_000)]);
/// let record = RecordBuilder::mapped_read().sequence("ACGT").alignment_start(10).build();
///
/// let mut progress = ProgressLogger::new("Read", "records").with_interval(2);
/// assert!(!progress.record(&record, &header));
/// assert!(progress.record(&record, &header)); // Logs "Read 2 records. Last position: chr1:10"
/// progress.log_final();                        // No log, 2 is on the interval
/// ```
pub struct ProgressLogger {
    verb: String,
    noun: String,
    interval: u64,
    count: u64,
}

impl ProgressLogger {
    /// Create a logger with the default interval of 10,000,000 records.
    #[must_use]
    pub fn new(verb: impl Into<String>, noun: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            noun: noun.into(),
            interval: DEFAULT_PROGRESS_INTERVAL,
            count: 0,
        }
    }

    /// Set the logging interval. An interval of zero is treated as one.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Count one record, logging if the count lands on the interval.
    ///
    /// Returns `true` when a progress line was logged.
    pub fn record(&mut self, record: &RecordBuf, header: &Header) -> bool {
        self.count += 1;
        if !self.count.is_multiple_of(self.interval) {
            return false;
        }
        info!(
            "{} {} {}. Last position: {}",
            self.verb,
            format_count(self.count),
            self.noun,
            describe_position(record, header)
        );
        true
    }

    /// Log the final count unless the last [`ProgressLogger::record`] call already did.
    pub fn log_final(&self) {
        if self.count > 0 && !self.count.is_multiple_of(self.interval) {
            info!("{} {} {} (complete)", self.verb, format_count(self.count), self.noun);
        }
    }

    /// Records counted so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// `name:position` (1-based) for placed records, `*/*` for unplaced ones.
fn describe_position(record: &RecordBuf, header: &Header) -> String {
    let reference = record
        .reference_sequence_id()
        .and_then(|id| header.reference_sequences().get_index(id))
        .map(|(name, _)| name.to_str_lossy().into_owned());

    match (reference, record.alignment_start()) {
        (Some(name), Some(start)) => format!("{name}:{}", usize::from(start)),
        _ => "*/*".to_string(),
    }
}
