//! Mate-aware external sorting of BAM records.
//!
//! Output order:
//!
//! 1. Mapped records by reference index, then alignment start.
//! 2. Unmapped records by the bases of their mate, first-of-pair before second-of-pair.
//!
//! Placing an unmapped read next to others whose mates carry the same bases needs the
//! mate, which may sit anywhere in the input. A second, independent cursor over the input
//! runs ahead of the sort and keeps a bounded window of mate bases keyed by query name
//! ([`MateLookupCache`]). Each record is keyed exactly once as it is accepted, so the
//! comparator itself never touches I/O.
//!
//! # Modules
//!
//! - [`record`]: the fields of a record the order depends on
//! - [`codec`]: record bytes for spill files
//! - [`mate_cache`]: mate-bases lookup over a forward-only secondary stream
//! - [`keys`]: the sort key, its ordering and its spill encoding
//! - [`spill`]: keyed spill file writer and prefetching reader
//! - [`external`]: the accept / spill / merge engine
//! - [`pipeline`]: drivers from records or files to a sink, and order verification
//!
//! # Example
//!
//! ```no_run
//! use matesort_lib::sort::{MateAwareSort, SortOptions};
//! use std::path::{Path, PathBuf};
//!
//! let options = SortOptions::default()
//!     .max_records_in_ram(2_000_000)
//!     .temp_dir(PathBuf::from("/scratch"))
//!     .threads(8);
//!
//! MateAwareSort::new()
//!     .options(options)
//!     .sort(Path::new("input.bam"), Path::new("sorted.bam"))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod codec;
pub mod external;
pub mod keys;
pub mod mate_cache;
pub mod pipeline;
pub mod record;
pub mod spill;

pub use codec::BamRecordCodec;
pub use external::{
    DEFAULT_MAX_RECORDS_IN_RAM, DEFAULT_TEMP_COMPRESSION, ExternalSorter, SortOptions, SortPhase,
    SortStats, SortedRecords,
};
pub use keys::{KeyClass, MateAwareKey, SpillKey, compare_records};
pub use mate_cache::{DEFAULT_MATE_WINDOW, MateIndex, MateLookup, MateLookupCache};
pub use pipeline::{
    DEFAULT_COMPRESSION_LEVEL, MateAwareSort, RecordSink, VerifyStats, sort_records,
    verify_records, verify_sorted,
};
pub use record::{MateSelector, SortFields};
