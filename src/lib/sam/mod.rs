//! SAM/BAM helpers shared by the library and its tests.
//!
//! [`builder`] constructs records, pairs, headers and small BAM files without going
//! through text SAM.

pub mod builder;

pub use builder::{RecordBuilder, build_pair, create_header, parse_cigar, write_bam};
