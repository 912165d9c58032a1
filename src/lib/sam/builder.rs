//! Builders for constructing test records, headers and BAM files.
//!
//! ```rust
//! use matesort_lib::sam::builder::{RecordBuilder, create_header};
//!
//! let header = create_header(&[("chr1", 1_000)]);
//! let record = RecordBuilder::mapped_read()
//!     .name("q1")
//!     .sequence("ACGTACGT")
//!     .alignment_start(100)
//!     .first_segment(true)
//!     .build();
//!
//! assert_eq!(header.reference_sequences().len(), 1);
//! assert_eq!(record.reference_sequence_id(), Some(0));
//! ```

use anyhow::{Context, Result};
use bstr::BString;
use noodles::bam;
use noodles::core::Position;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record::{Flags, MappingQuality};
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;
use noodles::sam::alignment::record_buf::{QualityScores, RecordBuf, Sequence};
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::ReferenceSequence;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::Path;

pub const DEFAULT_BASE_QUALITY: u8 = 30;
pub const DEFAULT_MAPQ: u8 = 60;

/// Creates a header with the given `(name, length)` reference sequences and no sort order.
///
/// # Panics
///
/// Panics if any length is zero.
#[must_use]
pub fn create_header(references: &[(&str, usize)]) -> Header {
    let mut builder = Header::builder();
    for &(name, length) in references {
        let length = NonZeroUsize::new(length).expect("reference length must be non-zero");
        let map = Map::<ReferenceSequence>::new(length);
        builder = builder.add_reference_sequence(BString::from(name), map);
    }
    builder.build()
}

/// Writes `records` to a BGZF-compressed BAM at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or a record cannot be encoded.
pub fn write_bam(path: &Path, header: &Header, records: &[RecordBuf]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create BAM file: {}", path.display()))?;
    let mut writer = bam::io::Writer::new(file);
    writer.write_header(header)?;
    for record in records {
        writer.write_alignment_record(header, record)?;
    }
    Ok(())
}

/// Builds a read pair: the first-of-pair record and the second-of-pair record.
///
/// `r1` and `r2` are `(reference index, 1-based start)` when mapped, `None` when unmapped.
/// Mate fields and the mate-unmapped flags are filled in from the other end.
#[must_use]
pub fn build_pair(
    name: &str,
    r1: Option<(usize, usize)>,
    r1_bases: &str,
    r2: Option<(usize, usize)>,
    r2_bases: &str,
) -> (RecordBuf, RecordBuf) {
    let end = |first: bool,
               this: Option<(usize, usize)>,
               other: Option<(usize, usize)>,
               bases: &str| {
        let mut builder = match this {
            Some((reference, start)) => RecordBuilder::mapped_read()
                .reference_sequence_id(reference)
                .alignment_start(start),
            None => RecordBuilder::new().unmapped(true),
        };
        builder = builder.name(name).sequence(bases).first_segment(first);
        let builder = match other {
            Some((reference, start)) => {
                builder.mate_reference_sequence_id(reference).mate_alignment_start(start)
            }
            None => builder.mate_unmapped(true),
        };
        builder.build()
    };
    (end(true, r1, r2, r1_bases), end(false, r2, r1, r2_bases))
}

/// Builder for individual records.
///
/// Every field has a default; mapped records get a `{len}M` CIGAR when none is given.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    name: Option<Vec<u8>>,
    flags: Flags,
    reference_sequence_id: Option<usize>,
    alignment_start: Option<usize>,
    mapping_quality: Option<u8>,
    cigar: Option<String>,
    sequence: Vec<u8>,
    qualities: Vec<u8>,
    tags: Vec<(Tag, BufValue)>,
    mate_reference_sequence_id: Option<usize>,
    mate_alignment_start: Option<usize>,
    template_length: Option<i32>,
}

impl RecordBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { mapping_quality: Some(DEFAULT_MAPQ), ..Self::default() }
    }

    /// A mapped read on reference 0 with mapping quality 60.
    #[must_use]
    pub fn mapped_read() -> Self {
        Self { reference_sequence_id: Some(0), ..Self::new() }
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.as_bytes().to_vec());
        self
    }

    /// Sets the bases; qualities default to 30 when not already set.
    #[must_use]
    pub fn sequence(mut self, seq: &str) -> Self {
        self.sequence = seq.as_bytes().to_vec();
        if self.qualities.is_empty() {
            self.qualities = vec![DEFAULT_BASE_QUALITY; seq.len()];
        }
        self
    }

    /// Sets raw Phred quality scores.
    #[must_use]
    pub fn qualities(mut self, quals: &[u8]) -> Self {
        self.qualities = quals.to_vec();
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn paired(mut self, paired: bool) -> Self {
        self.flags.set(Flags::SEGMENTED, paired);
        self
    }

    /// Marks the read as first (`true`) or second (`false`) of a pair. Implies paired.
    #[must_use]
    pub fn first_segment(mut self, is_first: bool) -> Self {
        self.flags.set(Flags::SEGMENTED, true);
        self.flags.set(Flags::FIRST_SEGMENT, is_first);
        self.flags.set(Flags::LAST_SEGMENT, !is_first);
        self
    }

    #[must_use]
    pub fn unmapped(mut self, unmapped: bool) -> Self {
        self.flags.set(Flags::UNMAPPED, unmapped);
        self
    }

    #[must_use]
    pub fn reverse_complement(mut self, reverse: bool) -> Self {
        self.flags.set(Flags::REVERSE_COMPLEMENTED, reverse);
        self
    }

    #[must_use]
    pub fn secondary(mut self, secondary: bool) -> Self {
        self.flags.set(Flags::SECONDARY, secondary);
        self
    }

    #[must_use]
    pub fn supplementary(mut self, supplementary: bool) -> Self {
        self.flags.set(Flags::SUPPLEMENTARY, supplementary);
        self
    }

    /// Sets the reference sequence ID (0-based).
    #[must_use]
    pub fn reference_sequence_id(mut self, id: usize) -> Self {
        self.reference_sequence_id = Some(id);
        self
    }

    /// Sets the alignment start position (1-based).
    #[must_use]
    pub fn alignment_start(mut self, pos: usize) -> Self {
        self.alignment_start = Some(pos);
        self
    }

    #[must_use]
    pub fn mapping_quality(mut self, mapq: u8) -> Self {
        self.mapping_quality = Some(mapq);
        self
    }

    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = Some(cigar.to_string());
        self
    }

    #[must_use]
    pub fn mate_reference_sequence_id(mut self, id: usize) -> Self {
        self.mate_reference_sequence_id = Some(id);
        self
    }

    /// Sets the mate alignment start position (1-based).
    #[must_use]
    pub fn mate_alignment_start(mut self, pos: usize) -> Self {
        self.mate_alignment_start = Some(pos);
        self
    }

    #[must_use]
    pub fn template_length(mut self, tlen: i32) -> Self {
        self.template_length = Some(tlen);
        self
    }

    #[must_use]
    pub fn mate_unmapped(mut self, unmapped: bool) -> Self {
        self.flags.set(Flags::MATE_UNMAPPED, unmapped);
        self
    }

    /// Adds a two-letter SAM tag; other tag lengths are ignored.
    #[must_use]
    pub fn tag<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        if let [a, b] = tag.as_bytes() {
            self.tags.push((Tag::from([*a, *b]), value.into()));
        }
        self
    }

    /// # Panics
    ///
    /// Panics on a zero position, an invalid mapping quality or a malformed CIGAR.
    #[must_use]
    pub fn build(self) -> RecordBuf {
        let mut record = RecordBuf::default();

        if let Some(name) = self.name {
            *record.name_mut() = Some(name.into());
        }
        *record.flags_mut() = self.flags;
        *record.reference_sequence_id_mut() = self.reference_sequence_id;
        *record.alignment_start_mut() = self
            .alignment_start
            .map(|pos| Position::try_from(pos).expect("alignment_start must be >= 1"));
        *record.mate_reference_sequence_id_mut() = self.mate_reference_sequence_id;
        *record.mate_alignment_start_mut() = self
            .mate_alignment_start
            .map(|pos| Position::try_from(pos).expect("mate_alignment_start must be >= 1"));
        if let Some(tlen) = self.template_length {
            *record.template_length_mut() = tlen;
        }
        if let Some(mapq) = self.mapping_quality {
            *record.mapping_quality_mut() =
                Some(MappingQuality::try_from(mapq).expect("mapping_quality must be valid"));
        }

        let cigar = match self.cigar {
            Some(cigar) => Some(cigar),
            None if !self.flags.is_unmapped() && !self.sequence.is_empty() => {
                Some(format!("{}M", self.sequence.len()))
            }
            None => None,
        };
        if let Some(cigar) = cigar {
            *record.cigar_mut() = parse_cigar(&cigar).into_iter().collect();
        }

        *record.sequence_mut() = Sequence::from(self.sequence);
        *record.quality_scores_mut() = QualityScores::from(self.qualities);

        for (tag, value) in self.tags {
            record.data_mut().insert(tag, value);
        }

        record
    }
}

/// Parses a CIGAR string into operations.
///
/// # Panics
///
/// Panics on a missing length or an unknown operation.
#[must_use]
pub fn parse_cigar(cigar: &str) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut len = String::new();

    for c in cigar.chars() {
        if c.is_ascii_digit() {
            len.push(c);
            continue;
        }
        let n: usize = len.parse().expect("Invalid CIGAR: expected number");
        let kind = match c {
            'M' => Kind::Match,
            'I' => Kind::Insertion,
            'D' => Kind::Deletion,
            'N' => Kind::Skip,
            'S' => Kind::SoftClip,
            'H' => Kind::HardClip,
            'P' => Kind::Pad,
            '=' => Kind::SequenceMatch,
            'X' => Kind::SequenceMismatch,
            _ => panic!("Unknown CIGAR operation: {c}"),
        };
        ops.push(Op::new(kind, n));
        len.clear();
    }

    ops
}
