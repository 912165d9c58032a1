//! Sort-relevant view of an alignment record.
//!
//! The sorter never needs more of a record than its placement (mapped or not, and where),
//! its mate role within the pair, its query name and its bases. [`SortFields`] borrows
//! exactly those out of a [`RecordBuf`] so the comparator and the mate cache agree on
//! what "mapped" and "first of pair" mean.

use std::fmt;

use bstr::ByteSlice;
use noodles::sam::alignment::record_buf::RecordBuf;

/// Which end of a read pair is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MateSelector {
    /// The read with the first-segment flag set.
    First,
    /// The read without the first-segment flag.
    Second,
}

impl MateSelector {
    /// The role a record plays in its pair.
    ///
    /// Records lacking the first-segment flag are treated as second of pair.
    #[must_use]
    pub fn of(record: &RecordBuf) -> Self {
        if record.flags().is_first_segment() { Self::First } else { Self::Second }
    }

    /// The role of the record's mate.
    #[must_use]
    pub fn mate_of(record: &RecordBuf) -> Self {
        Self::of(record).opposite()
    }

    /// The other end of the pair.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

impl fmt::Display for MateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first-of-pair"),
            Self::Second => f.write_str("second-of-pair"),
        }
    }
}

/// The fields of a record that determine its sort position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortFields<'a> {
    /// 0-based reference index, when present.
    pub reference_index: Option<usize>,
    /// 0-based alignment start, when present.
    pub position: Option<usize>,
    /// The unmapped flag (0x4).
    pub is_unmapped: bool,
    /// The first-segment flag (0x40).
    pub is_first_of_pair: bool,
    /// Neither secondary (0x100) nor supplementary (0x800).
    pub is_primary: bool,
    /// Query name, `None` when the record has none.
    pub name: Option<&'a [u8]>,
    /// Read bases as stored in the record.
    pub bases: &'a [u8],
}

impl<'a> SortFields<'a> {
    /// Borrow the sort-relevant fields of `record`.
    #[must_use]
    pub fn from_record(record: &'a RecordBuf) -> Self {
        let flags = record.flags();
        Self {
            reference_index: record.reference_sequence_id(),
            position: record.alignment_start().map(|p| usize::from(p) - 1),
            is_unmapped: flags.is_unmapped(),
            is_first_of_pair: flags.is_first_segment(),
            is_primary: !flags.is_secondary() && !flags.is_supplementary(),
            name: record.name().map(|n| <_ as AsRef<[u8]>>::as_ref(n)),
            bases: record.sequence().as_ref(),
        }
    }

    /// A record is mapped when the unmapped flag is clear and it has both a reference
    /// index and a position. Anything else sorts with the unmapped reads.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        !self.is_unmapped && self.reference_index.is_some() && self.position.is_some()
    }

    /// `(reference index, 0-based position)` for mapped records.
    #[must_use]
    pub fn mapped_coordinate(&self) -> Option<(usize, usize)> {
        if self.is_mapped() {
            Some((self.reference_index?, self.position?))
        } else {
            None
        }
    }

    /// The mate role whose bases anchor this record when it is unmapped.
    #[must_use]
    pub fn mate_selector(&self) -> MateSelector {
        if self.is_first_of_pair { MateSelector::Second } else { MateSelector::First }
    }

    /// Query name for log and error messages, `*` when absent.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name.map_or_else(|| "*".to_string(), |n| n.to_str_lossy().into_owned())
    }
}
