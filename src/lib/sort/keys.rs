//! Sort keys for the mate-aware order.
//!
//! The order is:
//!
//! 1. Mapped records, by reference index then 0-based position.
//! 2. Unmapped records (including any record lacking a reference or position), by the
//!    bases of their **mate**, then first-of-pair before second-of-pair.
//!
//! Ties left after that are broken by the order in which the engine accepted the
//! records, so no two records compare equal and repeated runs agree.
//!
//! Resolving the mate bases is the only part that needs the outside world. It happens
//! once, in [`MateAwareKey::from_record`]; the [`Ord`] impl afterwards is a pure function
//! of the two keys. Keys are serialized next to each spilled record ([`SpillKey`]) so the
//! merge never has to consult the lookup again.

use std::cmp::Ordering;
use std::io::{self, Read, Write};

use anyhow::Result;
use noodles::sam::alignment::record_buf::RecordBuf;

use crate::errors::MateSortError;
use crate::sort::mate_cache::MateLookup;
use crate::sort::record::{MateSelector, SortFields};

const MAPPED_TAG: u8 = 0;
const UNMAPPED_TAG: u8 = 1;

/// Keys that can be written beside a record in a spill file.
pub trait SpillKey: Ord + Send + Sized + 'static {
    /// Serialize the key.
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Deserialize a key written by [`SpillKey::write_to`].
    ///
    /// Returns `Ok(None)` on a clean end of stream (no bytes before the key).
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>>;
}

/// Placement part of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyClass {
    /// Mapped: ordered by reference, then position.
    Mapped {
        /// 0-based reference index.
        reference_index: u64,
        /// 0-based alignment start.
        position: u64,
    },
    /// Unmapped: ordered by the mate's bases, then by the record's own role.
    Unmapped {
        /// Bases of the other end of the pair.
        mate_bases: Vec<u8>,
        /// This record's role; first-of-pair sorts before second-of-pair.
        role: MateSelector,
    },
}

/// Full sort key: placement plus encounter ordinal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MateAwareKey {
    /// Placement.
    pub class: KeyClass,
    /// Position of the record in the engine's input.
    pub ordinal: u64,
}

impl MateAwareKey {
    /// Build the key for `record`, asking `lookup` for mate bases when it is unmapped.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::MalformedRecord`] for an unmapped record without a query
    /// name, and whatever `lookup` returns when the mate cannot be resolved.
    pub fn from_record<L: MateLookup + ?Sized>(
        record: &RecordBuf,
        ordinal: u64,
        lookup: &mut L,
    ) -> Result<Self> {
        let fields = SortFields::from_record(record);
        if let Some((reference_index, position)) = fields.mapped_coordinate() {
            return Ok(Self {
                class: KeyClass::Mapped {
                    reference_index: reference_index as u64,
                    position: position as u64,
                },
                ordinal,
            });
        }

        let Some(name) = fields.name else {
            return Err(MateSortError::MalformedRecord {
                name: fields.display_name(),
                reason: "unmapped record has no query name, so its mate cannot be found"
                    .to_string(),
            }
            .into());
        };
        let mate_bases = lookup.mate_bases(name, fields.mate_selector())?;
        Ok(Self {
            class: KeyClass::Unmapped { mate_bases, role: MateSelector::of(record) },
            ordinal,
        })
    }

    /// True for mapped records.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        matches!(self.class, KeyClass::Mapped { .. })
    }

    /// Compare placement only, as two independent runs would see it.
    #[must_use]
    pub fn cmp_ignoring_ordinal(&self, other: &Self) -> Ordering {
        self.class.cmp(&other.class)
    }
}

/// Compare two records under the mate-aware order, without an ordinal tie-break.
///
/// Both records are keyed through `lookup`. With a streaming [`MateLookupCache`] each
/// unmapped record should be keyed only once, so this is meant for index-backed lookups.
///
/// # Errors
///
/// See [`MateAwareKey::from_record`].
///
/// [`MateLookupCache`]: crate::sort::mate_cache::MateLookupCache
pub fn compare_records<L: MateLookup + ?Sized>(
    a: &RecordBuf,
    b: &RecordBuf,
    lookup: &mut L,
) -> Result<Ordering> {
    let a = MateAwareKey::from_record(a, 0, lookup)?;
    let b = MateAwareKey::from_record(b, 0, lookup)?;
    Ok(a.cmp_ignoring_ordinal(&b))
}

/// Read one byte, returning `None` at end of stream.
fn read_tag<R: Read>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

impl SpillKey for MateAwareKey {
    // Format: [tag: u8] then
    //   mapped:   [reference: u64][position: u64]
    //   unmapped: [role: u8][len: u32][bases]
    // then [ordinal: u64]
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match &self.class {
            KeyClass::Mapped { reference_index, position } => {
                writer.write_all(&[MAPPED_TAG])?;
                writer.write_all(&reference_index.to_le_bytes())?;
                writer.write_all(&position.to_le_bytes())?;
            }
            KeyClass::Unmapped { mate_bases, role } => {
                let len = u32::try_from(mate_bases.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "mate bases longer than u32::MAX")
                })?;
                let role = match role {
                    MateSelector::First => 0u8,
                    MateSelector::Second => 1u8,
                };
                writer.write_all(&[UNMAPPED_TAG, role])?;
                writer.write_all(&len.to_le_bytes())?;
                writer.write_all(mate_bases)?;
            }
        }
        writer.write_all(&self.ordinal.to_le_bytes())
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let Some(tag) = read_tag(reader)? else {
            return Ok(None);
        };
        let class = match tag {
            MAPPED_TAG => {
                let reference_index = read_u64(reader)?;
                let position = read_u64(reader)?;
                KeyClass::Mapped { reference_index, position }
            }
            UNMAPPED_TAG => {
                let mut head = [0u8; 5];
                reader.read_exact(&mut head)?;
                let role = match head[0] {
                    0 => MateSelector::First,
                    1 => MateSelector::Second,
                    other => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid mate role byte {other} in spill key"),
                        ));
                    }
                };
                let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
                let mut mate_bases = vec![0u8; len];
                reader.read_exact(&mut mate_bases)?;
                KeyClass::Unmapped { mate_bases, role }
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid spill key tag {other}"),
                ));
            }
        };
        let ordinal = read_u64(reader)?;
        Ok(Some(Self { class, ordinal }))
    }
}
