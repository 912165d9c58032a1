//! Mate-bases lookup over a second, forward-only traversal of the input.
//!
//! Unmapped reads are ordered by the bases of their mate, which lives somewhere else in
//! the input. [`MateLookupCache`] answers "what are the bases of the first/second read
//! named X" by scanning its own reader ahead in query-name batches and remembering
//! what it saw in an LRU window. It never rewinds.
//!
//! # Cache lifecycle
//!
//! Each distinct query name gets one [`MateEntry`] holding the primary bases of each end
//! seen so far and the number of lookups still expected (one per unmapped record with
//! that name). An entry leaves the cache as soon as both ends are known and no lookups
//! are outstanding, or when the window pushes it out. A lookup fails with
//! [`MateSortError::OrphanedMate`] when the requested end has not turned up within
//! `window` query names of the name's first sighting, or by the end of the input.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use log::debug;
use lru::LruCache;
use noodles::sam::alignment::record_buf::RecordBuf;

use crate::errors::MateSortError;
use crate::sort::record::{MateSelector, SortFields};

/// Default number of distinct query names the lookup window spans.
pub const DEFAULT_MATE_WINDOW: usize = 500_000;

/// Source of mate bases for unmapped records.
///
/// This is the context object the sort engine consults while keying records. It is
/// queried once per unmapped record, in input order.
pub trait MateLookup {
    /// Return the bases of the `selector` end of the pair named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::OrphanedMate`] (wrapped in `anyhow`) when the mate cannot
    /// be found, or an I/O error from the underlying scan.
    fn mate_bases(&mut self, name: &[u8], selector: MateSelector) -> Result<Vec<u8>>;
}

impl<T: MateLookup + ?Sized> MateLookup for &mut T {
    fn mate_bases(&mut self, name: &[u8], selector: MateSelector) -> Result<Vec<u8>> {
        (**self).mate_bases(name, selector)
    }
}

/// Groups consecutive records that share a query name.
///
/// Records without a name are yielded as single-record batches.
pub struct QueryNameBatches<I> {
    records: I,
    pending: Option<RecordBuf>,
}

impl<I> QueryNameBatches<I>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    /// Wrap a record iterator.
    pub fn new(records: I) -> Self {
        Self { records, pending: None }
    }
}

impl<I> Iterator for QueryNameBatches<I>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    type Item = Result<Vec<RecordBuf>>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.pending.take() {
            Some(record) => record,
            None => match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            },
        };

        if first.name().is_none() {
            return Some(Ok(vec![first]));
        }

        let mut batch = vec![first];
        loop {
            match self.records.next() {
                None => break,
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(record)) => {
                    if record.name() == batch[0].name() {
                        batch.push(record);
                    } else {
                        self.pending = Some(record);
                        break;
                    }
                }
            }
        }
        Some(Ok(batch))
    }
}

/// What the cache knows about one query name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MateEntry {
    first: Option<Vec<u8>>,
    second: Option<Vec<u8>>,
    pending_lookups: u64,
    first_seen_batch: u64,
}

impl MateEntry {
    fn bases(&self, selector: MateSelector) -> Option<&[u8]> {
        match selector {
            MateSelector::First => self.first.as_deref(),
            MateSelector::Second => self.second.as_deref(),
        }
    }

    fn is_complete(&self) -> bool {
        self.first.is_some() && self.second.is_some()
    }

    fn is_settled(&self) -> bool {
        self.is_complete() && self.pending_lookups == 0
    }

    /// Fold another batch of records with this name into the entry.
    fn absorb(&mut self, batch: &[RecordBuf]) {
        for record in batch {
            let fields = SortFields::from_record(record);
            if !fields.is_mapped() {
                self.pending_lookups += 1;
            }
            if !fields.is_primary {
                continue;
            }
            let slot = if fields.is_first_of_pair { &mut self.first } else { &mut self.second };
            if slot.is_none() {
                *slot = Some(fields.bases.to_vec());
            }
        }
    }
}

/// Bounded, forward-only mate-bases cache over a secondary record stream.
pub struct MateLookupCache<I> {
    batches: QueryNameBatches<I>,
    entries: LruCache<Vec<u8>, MateEntry>,
    window: usize,
    records_scanned: u64,
    batches_scanned: u64,
    evictions: u64,
    exhausted: bool,
}

impl<I> MateLookupCache<I>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    /// Create a cache over `records` spanning `window` distinct query names.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::InvalidParameter`] if `window` is zero.
    pub fn new(records: I, window: usize) -> crate::errors::Result<Self> {
        let capacity = NonZeroUsize::new(window).ok_or_else(|| MateSortError::InvalidParameter {
            parameter: "mate-window".to_string(),
            reason: "must be at least 1".to_string(),
        })?;
        Ok(Self {
            batches: QueryNameBatches::new(records),
            entries: LruCache::new(capacity),
            window,
            records_scanned: 0,
            batches_scanned: 0,
            evictions: 0,
            exhausted: false,
        })
    }

    /// Number of query names currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no query names are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The window size in distinct query names.
    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Records read from the secondary stream so far.
    #[must_use]
    pub fn records_scanned(&self) -> u64 {
        self.records_scanned
    }

    /// Query-name batches read from the secondary stream so far.
    #[must_use]
    pub fn batches_scanned(&self) -> u64 {
        self.batches_scanned
    }

    /// Entries pushed out by the window bound before they settled.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Serve a lookup from the cache, retiring the entry if it is now settled.
    fn take_cached(&mut self, name: &[u8], selector: MateSelector) -> Option<Vec<u8>> {
        let (bases, settled) = {
            let entry = self.entries.get_mut(name)?;
            let bases = entry.bases(selector)?.to_vec();
            entry.pending_lookups = entry.pending_lookups.saturating_sub(1);
            (bases, entry.is_settled())
        };
        if settled {
            self.entries.pop(name);
        }
        Some(bases)
    }

    /// Read the next query-name batch into the cache. Returns false at end of input.
    fn scan_next_batch(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let Some(batch) = self.batches.next() else {
            self.exhausted = true;
            return Ok(false);
        };
        let batch = batch.context("Failed to read record from mate scan")?;
        let batch_index = self.batches_scanned;
        self.batches_scanned += 1;
        self.records_scanned += batch.len() as u64;

        let Some(name) = batch[0].name().map(|n| <_ as AsRef<[u8]>>::as_ref(n).to_vec()) else {
            return Ok(true);
        };

        if let Some(entry) = self.entries.get_mut(name.as_slice()) {
            entry.absorb(&batch);
            if entry.is_settled() {
                self.entries.pop(name.as_slice());
            }
            return Ok(true);
        }

        let mut entry = MateEntry { first_seen_batch: batch_index, ..MateEntry::default() };
        entry.absorb(&batch);
        if entry.is_settled() {
            return Ok(true);
        }
        if let Some((evicted, old)) = self.entries.push(name, entry) {
            self.evictions += 1;
            debug!(
                "Mate cache window full; dropped '{}' with {} pending lookup(s)",
                String::from_utf8_lossy(&evicted),
                old.pending_lookups
            );
        }
        Ok(true)
    }

    fn orphaned(&self, name: &[u8], selector: MateSelector) -> anyhow::Error {
        MateSortError::OrphanedMate {
            name: String::from_utf8_lossy(name).into_owned(),
            mate: selector,
            window: self.window,
        }
        .into()
    }
}

impl<I> MateLookup for MateLookupCache<I>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    fn mate_bases(&mut self, name: &[u8], selector: MateSelector) -> Result<Vec<u8>> {
        loop {
            if let Some(bases) = self.take_cached(name, selector) {
                return Ok(bases);
            }
            // Names not yet seen are scanned for until end of input; the horizon starts
            // at the first sighting.
            let horizon_passed = self.entries.peek(name).is_some_and(|entry| {
                self.batches_scanned - entry.first_seen_batch > self.window as u64
            });
            if horizon_passed || !self.scan_next_batch()? {
                return Err(self.orphaned(name, selector));
            }
        }
    }
}

/// Fully materialized name → bases index.
///
/// Useful when the records are already in memory, and as a reference to check the
/// streaming cache against.
#[derive(Debug, Default, Clone)]
pub struct MateIndex {
    bases: HashMap<(Vec<u8>, MateSelector), Vec<u8>>,
}

impl MateIndex {
    /// Index the primary records of `records` by name and mate role.
    #[must_use]
    pub fn from_records(records: &[RecordBuf]) -> Self {
        let mut bases = HashMap::new();
        for record in records {
            let fields = SortFields::from_record(record);
            let Some(name) = fields.name else { continue };
            if fields.is_primary {
                bases
                    .entry((name.to_vec(), MateSelector::of(record)))
                    .or_insert_with(|| fields.bases.to_vec());
            }
        }
        Self { bases }
    }

    /// Index the primary bases of every pair with at least one unmapped record.
    ///
    /// `names_pass` collects the query names of unmapped records and `bases_pass` then
    /// picks up the primary bases of just those names, so memory follows the unmapped
    /// reads rather than the whole input. Both passes must traverse the same records.
    ///
    /// # Errors
    ///
    /// Returns the first error from either pass.
    pub fn from_unmapped_pairs<A, B>(names_pass: A, bases_pass: B) -> Result<Self>
    where
        A: IntoIterator<Item = Result<RecordBuf>>,
        B: IntoIterator<Item = Result<RecordBuf>>,
    {
        let mut names: HashSet<Vec<u8>> = HashSet::new();
        for record in names_pass {
            let record = record?;
            let fields = SortFields::from_record(&record);
            if let Some(name) = fields.name.filter(|_| !fields.is_mapped()) {
                names.insert(name.to_vec());
            }
        }

        let mut bases = HashMap::new();
        for record in bases_pass {
            let record = record?;
            let fields = SortFields::from_record(&record);
            let Some(name) = fields.name else { continue };
            if fields.is_primary && names.contains(name) {
                bases
                    .entry((name.to_vec(), MateSelector::of(&record)))
                    .or_insert_with(|| fields.bases.to_vec());
            }
        }
        debug!("Indexed mate bases for {} pairs with unmapped reads", names.len());
        Ok(Self { bases })
    }

    /// Number of (name, mate) pairs indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// True when nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

impl MateLookup for MateIndex {
    fn mate_bases(&mut self, name: &[u8], selector: MateSelector) -> Result<Vec<u8>> {
        self.bases.get(&(name.to_vec(), selector)).cloned().ok_or_else(|| {
            MateSortError::OrphanedMate {
                name: String::from_utf8_lossy(name).into_owned(),
                mate: selector,
                window: self.bases.len(),
            }
            .into()
        })
    }
}
