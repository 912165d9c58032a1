//! Custom assertion helpers for integration tests.

#![allow(dead_code)]

use matesort_lib::sort::{MateAwareKey, MateIndex};
use noodles::sam::alignment::record_buf::RecordBuf;
use std::cmp::Ordering;

/// Asserts that every record sorts at or after its predecessor.
///
/// # Panics
///
/// Panics at the first out-of-order record, or if a mate is missing.
pub fn assert_mate_aware_order(records: &[RecordBuf]) {
    let mut index = MateIndex::from_records(records);
    let keys: Vec<MateAwareKey> = records
        .iter()
        .map(|r| MateAwareKey::from_record(r, 0, &mut index).expect("mate should be present"))
        .collect();

    for (i, pair) in keys.windows(2).enumerate() {
        assert_ne!(
            pair[1].cmp_ignoring_ordinal(&pair[0]),
            Ordering::Less,
            "record {} ({:?}) sorts before record {} ({:?})",
            i + 1,
            records[i + 1].name(),
            i,
            records[i].name()
        );
    }
}

/// Asserts that `actual` holds exactly the records of `expected`, in any order.
///
/// # Panics
///
/// Panics if a record is missing, duplicated or altered.
pub fn assert_same_records(expected: &[RecordBuf], actual: &[RecordBuf]) {
    assert_eq!(expected.len(), actual.len(), "record counts differ");

    let by_identity = |records: &[RecordBuf]| {
        let mut sorted = records.to_vec();
        sorted.sort_by_key(|r| {
            (r.name().map(|n| <[u8]>::to_vec(n.as_ref())), r.flags().bits())
        });
        sorted
    };
    assert!(by_identity(expected) == by_identity(actual), "record contents differ");
}

/// `(name, is_first_segment)` of each record, for compact order checks.
pub fn names_and_roles(records: &[RecordBuf]) -> Vec<(String, bool)> {
    records
        .iter()
        .map(|r| {
            let name = r.name().map(|n| String::from_utf8_lossy(n.as_ref()).into_owned());
            (name.unwrap_or_default(), r.flags().is_first_segment())
        })
        .collect()
}
