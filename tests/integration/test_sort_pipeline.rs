//! End-to-end library sorts over BAM files.

use crate::helpers::{
    assert_mate_aware_order, assert_same_records, generate_pairs, names_and_roles, read_bam,
    test_header, write_input,
};
use matesort_lib::errors::MateSortError;
use matesort_lib::header::is_mate_sorted;
use matesort_lib::sam::builder::{RecordBuilder, build_pair};
use matesort_lib::sort::{MateAwareSort, MateIndex, SortOptions, sort_records, verify_sorted};
use noodles::sam::alignment::record_buf::RecordBuf;
use rstest::rstest;
use std::fs;
use tempfile::TempDir;

#[rstest]
#[case::in_memory(1_000_000, 1)]
#[case::many_spills(37, 1)]
#[case::parallel_spills(64, 4)]
fn test_sort_orders_and_preserves_records(
    #[case] max_records_in_ram: usize,
    #[case] threads: usize,
) {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(200, 12, 7));
    let output = dir.path().join("out.bam");

    let stats = MateAwareSort::new()
        .options(
            SortOptions::default().max_records_in_ram(max_records_in_ram).threads(threads),
        )
        .sort(&input, &output)
        .unwrap();
    assert_eq!(stats.records_read, 400);
    assert_eq!(stats.records_written, 400);
    assert_eq!(stats.unmapped_records, 200);

    let (_, input_records) = read_bam(&input);
    let (header, output_records) = read_bam(&output);
    assert!(is_mate_sorted(&header));
    assert_same_records(&input_records, &output_records);
    assert_mate_aware_order(&output_records);
}

#[test]
fn test_output_is_independent_of_batch_size_and_threads() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(200, 3, 11));

    let sort_with = |name: &str, options: SortOptions| {
        let output = dir.path().join(name);
        MateAwareSort::new().options(options).sort(&input, &output).unwrap();
        read_bam(&output).1
    };

    let in_memory = sort_with("memory.bam", SortOptions::default());
    let spilled = sort_with("spilled.bam", SortOptions::default().max_records_in_ram(9));
    let raw_spills = sort_with(
        "raw.bam",
        SortOptions::default().max_records_in_ram(50).temp_compression(0).threads(3),
    );

    assert!(in_memory == spilled, "spilled sort differs from in-memory sort");
    assert!(in_memory == raw_spills, "uncompressed parallel sort differs from in-memory sort");
}

#[test]
fn test_spill_directory_is_removed() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(100, 5, 3));
    let tmp = dir.path().join("scratch");

    let stats = MateAwareSort::new()
        .options(SortOptions::default().max_records_in_ram(10).temp_dir(tmp.clone()))
        .sort(&input, &dir.path().join("out.bam"))
        .unwrap();

    assert_eq!(stats.spill_files, 20);
    assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
}

#[test]
fn test_unmapped_reads_use_primary_mate_bases() {
    // x/1 has a secondary alignment with different bases ahead of its primary record;
    // only the primary bases may key x/2.
    let secondary = RecordBuilder::mapped_read()
        .name("x")
        .sequence("AAAA")
        .first_segment(true)
        .secondary(true)
        .alignment_start(900)
        .build();
    let (x1, x2) = build_pair("x", Some((0, 100)), "GGGG", None, "TTTT");
    let (y1, y2) = build_pair("y", Some((1, 100)), "CCCC", None, "TTTT");

    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &[secondary, x1, x2, y1, y2]);
    let output = dir.path().join("out.bam");
    MateAwareSort::new().sort(&input, &output).unwrap();

    let (_, records) = read_bam(&output);
    let expected: Vec<(String, bool)> =
        [("x", true), ("x", true), ("y", true), ("y", false), ("x", false)]
            .into_iter()
            .map(|(name, first)| (name.to_string(), first))
            .collect();
    assert_eq!(names_and_roles(&records), expected);
}

#[test]
fn test_unmapped_pair_members_sort_by_each_others_bases() {
    let (a1, a2) = build_pair("a", None, "TTTT", None, "CCCC");
    let (b1, b2) = build_pair("b", None, "GGGG", None, "AAAA");

    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &[a1, a2, b1, b2]);
    let output = dir.path().join("out.bam");
    MateAwareSort::new().sort(&input, &output).unwrap();

    // Keys: a/1 -> CCCC, a/2 -> TTTT, b/1 -> AAAA, b/2 -> GGGG.
    let (_, records) = read_bam(&output);
    let expected: Vec<(String, bool)> = [("b", true), ("a", true), ("b", false), ("a", false)]
        .into_iter()
        .map(|(name, first)| (name.to_string(), first))
        .collect();
    assert_eq!(names_and_roles(&records), expected);
}

/// Ten unmapped first-of-pair reads, then all their mates.
fn mates_far_apart() -> Vec<RecordBuf> {
    let pairs: Vec<(RecordBuf, RecordBuf)> = (0..10)
        .map(|i| build_pair(&format!("r{i}"), None, "ACGT", Some((0, 10 + i)), "GGCC"))
        .collect();
    let mut records: Vec<RecordBuf> = pairs.iter().map(|(r1, _)| r1.clone()).collect();
    records.extend(pairs.into_iter().map(|(_, r2)| r2));
    records
}

#[test]
fn test_mate_outside_window_is_orphaned() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &mates_far_apart());
    let output = dir.path().join("out.bam");

    let err = MateAwareSort::new().mate_window(2).sort(&input, &output).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MateSortError>(),
        Some(MateSortError::OrphanedMate { .. })
    ));
    assert!(!output.exists());
}

#[test]
fn test_mate_inside_window_is_found() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &mates_far_apart());
    let output = dir.path().join("out.bam");

    MateAwareSort::new().mate_window(20).sort(&input, &output).unwrap();
    let (_, records) = read_bam(&output);
    assert_eq!(records.len(), 20);
    assert_mate_aware_order(&records);
}

#[test]
fn test_verify_sorted_output() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(120, 6, 5));
    let output = dir.path().join("out.bam");
    MateAwareSort::new().sort(&input, &output).unwrap();

    let sorted = verify_sorted(&output).unwrap();
    assert!(sorted.is_sorted());
    assert!(sorted.header_declares_order);
    assert_eq!(sorted.records_checked, 240);

    let unsorted = verify_sorted(&input).unwrap();
    assert!(!unsorted.is_sorted());
    assert!(unsorted.first_violation.is_some());
}

#[test]
fn test_sort_records_with_in_memory_sink() {
    let records = generate_pairs(40, 4, 9);
    let index = MateIndex::from_records(&records);

    let mut sink: Vec<RecordBuf> = Vec::new();
    let stats = sort_records(
        records.clone().into_iter().map(Ok),
        &test_header(),
        index,
        &mut sink,
        &SortOptions::default().max_records_in_ram(7),
    )
    .unwrap();

    assert_eq!(stats.records_written, 80);
    assert_same_records(&records, &sink);
    assert_mate_aware_order(&sink);
}
