//! Error path integration tests.
//!
//! These tests verify that error conditions are handled correctly,
//! including validation failures, missing files, and invalid inputs.

use crate::helpers::{generate_pairs, test_header, write_input};
use matesort_lib::errors::MateSortError;
use matesort_lib::sam::builder::RecordBuilder;
use matesort_lib::sort::{MateAwareSort, MateIndex, SortOptions, sort_records};
use noodles::sam::alignment::record_buf::RecordBuf;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn typed(err: &anyhow::Error) -> &MateSortError {
    err.downcast_ref::<MateSortError>().expect("expected a MateSortError")
}

#[test]
fn test_unmapped_record_without_name_is_malformed() {
    let nameless = RecordBuilder::new().sequence("ACGT").unmapped(true).build();
    let mut sink: Vec<RecordBuf> = Vec::new();
    let err = sort_records(
        std::iter::once(Ok(nameless)),
        &test_header(),
        MateIndex::default(),
        &mut sink,
        &SortOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(typed(&err), MateSortError::MalformedRecord { .. }));
}

#[test]
fn test_mapped_record_without_name_is_accepted() {
    let nameless = RecordBuilder::mapped_read().sequence("ACGT").alignment_start(7).build();
    let mut sink: Vec<RecordBuf> = Vec::new();
    let stats = sort_records(
        std::iter::once(Ok(nameless)),
        &test_header(),
        MateIndex::default(),
        &mut sink,
        &SortOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.records_written, 1);
}

#[test]
fn test_invalid_temp_compression() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(4, 2, 1));
    let err = MateAwareSort::new()
        .options(SortOptions::default().temp_compression(13))
        .sort(&input, &dir.path().join("out.bam"))
        .unwrap_err();
    assert!(matches!(typed(&err), MateSortError::InvalidParameter { .. }));
}

#[test]
fn test_output_in_missing_directory() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(4, 2, 1));
    let err = MateAwareSort::new()
        .sort(&input, &dir.path().join("no/such/dir/out.bam"))
        .unwrap_err();
    assert!(matches!(typed(&err), MateSortError::InvalidFileFormat { .. }));
}

#[test]
fn test_stdin_input_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = MateAwareSort::new().sort(Path::new("-"), &dir.path().join("out.bam")).unwrap_err();
    assert!(err.to_string().contains("stdin"));
}

#[test]
fn test_non_bam_input_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.bam");
    fs::write(&input, "this is not a BAM file\n").unwrap();
    let output = dir.path().join("out.bam");

    assert!(MateAwareSort::new().sort(&input, &output).is_err());
    assert!(!output.exists());
}
