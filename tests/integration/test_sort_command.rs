//! Tests of the `matesort sort` binary.

use crate::helpers::{assert_mate_aware_order, assert_same_records, generate_pairs, read_bam};
use crate::helpers::write_input;
use matesort_lib::header::{PROGRAM_ID, is_mate_sorted};
use noodles::sam::header::record::value::map::program::tag;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn matesort(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_matesort"))
        .args(args)
        .output()
        .expect("Failed to run matesort")
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_sort_command_writes_sorted_output() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(150, 8, 21));
    let output = dir.path().join("out.bam");
    let tmp = dir.path().join("tmp");

    let result = matesort(&[
        "sort",
        "--input",
        path_str(&input),
        "--output",
        path_str(&output),
        "--max-records-in-ram",
        "25",
        "--mate-window",
        "1k",
        "-T",
        path_str(&tmp),
        "--threads",
        "2",
        "--compression-level",
        "6",
    ]);
    assert!(result.status.success(), "sort failed: {}", String::from_utf8_lossy(&result.stderr));

    let (_, input_records) = read_bam(&input);
    let (header, records) = read_bam(&output);
    assert_same_records(&input_records, &records);
    assert_mate_aware_order(&records);

    assert!(is_mate_sorted(&header));
    let pg = header.programs().as_ref().get(PROGRAM_ID.as_bytes()).expect("missing @PG");
    let command_line = pg.other_fields().get(&tag::COMMAND_LINE).expect("missing CL");
    assert!(String::from_utf8_lossy(command_line.as_ref()).contains("--max-records-in-ram 25"));
}

#[test]
fn test_verify_passes_on_sorted_and_fails_on_unsorted() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(60, 4, 2));
    let output = dir.path().join("out.bam");

    let sorted = matesort(&["sort", "-i", path_str(&input), "-o", path_str(&output)]);
    assert!(sorted.status.success());

    let verify_sorted = matesort(&["sort", "-i", path_str(&output), "--verify"]);
    assert!(verify_sorted.status.success());

    let verify_unsorted = matesort(&["sort", "-i", path_str(&input), "--verify"]);
    assert!(!verify_unsorted.status.success());
    assert!(String::from_utf8_lossy(&verify_unsorted.stderr).contains("NOT correctly sorted"));
}

#[test]
fn test_verify_accepts_output_sorted_with_small_window() {
    // Both-unmapped pairs land far apart once sorted by mate bases.
    let records: Vec<_> = generate_pairs(80, 6, 13)
        .into_iter()
        .filter(|r| r.flags().is_unmapped() && r.flags().is_mate_unmapped())
        .collect();
    assert_eq!(records.len(), 40);

    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &records);
    let output = dir.path().join("out.bam");

    let sorted = matesort(&[
        "sort",
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "--mate-window",
        "4",
    ]);
    assert!(sorted.status.success(), "sort failed: {}", String::from_utf8_lossy(&sorted.stderr));

    let verify = matesort(&["sort", "-i", path_str(&output), "--verify", "--mate-window", "4"]);
    assert!(verify.status.success(), "verify failed: {}", String::from_utf8_lossy(&verify.stderr));
}

#[test]
fn test_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.bam");
    let result = matesort(&[
        "sort",
        "-i",
        path_str(&dir.path().join("missing.bam")),
        "-o",
        path_str(&output),
    ]);
    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("does not exist"));
    assert!(!output.exists());
}

#[test]
fn test_output_and_verify_conflict() {
    let result = matesort(&["sort", "-i", "in.bam", "-o", "out.bam", "--verify"]);
    assert_eq!(result.status.code(), Some(2));
}

#[test]
fn test_zero_mate_window_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), "in.bam", &generate_pairs(4, 2, 1));
    let output = dir.path().join("out.bam");
    let result = matesort(&[
        "sort",
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "--mate-window",
        "0",
    ]);
    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("mate-window"));
}

#[test]
fn test_version() {
    let result = matesort(&["--version"]);
    assert!(result.status.success());
    assert!(String::from_utf8_lossy(&result.stdout).starts_with("matesort "));
}
