//! Utilities for generating test BAM data programmatically.

#![allow(dead_code)]

use matesort_lib::bam_io::BamInput;
use matesort_lib::sam::builder::{build_pair, create_header, write_bam};
use noodles::sam::Header;
use noodles::sam::alignment::record_buf::RecordBuf;
use std::path::{Path, PathBuf};

/// Length of generated reads.
pub const READ_LENGTH: usize = 20;

/// Two 1 Mb references, `chr1` and `chr2`.
pub fn test_header() -> Header {
    create_header(&[("chr1", 1_000_000), ("chr2", 1_000_000)])
}

/// Small deterministic generator so data sets are reproducible without extra crates.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn bases(&mut self, len: usize) -> String {
        (0..len).map(|_| ['A', 'C', 'G', 'T'][self.below(4) as usize]).collect()
    }

    fn placement(&mut self) -> (usize, usize) {
        (self.below(2) as usize, 1 + self.below(900_000) as usize)
    }
}

/// Generates `n_pairs` read pairs grouped by name, the way an aligner writes them.
///
/// Pair `i` is both-mapped, r1-only-mapped, r2-only-mapped or both-unmapped for
/// `i % 4` of 0, 1, 2 and 3. Bases are drawn from a small alphabet of `distinct_bases`
/// sequences so that many unmapped reads share their mate's bases.
pub fn generate_pairs(n_pairs: usize, distinct_bases: usize, seed: u64) -> Vec<RecordBuf> {
    let mut rng = SplitMix64(seed);
    let pool: Vec<String> = (0..distinct_bases.max(1)).map(|_| rng.bases(READ_LENGTH)).collect();

    let mut records = Vec::with_capacity(n_pairs * 2);
    for i in 0..n_pairs {
        let r1_bases = &pool[rng.below(pool.len() as u64) as usize];
        let r2_bases = &pool[rng.below(pool.len() as u64) as usize];
        let (r1, r2) = match i % 4 {
            0 => (Some(rng.placement()), Some(rng.placement())),
            1 => (Some(rng.placement()), None),
            2 => (None, Some(rng.placement())),
            _ => (None, None),
        };
        let (first, second) = build_pair(&format!("pair{i:06}"), r1, r1_bases, r2, r2_bases);
        records.push(first);
        records.push(second);
    }
    records
}

/// Writes `records` to `<dir>/<name>` and returns the path.
pub fn write_input(dir: &Path, name: &str, records: &[RecordBuf]) -> PathBuf {
    let path = dir.join(name);
    write_bam(&path, &test_header(), records).expect("failed to write test BAM");
    path
}

/// Reads a BAM file back into its header and records.
pub fn read_bam(path: &Path) -> (Header, Vec<RecordBuf>) {
    let input = BamInput::open(path, 1).expect("failed to open BAM");
    let records = input
        .open_primary()
        .expect("failed to open BAM")
        .collect::<anyhow::Result<Vec<_>>>()
        .expect("failed to read BAM");
    (input.header().clone(), records)
}
