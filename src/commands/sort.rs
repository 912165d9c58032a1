//! Sort a BAM file into mate-aware order.
//!
//! Mapped reads come first in coordinate order. Unmapped reads follow, ordered by the
//! bases of their mates, so that unmapped reads whose mates carry the same sequence end
//! up next to each other.
//!
//! # Verification
//!
//! Use `--verify` to check if a BAM file is correctly sorted without writing output.

use anyhow::{Result, bail};
use clap::Parser;
use log::{info, warn};
use matesort_lib::logging::{OperationTimer, format_count, log_sort_summary};
use matesort_lib::sort::{
    DEFAULT_MATE_WINDOW, DEFAULT_MAX_RECORDS_IN_RAM, MateAwareSort, SortOptions, verify_sorted,
};
use std::path::{Path, PathBuf};

use crate::commands::command::Command;
use crate::commands::common::CompressionOptions;

/// Sort a BAM file.
///
/// Sorts with an external merge sort, so inputs larger than memory are supported.
#[derive(Debug, Parser)]
#[command(
    name = "sort",
    about = "\x1b[38;5;72m[SORT]\x1b[0m           \x1b[36mSort mapped reads by coordinate and unmapped reads by mate bases\x1b[0m",
    long_about = r#"
Sort a BAM file into mate-aware order using an external merge sort.

ORDER:

  1. Mapped reads, by reference index then alignment start.
  2. Unmapped reads (including reads without a reference or position), by the
     bases of their mate, first-of-pair before second-of-pair.

  Remaining ties keep the input order, so repeated runs produce identical output.

MATE LOOKUP:

  Finding the mate of an unmapped read needs a second pass over the input. A
  second reader runs ahead of the sort and keeps the bases of recently seen
  query names (--mate-window of them). Both mates of every unmapped read must be
  present, and must lie within the window of each other; an input grouped by
  query name (as aligners write it) always satisfies this.

  The input must be a file: standard input cannot be read twice.

OUTPUT:

  The header keeps every reference, read group and program of the input, with
  @HD SO:unsorted SS:unsorted:mate-bases and a new @PG record.

EXAMPLES:

  # Sort with defaults
  matesort sort -i aligned.bam -o sorted.bam

  # More records in memory, fast scratch disk, more threads
  matesort sort -i aligned.bam -o sorted.bam \
    --max-records-in-ram 2M -T /scratch --threads 8

  # Verify a BAM file is correctly sorted
  matesort sort -i sorted.bam --verify
"#
)]
pub struct Sort {
    /// Input BAM file.
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Output BAM file (required unless --verify is used).
    #[arg(short = 'o', long = "output", conflicts_with = "verify")]
    pub output: Option<PathBuf>,

    /// Verify the input file is correctly sorted (no output written).
    ///
    /// Indexes the mates of unmapped reads in a first pass, then reads records
    /// sequentially and checks that each record's sort key is >= the previous
    /// record's key. --mate-window does not apply. Exits 0 if sorted correctly,
    /// non-zero if any records are out of order.
    #[arg(long = "verify", conflicts_with = "output")]
    pub verify: bool,

    /// Records held in memory before a sorted run is spilled to disk.
    ///
    /// Accepts plain numbers or values like "500k", "2M".
    #[arg(
        short = 'm',
        long = "max-records-in-ram",
        default_value_t = DEFAULT_MAX_RECORDS_IN_RAM,
        value_parser = parse_record_count
    )]
    pub max_records_in_ram: usize,

    /// Distinct query names the mate scan may run ahead of the sort.
    ///
    /// Larger windows tolerate mates further apart in the input at the cost of memory.
    #[arg(
        short = 'w',
        long = "mate-window",
        default_value_t = DEFAULT_MATE_WINDOW,
        value_parser = parse_record_count
    )]
    pub mate_window: usize,

    /// Temporary directory for intermediate files.
    ///
    /// If not specified, uses the system default temp directory.
    /// For best performance, use a fast SSD.
    #[arg(short = 'T', long = "tmp-dir")]
    pub tmp_dir: Option<PathBuf>,

    /// Number of threads for parallel operations.
    ///
    /// Used for parallel sorting of in-memory runs and
    /// multi-threaded BGZF compression.
    #[arg(short = '@', short_alias = 't', long = "threads", default_value = "1")]
    pub threads: usize,

    /// Compression options for output BAM.
    #[command(flatten)]
    pub compression: CompressionOptions,

    /// Compression level for temporary spill files (0-12).
    ///
    /// Level 0 disables compression (fastest, uses most disk space).
    /// Level 1 (default) provides fast compression with reasonable space savings.
    #[arg(
        long = "temp-compression",
        default_value = "1",
        value_parser = clap::value_parser!(u32).range(0..=12)
    )]
    pub temp_compression: u32,
}

/// Parse a record count such as "500000", "500k", "2M" or "1.5M".
fn parse_record_count(s: &str) -> Result<usize, String> {
    let s = s.trim().replace('_', "").to_uppercase();

    if s.is_empty() {
        return Err("Empty record count".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('G') {
        (num, 1_000_000_000.0)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1_000_000.0)
    } else if let Some(num) = s.strip_suffix('K') {
        (num, 1_000.0)
    } else {
        (s.as_str(), 1.0)
    };

    if multiplier == 1.0 {
        return num_str.parse::<usize>().map_err(|_| format!("Invalid record count: {s}"));
    }

    let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {num_str}"))?;
    if !num.is_finite() || num < 0.0 {
        return Err("Record count must be positive".to_string());
    }

    Ok((num * multiplier).round() as usize)
}

impl Command for Sort {
    fn execute(&self, command_line: &str) -> Result<()> {
        if self.verify {
            return self.execute_verify();
        }

        // Either --output or --verify must be specified
        let Some(output) = self.output.as_deref() else {
            bail!("Either --output or --verify must be specified");
        };

        self.execute_sort(output, command_line)
    }
}

impl Sort {
    fn sort_options(&self) -> SortOptions {
        let mut options = SortOptions::default()
            .max_records_in_ram(self.max_records_in_ram)
            .threads(self.threads)
            .temp_compression(self.temp_compression);
        if let Some(ref tmp) = self.tmp_dir {
            options = options.temp_dir(tmp.clone());
        }
        options
    }

    /// Execute sort mode: read, sort, and write output.
    fn execute_sort(&self, output: &Path, command_line: &str) -> Result<()> {
        info!("Starting Sort");
        info!("Max records in RAM: {}", format_count(self.max_records_in_ram as u64));
        info!("Mate window: {} query names", format_count(self.mate_window as u64));
        info!("Threads: {}", self.threads);
        info!("Temp compression level: {}", self.temp_compression);
        if let Some(ref tmp) = self.tmp_dir {
            info!("Temp directory: {}", tmp.display());
        }

        let stats = MateAwareSort::new()
            .options(self.sort_options())
            .mate_window(self.mate_window)
            .compression_level(self.compression.compression_level)
            .program_info(crate::version::VERSION.as_str(), command_line)
            .sort(&self.input, output)?;

        info!("=== Summary ===");
        log_sort_summary(&stats);
        info!("Output: {}", output.display());
        Ok(())
    }

    /// Execute verify mode: read records and check sort order.
    fn execute_verify(&self) -> Result<()> {
        let timer = OperationTimer::new("Verifying BAM sort order");

        info!("Starting Sort Verification");
        info!("Input: {}", self.input.display());

        let stats = verify_sorted(&self.input)?;

        info!("=== Verification Summary ===");
        info!("Records checked: {}", format_count(stats.records_checked));
        info!("Sort order violations: {}", format_count(stats.violations));
        if !stats.header_declares_order {
            warn!("Header does not declare SO:unsorted SS:unsorted:mate-bases");
        }
        timer.log_completion(stats.records_checked);

        if !stats.is_sorted() {
            if let Some((record_num, name)) = &stats.first_violation {
                info!("First violation at record {record_num}: {name}");
            }
            bail!(
                "BAM file is NOT correctly sorted in mate-aware order: {} violations found",
                stats.violations
            );
        }

        info!("Result: PASS - file is correctly sorted in mate-aware order");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Result<Sort, clap::Error> {
        Sort::try_parse_from(std::iter::once("sort").chain(args.iter().copied()))
    }

    #[rstest]
    #[case("500000", 500_000)]
    #[case("1_000_000", 1_000_000)]
    #[case("500k", 500_000)]
    #[case("500K", 500_000)]
    #[case("2M", 2_000_000)]
    #[case("1.5M", 1_500_000)]
    #[case("1G", 1_000_000_000)]
    #[case(" 42 ", 42)]
    fn test_parse_record_count(#[case] input: &str, #[case] expected: usize) {
        assert_eq!(parse_record_count(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("-1")]
    #[case("-1M")]
    #[case("1.5")]
    fn test_parse_record_count_invalid(#[case] input: &str) {
        assert!(parse_record_count(input).is_err());
    }

    #[test]
    fn test_defaults() {
        let sort = parse(&["-i", "in.bam", "-o", "out.bam"]).unwrap();
        assert_eq!(sort.max_records_in_ram, DEFAULT_MAX_RECORDS_IN_RAM);
        assert_eq!(sort.mate_window, DEFAULT_MATE_WINDOW);
        assert_eq!(sort.threads, 1);
        assert_eq!(sort.temp_compression, 1);
        assert_eq!(sort.compression.compression_level, 1);
        assert!(!sort.verify);
        assert_eq!(sort.sort_options(), SortOptions::default());
    }

    #[test]
    fn test_sort_options_from_args() {
        let sort = parse(&[
            "-i",
            "in.bam",
            "-o",
            "out.bam",
            "--max-records-in-ram",
            "2M",
            "-T",
            "/scratch",
            "-@",
            "8",
            "--temp-compression",
            "0",
        ])
        .unwrap();
        let expected = SortOptions::default()
            .max_records_in_ram(2_000_000)
            .temp_dir(PathBuf::from("/scratch"))
            .threads(8)
            .temp_compression(0);
        assert_eq!(sort.sort_options(), expected);
    }

    #[test]
    fn test_threads_short_alias() {
        assert_eq!(parse(&["-i", "in.bam", "-o", "out.bam", "-t", "4"]).unwrap().threads, 4);
    }

    #[test]
    fn test_verify_conflicts_with_output() {
        assert!(parse(&["-i", "in.bam", "-o", "out.bam", "--verify"]).is_err());
        assert!(parse(&["-i", "in.bam", "--verify"]).unwrap().verify);
    }

    #[test]
    fn test_temp_compression_range() {
        assert!(parse(&["-i", "in.bam", "-o", "o.bam", "--temp-compression", "12"]).is_ok());
        assert!(parse(&["-i", "in.bam", "-o", "o.bam", "--temp-compression", "13"]).is_err());
    }

    #[test]
    fn test_execute_requires_output_or_verify() {
        let sort = parse(&["-i", "in.bam"]).unwrap();
        let err = sort.execute("matesort sort -i in.bam").unwrap_err();
        assert!(err.to_string().contains("--output or --verify"));
    }
}
