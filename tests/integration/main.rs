//! Integration tests for matesort.
//!
//! These tests drive whole sorts through the library and the compiled binary, reading
//! and writing real BAM files in scratch directories.

mod helpers;
mod test_error_paths;
mod test_sort_command;
mod test_sort_pipeline;
