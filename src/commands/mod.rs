//! CLI command implementations for matesort.
//!
//! - [`sort`] - Sort a BAM file into mate-aware order, or verify that it is already in that order

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::uninlined_format_args
)]

pub mod command;
pub mod common;
pub mod sort;
