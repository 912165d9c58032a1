//! Custom error types for matesort operations.
//!
//! Most I/O paths use `anyhow` with context; the variants here are the failures callers
//! need to tell apart, most importantly [`MateSortError::OrphanedMate`]. They stay
//! reachable through `anyhow::Error::downcast_ref`.

use thiserror::Error;

use crate::sort::record::MateSelector;

/// Result type alias for matesort operations
pub type Result<T> = std::result::Result<T, MateSortError>;

/// Error type for matesort operations
#[derive(Error, Debug)]
pub enum MateSortError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// File format or accessibility error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "Input BAM")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// A record is missing a field the sort order depends on
    #[error("Malformed record '{name}': {reason}")]
    MalformedRecord {
        /// Query name of the record, or `*` when absent
        name: String,
        /// Explanation of the problem
        reason: String,
    },

    /// The mate of an unmapped read could not be found by the secondary scan
    #[error(
        "Could not find the {mate} mate of '{name}' within {window} query names of the mate scan; \
         input must be paired-end with both mates of every unmapped read present"
    )]
    OrphanedMate {
        /// Query name shared by the pair
        name: String,
        /// Which mate was requested
        mate: MateSelector,
        /// Size of the lookup window that was searched
        window: usize,
    },

    /// Reading, writing or deleting a temporary spill file failed
    #[error("Spill file '{path}' failed during {operation}: {source}")]
    SpillIo {
        /// Path of the spill file
        path: String,
        /// The operation that failed (create, write, read, delete)
        operation: &'static str,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl MateSortError {
    /// Wrap an I/O error raised while handling a spill file.
    pub fn spill_io(
        path: &std::path::Path,
        operation: &'static str,
        source: std::io::Error,
    ) -> Self {
        Self::SpillIo { path: path.display().to_string(), operation, source }
    }
}
