//! Up-front checks on input and output paths and numeric parameters.
//!
//! These run before any record is read so that a bad path fails fast with a structured
//! [`MateSortError`] instead of surfacing halfway through a sort.

use crate::errors::{MateSortError, Result};
use std::fmt::Display;
use std::fs::File;
use std::path::Path;

/// Validate that a file exists
///
/// # Errors
/// Returns an error if the file does not exist
///
/// # Example
/// ```
/// use matesort_lib::validation::validate_file_exists;
///
/// let result = validate_file_exists("/nonexistent/file.bam", "Input BAM");
/// assert!(result.is_err());
/// ```
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(MateSortError::InvalidFileFormat {
            file_type: description.to_string(),
            path: path_ref.display().to_string(),
            reason: "File does not exist".to_string(),
        });
    }
    Ok(())
}

/// Validate that a path names an existing, readable regular file.
///
/// # Errors
/// Returns an error if the file is missing, is a directory or cannot be opened
pub fn validate_file_readable<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    validate_file_exists(path_ref, description)?;

    let invalid = |reason: String| MateSortError::InvalidFileFormat {
        file_type: description.to_string(),
        path: path_ref.display().to_string(),
        reason,
    };
    if path_ref.is_dir() {
        return Err(invalid("Path is a directory".to_string()));
    }
    File::open(path_ref).map_err(|e| invalid(format!("File is not readable: {e}")))?;
    Ok(())
}

/// Validate that an output file can be created: its parent directory must exist and
/// must not be the input itself.
///
/// # Errors
/// Returns an error if the parent directory is missing, the path is a directory, or the
/// path equals `input`
pub fn validate_output_writable<P: AsRef<Path>, Q: AsRef<Path>>(
    output: P,
    input: Q,
    description: &str,
) -> Result<()> {
    let output = output.as_ref();
    let invalid = |reason: &str| MateSortError::InvalidFileFormat {
        file_type: description.to_string(),
        path: output.display().to_string(),
        reason: reason.to_string(),
    };

    if output.is_dir() {
        return Err(invalid("Path is a directory"));
    }
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(invalid("Parent directory does not exist"));
    }
    if output == input.as_ref()
        || output.canonicalize().ok().is_some_and(|o| input.as_ref().canonicalize().ok() == Some(o))
    {
        return Err(invalid("Output must not overwrite the input"));
    }
    Ok(())
}

/// Validate that a value is positive (> 0)
///
/// # Errors
/// Returns an error if the value is not positive
///
/// # Example
/// ```
/// use matesort_lib::validation::validate_positive;
///
/// validate_positive(10, "mate-window").unwrap();
///
/// let result = validate_positive(0, "mate-window");
/// assert!(result.is_err());
/// ```
#[allow(clippy::needless_pass_by_value)]
pub fn validate_positive<T: Ord + Display + Default>(value: T, name: &str) -> Result<()> {
    if value <= T::default() {
        return Err(MateSortError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("Must be positive (> 0), got: {value}"),
        });
    }
    Ok(())
}
