//! Conversion Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A conversion error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// The pipeline no longer accepts work.
    #[display("conversion pipeline is closed")]
    Closed,
    #[display("ebook converter not detected on your system")]
    ConverterNotFound,
    /// The converter exited with a non-zero exit code.
    #[display("converter exited with code: {_0}")]
    ConverterFailed(#[error(not(source))] i32),
    /// The converter was terminated by a signal.
    #[display("converter was killed")]
    ConverterKilled,
    #[display("converter timed out")]
    Timeout,
    Io,
    /// The previous attempt for this file failed. The cause is attached; the
    /// next request starts a fresh attempt.
    #[display("conversion failed")]
    Failed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }
}
