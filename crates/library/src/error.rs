//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// The catalog, template, parsers or conversion pipeline could not be set
    /// up from the configuration.
    #[display("could not open library")]
    Open,
    #[display("could not import file")]
    Import,
    #[display("catalog error")]
    Catalog,
    #[display("conversion error")]
    Convert,
    /// No file with this ID.
    #[display("file {_0} not found")]
    NotFound(#[error(not(source))] i64),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Convert)
    }
}
