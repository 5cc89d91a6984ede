//! Extraction Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file could not be read.
    #[display("could not read file: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// A configured filename pattern does not compile.
    #[display("invalid regular expression '{_0}'")]
    InvalidRegexp(#[error(not(source))] String),
    /// A parser name in the configured priority list is not known.
    #[display("unknown metadata parser '{_0}'")]
    UnknownParser(#[error(not(source))] String),
    /// The file is not a readable EPUB container.
    #[display("malformed EPUB: {_0}")]
    MalformedEpub(#[error(not(source))] &'static str),
    /// The file is not a readable MOBI/AZW3 container.
    #[display("malformed MOBI: {_0}")]
    MalformedMobi(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
