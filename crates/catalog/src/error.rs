//! Catalog Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// The first four are the caller's to handle; everything else means the
/// operation was rolled back and retrying the same call won't help.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// The arguments describe something the catalog refuses to store.
    #[display("invalid request: {_0}")]
    Validation(#[error(not(source))] String),
    /// A file with the same content hash is already in the catalog.
    #[display("a file with the same hash already belongs to book {book_id}")]
    DuplicateHash { book_id: i64 },
    /// Another book already has this title and author list.
    #[display("book {book_id} already has this title and these authors")]
    BookExists { book_id: i64 },
    /// No book with this ID.
    #[display("book {_0} not found")]
    NotFound(#[error(not(source))] i64),
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// Placing a file at its canonical location failed.
    #[display("storage error")]
    Storage,
    /// The filename template could not be compiled or rendered.
    #[display("filename template error")]
    Template,
    /// Stored data could not be converted to or from its model.
    #[display("invalid catalog data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
