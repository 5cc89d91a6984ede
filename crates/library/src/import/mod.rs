//! Importing files from outside the library.
//!
//! Paths given to [`Library::import`](crate::Library::import) may be files or
//! directories; directories are expanded to the files inside them.
//!
//! A file is parsed for book metadata, hashed, and handed to the
//! [catalog](tome_catalog::Catalog), which attaches it to an existing book of
//! the same title and authors or creates a new one, then moves or copies the
//! file to its canonical location.

pub mod error;
mod file;
mod stream;
mod walk;

pub use self::file::Import;
pub(crate) use self::file::{import_file_inner, parse};
pub use self::stream::ImportEvent;
pub(crate) use self::stream::import;
