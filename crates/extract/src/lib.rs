//! Book models and metadata extraction.
//!
//! A file being imported knows nothing about itself beyond its name and its
//! bytes. This crate turns those into a [`ParsedBook`] (authors, title,
//! series) through any number of [`MetadataParser`]s tried in priority order,
//! and into a [`BookFile`] (extension, tags, hash, size, mtime) through the
//! filename and content helpers.

pub mod error;
mod hash;
pub mod models;
pub mod parser;
mod tags;

pub use crate::hash::{HASH_XATTR, hash_file, stored_hash};
pub use crate::models::{Book, BookFile, ParsedBook};
pub use crate::parser::{EpubParser, MetadataParser, MobiParser, Parsed, ParserRegistry, RegexpParser};
pub use crate::tags::{split_title_and_tags, tags_from_filename};
