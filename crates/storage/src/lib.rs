//! Filesystem helpers for the book library.
//!
//! Everything that touches the library tree on disk goes through here: path
//! validation, filename truncation, collision-free naming and the
//! rename-or-copy primitive used whenever a file has to be placed at its
//! canonical location.

pub mod error;
mod fs;
mod path;

pub use crate::fs::{
    MAX_FILENAME_BYTES, MAX_SEGMENT_BYTES, Transfer, exists, move_or_copy_file, numbered, remove_file,
    truncate_filename, unique_name,
};
pub use crate::path::validate as validate_path;
