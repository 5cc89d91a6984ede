//! Path validation for paths relative to the library root.
//!
//! Rendered filenames come from user-configured templates fed with metadata
//! pulled out of arbitrary book files, so nothing about them can be trusted.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Validates and normalizes a path that is meant to live under the library root.
///
/// `.` segments, duplicate separators and a leading `/` are dropped, `..`
/// segments are resolved as long as they never climb above the root. Null
/// bytes, platform prefixes and paths that normalize to nothing are rejected
/// with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tome_storage::validate_path;
///
/// assert!(validate_path("Frank Herbert/Dune.epub").is_ok());
/// assert!(validate_path("Frank Herbert/../Dune.epub").is_ok());
/// assert!(validate_path("../Dune.epub").is_err());
/// assert!(validate_path("Dune\0.epub").is_err());
/// assert_eq!(
///     validate_path("/Frank Herbert//./Dune.epub").unwrap(),
///     Path::new("Frank Herbert/Dune.epub")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(path.to_path_buf());
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => {
                // Null bytes survive Path::components() on Unix, but C-based
                // syscalls would silently truncate the path at them.
                if segment.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}
