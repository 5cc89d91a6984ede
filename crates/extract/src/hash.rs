use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::path::Path;
use tracing::instrument;

/// BLAKE3 digest of the file's bytes, hex encoded.
///
/// Streams the file rather than reading it into memory; books can be large
/// scans. Blocking, so async callers should run it off the executor.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(file).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Extended attribute a file can carry its content hash in.
pub const HASH_XATTR: &str = "user.hash";

/// The hash stored in the file's [`HASH_XATTR`] attribute, if any, to be used
/// in place of [`hash_file`]. Lets a file that was edited after download keep
/// the identity of the original.
///
/// Missing attributes, unreadable ones and blank or non-UTF-8 values all
/// yield `None`. Blocking.
#[cfg(unix)]
pub fn stored_hash(path: impl AsRef<Path>) -> Option<String> {
    let path = path.as_ref();
    match xattr::get(path, HASH_XATTR) {
        Ok(value) => {
            let value = String::from_utf8(value?).ok()?;
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        },
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Extended attributes unreadable");
            None
        },
    }
}

/// Extended attributes are only read on Unix.
#[cfg(not(unix))]
pub fn stored_hash(_path: impl AsRef<Path>) -> Option<String> {
    None
}
