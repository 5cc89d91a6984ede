//! Placing files on disk.

use crate::error::{ErrorKind, Result};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Longest single path segment most filesystems accept, in bytes.
pub const MAX_SEGMENT_BYTES: usize = 255;
/// Longest final filename component we produce, in bytes. Kept below
/// [`MAX_SEGMENT_BYTES`] so that a ` (n)` uniqueness suffix still fits.
pub const MAX_FILENAME_BYTES: usize = 250;

/// How a file gets to its destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transfer {
    /// Leave the source where it is and place a copy at the destination.
    #[default]
    Copy,
    /// Rename the source into place, falling back to copy-then-delete when a
    /// rename isn't possible (crossing devices, for example).
    Move,
}

/// Caps every segment of `path` at [`MAX_SEGMENT_BYTES`] and the final
/// component at [`MAX_FILENAME_BYTES`], keeping the final component's
/// extension intact.
///
/// Truncation always lands on a character boundary. Segments that aren't
/// valid UTF-8 are passed through untouched. Pure, never touches the disk.
///
/// ```
/// use std::path::Path;
/// use tome_storage::truncate_filename;
///
/// let short = Path::new("Frank Herbert/Dune.epub");
/// assert_eq!(truncate_filename(short), short);
///
/// let long = format!("{}.epub", "a".repeat(300));
/// let truncated = truncate_filename(&long);
/// assert_eq!(truncated.as_os_str().len(), 250);
/// assert!(truncated.to_str().unwrap().ends_with(".epub"));
/// ```
pub fn truncate_filename(path: impl AsRef<Path>) -> PathBuf {
    let mut truncated = PathBuf::new();
    let mut components = path.as_ref().components().peekable();
    while let Some(component) = components.next() {
        let Component::Normal(segment) = component else {
            truncated.push(component.as_os_str());
            continue;
        };
        let Some(segment) = segment.to_str() else {
            truncated.push(segment);
            continue;
        };
        match components.peek() {
            Some(_) => truncated.push(floor(segment, MAX_SEGMENT_BYTES)),
            None => truncated.push(truncate_final(segment)),
        }
    }
    truncated
}

fn truncate_final(name: &str) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        // Extensions long enough to eat the entire budget aren't extensions.
        Some((stem, ext)) if !stem.is_empty() && ext.len() + 1 < MAX_FILENAME_BYTES => {
            format!("{}.{ext}", floor(stem, MAX_FILENAME_BYTES - ext.len() - 1))
        },
        _ => floor(name, MAX_FILENAME_BYTES).to_string(),
    }
}

fn floor(s: &str, max_bytes: usize) -> &str {
    &s[..s.floor_char_boundary(max_bytes)]
}

/// Builds the `n`th collision candidate for `path`: `name (n).ext`.
///
/// ```
/// use std::path::Path;
/// use tome_storage::numbered;
///
/// assert_eq!(numbered(Path::new("a/Dune.epub"), 2), Path::new("a/Dune (2).epub"));
/// assert_eq!(numbered(Path::new("a/README"), 1), Path::new("a/README (1)"));
/// ```
pub fn numbered(path: &Path, n: u32) -> PathBuf {
    let mut name: OsString = path.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(format!(" ({n})"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Whether anything exists at `path`. Broken symlinks count as absent.
pub async fn exists(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    Ok(fs::try_exists(path).await.map_err(|e| ErrorKind::io(e, path))?)
}

/// Returns `path` if nothing exists there, otherwise the first of
/// `name (1).ext`, `name (2).ext`, ... that is free.
///
/// There is no practical upper bound on the number of candidates; a directory
/// with thousands of collisions makes this slow, not wrong.
pub async fn unique_name(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if !exists(path).await? {
        return Ok(path.to_path_buf());
    }
    for n in 1.. {
        let candidate = numbered(path, n);
        if !exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    exn::bail!(ErrorKind::AlreadyExists(path.to_path_buf()))
}

/// Places `src` at `dst`, creating any missing parent directories first.
///
/// Never replaces an existing file: if something appears at `dst` the call
/// fails with [`ErrorKind::AlreadyExists`] and the source is left untouched.
/// Copies keep the source's modification time. With [`Transfer::Move`] the
/// file is hard-linked into place and the source unlinked; where links aren't
/// possible (crossing devices, for example) it falls back to copy-then-delete.
/// If only the delete fails the operation still succeeds (the file is in
/// place, a stray source is left behind and logged).
#[instrument(skip_all, fields(src = %src.as_ref().display(), dst = %dst.as_ref().display(), ?transfer))]
pub async fn move_or_copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>, transfer: Transfer) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    if src == dst {
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await.map_err(|e| ErrorKind::io(e, parent))?;
    }
    if transfer == Transfer::Move {
        // Unlike a rename, linking refuses to replace the destination.
        match fs::hard_link(src, dst).await {
            Ok(()) => {
                remove_source(src).await;
                return Ok(());
            },
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                exn::bail!(ErrorKind::AlreadyExists(dst.to_path_buf()))
            },
            Err(e) => tracing::debug!(error = %e, "Hard link failed; falling back to copy and delete"),
        }
    }
    copy_file(src, dst).await?;
    if transfer == Transfer::Move {
        remove_source(src).await;
    }
    Ok(())
}

async fn remove_source(src: &Path) {
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(error = %e, path = %src.display(), "File placed but the source could not be removed");
    }
}

/// Deletes the file at `path`.
pub async fn remove_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    Ok(fs::remove_file(path).await.map_err(|e| ErrorKind::io(e, path))?)
}

async fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    let mut reader = fs::File::open(src).await.map_err(|e| ErrorKind::io(e, src))?;
    let metadata = reader.metadata().await.map_err(|e| ErrorKind::io(e, src))?;
    let mut writer =
        fs::OpenOptions::new().write(true).create_new(true).open(dst).await.map_err(|e| ErrorKind::io(e, dst))?;
    let copied = async {
        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await
    };
    if let Err(e) = copied.await {
        // The destination was created by this call, so a partial copy is ours to clean up.
        _ = fs::remove_file(dst).await;
        exn::bail!(ErrorKind::io(e, dst));
    }
    match metadata.modified() {
        Ok(modified) => {
            if let Err(e) = writer.into_std().await.set_modified(modified) {
                tracing::warn!(error = %e, path = %dst.display(), "Could not preserve modification time on copy");
            }
        },
        Err(e) => tracing::warn!(error = %e, path = %src.display(), "Source modification time unavailable"),
    }
    Ok(())
}
