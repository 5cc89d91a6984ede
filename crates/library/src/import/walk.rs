use crate::import::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every non-directory under `root`, in file-name order. `root` itself is
/// returned when it is a file. Without `recursive` only the immediate
/// children of a directory are listed.
///
/// Entries that can't be read below the root are logged and skipped; an
/// unreadable root is an error.
pub(crate) async fn walk(root: PathBuf, recursive: bool) -> Result<Vec<PathBuf>> {
    let error = || ErrorKind::Io(root.clone());
    let task = tokio::task::spawn_blocking({
        let root = root.clone();
        move || files(&root, recursive)
    });
    task.await.or_raise(error)?
}

fn files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(root).max_depth(max_depth).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e).or_raise(|| ErrorKind::Io(root.to_path_buf())),
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            },
        };
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
