//! The filename pass: puts every file of a book at its canonical path.
//!
//! For each file the template is rendered and truncated. A file already
//! stored under that path is left alone. Otherwise the first free candidate
//! (`name.ext`, `name (1).ext`, ...) is chosen, where a candidate is taken if
//! another file record claims it or something other than this very file
//! exists there on disk. The file is moved or copied and its new relative
//! path is recorded.
//!
//! Every placement is journaled so the caller can put files back when the
//! surrounding transaction does not commit.

use crate::error::{ErrorKind, Result};
use crate::filename::PathGenerator;
use crate::models::Relocation;
use crate::repo::{fetch, write};
use exn::ResultExt;
use sqlx::SqliteConnection;
use std::path::Path;
use tome_extract::{Book, BookFile};
use tome_storage::error::ErrorKind as StorageErrorKind;
use tome_storage::{Transfer, move_or_copy_file, numbered, remove_file, truncate_filename};

/// Files placed so far by one catalog operation.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    relocations: Vec<Relocation>,
}
impl Journal {
    pub(crate) fn into_inner(self) -> Vec<Relocation> {
        self.relocations
    }

    /// Best-effort undo, newest first. Failures are logged and skipped.
    pub(crate) async fn revert(self) {
        for relocation in self.relocations.into_iter().rev() {
            let Relocation { file_id, from, to, transfer } = relocation;
            let result = match transfer {
                Transfer::Move => move_or_copy_file(&to, &from, Transfer::Move).await,
                Transfer::Copy => remove_file(&to).await,
            };
            match result {
                Ok(()) => tracing::debug!(file_id, path = %from.display(), "Reverted file placement"),
                Err(e) => tracing::warn!(
                    file_id,
                    from = %from.display(),
                    to = %to.display(),
                    error = ?e,
                    "Could not revert file placement"
                ),
            }
        }
    }
}

/// Runs the filename pass over every file of `book`.
pub(crate) async fn recalculate(
    conn: &mut SqliteConnection,
    root: &Path,
    book: &Book,
    template: &PathGenerator,
    transfer: Transfer,
    journal: &mut Journal,
) -> Result<()> {
    for file in &book.files {
        if file.id == 0 {
            exn::bail!(ErrorKind::InvalidData("file without an ID"));
        }
        place(conn, root, book, file, template, transfer, journal).await?;
    }
    Ok(())
}

async fn place(
    conn: &mut SqliteConnection,
    root: &Path,
    book: &Book,
    file: &BookFile,
    template: &PathGenerator,
    transfer: Transfer,
    journal: &mut Journal,
) -> Result<()> {
    let target = truncate_filename(template.generate(book, file)?);
    if target == file.filename {
        return Ok(());
    }
    // Files being imported are still stored under their absolute source path.
    let current = if file.filename.is_absolute() { file.filename.clone() } else { root.join(&file.filename) };
    let mut candidate = target.clone();
    let mut n = 0;
    let destination = loop {
        if taken(conn, root, &candidate, file.id, &current).await? {
            n += 1;
            candidate = numbered(&target, n);
            continue;
        }
        if candidate == file.filename {
            return Ok(());
        }
        let destination = root.join(&candidate);
        match move_or_copy_file(&current, &destination, transfer).await {
            Ok(()) => break destination,
            // Something outside the catalog claimed the name after it was checked.
            Err(e) if matches!(&*e, StorageErrorKind::AlreadyExists(_)) => {
                tracing::debug!(file_id = file.id, path = %destination.display(), "Name taken while placing file");
                n += 1;
                candidate = numbered(&target, n);
            },
            Err(e) => return Err(e.raise(ErrorKind::Storage)),
        }
    };
    tracing::info!(file_id = file.id, from = %current.display(), to = %candidate.display(), ?transfer, "Placed file");
    journal.relocations.push(Relocation { file_id: file.id, from: current, to: destination, transfer });
    write::update_filename(conn, file.id, &candidate).await
}

async fn taken(
    conn: &mut SqliteConnection,
    root: &Path,
    candidate: &Path,
    file_id: i64,
    current: &Path,
) -> Result<bool> {
    if fetch::filename_claimed(conn, candidate, file_id).await? {
        return Ok(true);
    }
    let absolute = root.join(candidate);
    if absolute == current {
        return Ok(false);
    }
    tome_storage::exists(&absolute).await.or_raise(|| ErrorKind::Storage)
}
