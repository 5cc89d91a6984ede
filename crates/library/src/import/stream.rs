use crate::Library;
use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::import::Import;
use crate::import::file::import_file_inner;
use crate::import::walk::walk;
use async_stream::stream;
use futures::Stream;
use std::path::PathBuf;
use tome_storage::Transfer;

/// Progress events emitted by [`Library::import`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. [`Imported`](Self::Imported), zero or more times, one per file that
///    didn't fail, in path order and file-name order within a directory.
/// 3. [`Complete`](Self::Complete), exactly once.
#[derive(Debug)]
pub enum ImportEvent {
    Started,
    Imported { path: PathBuf, import: Import },
    Complete,
}

/// Imports the files at `paths` one after the other, descending into
/// directories (all the way down when `recursive`). A file or directory that
/// fails to import is reported as an `Err` item without ending the stream.
pub(crate) fn import<'a>(
    library: &'a Library,
    paths: Vec<PathBuf>,
    transfer: Transfer,
    recursive: bool,
) -> impl Stream<Item = LibraryResult<ImportEvent>> + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        yield Ok(ImportEvent::Started);
        for root in paths {
            let files = match walk(root.clone(), recursive).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(path = %root.display(), error = ?e, "Import failed");
                    yield Err(e.raise(LibraryErrorKind::Import));
                    continue;
                },
            };
            for path in files {
                match import_file_inner(library, &path, transfer, None).await {
                    Ok(import) => yield Ok(ImportEvent::Imported { path, import }),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = ?e, "Import failed");
                        yield Err(e.raise(LibraryErrorKind::Import));
                    },
                }
            }
        }
        yield Ok(ImportEvent::Complete);
    })
}
