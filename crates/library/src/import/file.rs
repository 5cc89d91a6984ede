use crate::Library;
use crate::import::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tome_catalog::error::ErrorKind as CatalogErrorKind;
use tome_extract::{Book, BookFile, Parsed, ParserRegistry, hash_file, stored_hash};
use tome_storage::Transfer;

/// The outcome of importing a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Import {
    /// The file was catalogued, either as a new book or as another format of
    /// a book already in the library.
    Imported(Book),
    /// A file with identical content is already catalogued.
    Duplicate { book_id: i64 },
    /// No metadata parser recognised the file; nothing was done.
    Unparsed,
}

/// Runs the (blocking) parsers against a single file.
pub(crate) async fn parse(parsers: &ParserRegistry, path: &Path) -> Result<Option<Parsed>> {
    let parsers = parsers.clone();
    let candidates = vec![path.to_path_buf()];
    tokio::task::spawn_blocking(move || parsers.parse(&candidates))
        .await
        .or_raise(|| ErrorKind::Io(path.to_path_buf()))
}

pub(crate) async fn import_file_inner(
    library: &Library,
    path: &Path,
    transfer: Transfer,
    hash_override: Option<String>,
) -> Result<Import> {
    let path = std::path::absolute(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let Some(Parsed { parser, book }) = parse(&library.parsers, &path).await? else {
        tracing::info!(path = %path.display(), "No metadata parser recognised file");
        return Ok(Import::Unparsed);
    };
    let metadata = tokio::fs::metadata(&path).await.or_raise(|| ErrorKind::Io(path.clone()))?;
    let mtime = metadata.modified().map(OffsetDateTime::from).or_raise(|| ErrorKind::Io(path.clone()))?;
    let hash = match hash_override {
        Some(hash) => hash,
        None => hash(path.clone()).await?,
    };
    let file = BookFile::new(&path, hash, metadata.len(), mtime).with_source(parser);
    let book = Book::from(book).with_file(file);
    match library.catalog.import_book(&book, &library.template, transfer).await {
        Ok(book) => Ok(Import::Imported(book)),
        Err(e) => match &*e {
            CatalogErrorKind::DuplicateHash { book_id } => {
                tracing::info!(path = %path.display(), book_id, "File already catalogued");
                Ok(Import::Duplicate { book_id: *book_id })
            },
            _ => Err(e.raise(ErrorKind::Catalog)),
        },
    }
}

/// The hash stored in the file's extended attributes, or else its content hash.
async fn hash(path: PathBuf) -> Result<String> {
    let error = || ErrorKind::Io(path.clone());
    let task = tokio::task::spawn_blocking({
        let path = path.clone();
        move || match stored_hash(&path) {
            Some(hash) => Ok(hash),
            None => hash_file(&path),
        }
    });
    task.await.or_raise(error)?.or_raise(error)
}
