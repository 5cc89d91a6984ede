use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use time::OffsetDateTime;
use tome_extract::{Book, BookFile};
use tome_storage::Transfer;

#[derive(sqlx::FromRow)]
pub(crate) struct BookRow {
    pub id: i64,
    pub title: String,
    pub series: String,
}
impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Self { id: row.id, authors: Vec::new(), title: row.title, series: row.series, files: Vec::new() }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub id: i64,
    pub book_id: i64,
    pub extension: String,
    pub original_filename: String,
    pub filename: String,
    pub file_size: i64,
    pub file_mtime: i64,
    pub hash: String,
    pub source: String,
}
impl TryFrom<&BookFile> for FileRow {
    type Error = Error;
    fn try_from(file: &BookFile) -> Result<Self, Self::Error> {
        Ok(Self {
            id: file.id,
            book_id: file.book_id,
            extension: file.extension.clone(),
            original_filename: sqlx_hates_paths(&file.original_filename)?,
            filename: sqlx_hates_paths(&file.filename)?,
            file_size: i64::try_from(file.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            file_mtime: file.mtime.unix_timestamp(),
            hash: file.hash.clone(),
            source: file.source.clone(),
        })
    }
}
impl TryFrom<FileRow> for BookFile {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            book_id: row.book_id,
            extension: row.extension,
            tags: Vec::new(),
            hash: row.hash,
            original_filename: PathBuf::from(row.original_filename),
            filename: PathBuf::from(row.filename),
            mtime: OffsetDateTime::from_unix_timestamp(row.file_mtime)
                .or_raise(|| ErrorKind::InvalidData("file modification time"))?,
            size: u64::try_from(row.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            source: row.source,
        })
    }
}

/// Lookup key for case-insensitive title matches. SQLite's `NOCASE` only
/// folds ASCII.
pub(crate) fn title_key(title: &str) -> String {
    title.to_lowercase()
}

pub(crate) fn sqlx_hates_paths(path: impl AsRef<std::path::Path>) -> Result<String, Error> {
    Ok(path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
}

/// One page of [`Catalog::search_paged`](crate::Catalog::search_paged) results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub books: Vec<Book>,
    /// How many further results exist beyond this page, capped at the
    /// requested lookahead.
    pub more: usize,
}

/// A file placed at a new location by a filename pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub file_id: i64,
    /// Absolute path the file was taken from.
    pub from: PathBuf,
    /// Absolute path the file now lives at.
    pub to: PathBuf,
    pub transfer: Transfer,
}
