//! Transaction-scoped reads.
//!
//! Batch lookups issue one query per table (books, authors, files, tags) and
//! assemble the results in memory. Unknown IDs are silently omitted.

use crate::error::{ErrorKind, Result};
use crate::models::{BookRow, FileRow, sqlx_hates_paths, title_key};
use exn::ResultExt;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;
use std::path::Path;
use tome_extract::{Book, BookFile};

fn in_list<'a>(select: &str, ids: &'a [i64], suffix: &str) -> QueryBuilder<'a, Sqlite> {
    let mut query = QueryBuilder::new(select);
    query.push(" IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ");
    query.push(suffix);
    query
}

/// Books with their authors and files, ordered by ID.
pub(crate) async fn books(conn: &mut SqliteConnection, ids: &[i64]) -> Result<Vec<Book>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<BookRow> = in_list("SELECT id, title, series FROM books WHERE id", ids, "ORDER BY id")
        .build_query_as()
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    let mut authors = authors(conn, ids).await?;
    let mut files = files_by_book(conn, ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let mut book = Book::from(row);
            book.authors = authors.remove(&book.id).unwrap_or_default();
            book.files = files.remove(&book.id).unwrap_or_default();
            book
        })
        .collect())
}

/// Author names per book, in link order.
async fn authors(conn: &mut SqliteConnection, book_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
    let select = "SELECT ba.book_id, a.name FROM books_authors ba JOIN authors a ON ba.author_id = a.id WHERE ba.book_id";
    let rows: Vec<(i64, String)> = in_list(select, book_ids, "ORDER BY ba.id")
        .build_query_as()
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    for (book_id, name) in rows {
        map.entry(book_id).or_default().push(name);
    }
    Ok(map)
}

const SELECT_FILES: &str =
    "SELECT id, book_id, extension, original_filename, filename, file_size, file_mtime, hash, source FROM files WHERE";

/// Files per book, ordered by ID.
async fn files_by_book(conn: &mut SqliteConnection, book_ids: &[i64]) -> Result<HashMap<i64, Vec<BookFile>>> {
    let rows: Vec<FileRow> = in_list(&format!("{SELECT_FILES} book_id"), book_ids, "ORDER BY id")
        .build_query_as()
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    let mut map: HashMap<i64, Vec<BookFile>> = HashMap::new();
    for file in with_tags(conn, rows).await? {
        map.entry(file.book_id).or_default().push(file);
    }
    Ok(map)
}

/// Files with their tags, ordered by ID.
pub(crate) async fn files(conn: &mut SqliteConnection, ids: &[i64]) -> Result<Vec<BookFile>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<FileRow> = in_list(&format!("{SELECT_FILES} id"), ids, "ORDER BY id")
        .build_query_as()
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    with_tags(conn, rows).await
}

async fn with_tags(conn: &mut SqliteConnection, rows: Vec<FileRow>) -> Result<Vec<BookFile>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let select = "SELECT ft.file_id, t.name FROM files_tags ft JOIN tags t ON ft.tag_id = t.id WHERE ft.file_id";
    let tags: Vec<(i64, String)> = in_list(select, &ids, "ORDER BY ft.id")
        .build_query_as()
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    for (file_id, tag) in tags {
        map.entry(file_id).or_default().push(tag);
    }
    rows.into_iter()
        .map(|row| {
            let mut file = BookFile::try_from(row)?;
            file.tags = map.remove(&file.id).unwrap_or_default();
            Ok(file)
        })
        .collect()
}

/// A single book, or [`ErrorKind::NotFound`].
pub(crate) async fn book(conn: &mut SqliteConnection, id: i64) -> Result<Book> {
    match books(conn, &[id]).await?.pop() {
        Some(book) => Ok(book),
        None => exn::bail!(ErrorKind::NotFound(id)),
    }
}

/// The book with this title (case-insensitive) and author list
/// (case-insensitive, same order), lowest ID first.
pub(crate) async fn book_id_by_title_and_authors(
    conn: &mut SqliteConnection,
    title: &str,
    authors: &[impl AsRef<str>],
) -> Result<Option<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(include_str!("../../queries/find_book_ids_by_title.sql"))
        .bind(title_key(title))
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    if ids.is_empty() {
        return Ok(None);
    }
    let candidates = self::authors(conn, &ids).await?;
    Ok(ids.into_iter().find(|id| {
        let names = candidates.get(id).map(Vec::as_slice).unwrap_or_default();
        Book::new(title, names.iter(), "").is_same_work(title, authors)
    }))
}

pub(crate) async fn book_id_by_hash(conn: &mut SqliteConnection, hash: &str) -> Result<Option<i64>> {
    sqlx::query_scalar(include_str!("../../queries/find_file_by_hash.sql"))
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)
}

pub(crate) async fn book_id_by_filename(conn: &mut SqliteConnection, filename: &Path) -> Result<Option<i64>> {
    sqlx::query_scalar(include_str!("../../queries/find_book_id_by_filename.sql"))
        .bind(sqlx_hates_paths(filename)?)
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)
}

/// Whether any file other than `file_id` is stored under `filename`.
pub(crate) async fn filename_claimed(conn: &mut SqliteConnection, filename: &Path, file_id: i64) -> Result<bool> {
    sqlx::query_scalar(include_str!("../../queries/filename_claimed.sql"))
        .bind(sqlx_hates_paths(filename)?)
        .bind(file_id)
        .fetch_one(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)
}
