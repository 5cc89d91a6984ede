//! Transaction-scoped writes, including the full-text index.

use crate::error::{ErrorKind, Result};
use crate::models::{FileRow, sqlx_hates_paths, title_key};
use exn::{OptionExt, ResultExt};
use sqlx::SqliteConnection;
use std::path::Path;
use tome_extract::{Book, BookFile};

pub(crate) async fn insert_book(conn: &mut SqliteConnection, book: &Book) -> Result<i64> {
    let result = sqlx::query(include_str!("../../queries/insert_book.sql"))
        .bind(&book.title)
        .bind(title_key(&book.title))
        .bind(&book.series)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn update_book(conn: &mut SqliteConnection, book: &Book) -> Result<()> {
    sqlx::query(include_str!("../../queries/update_book.sql"))
        .bind(&book.title)
        .bind(title_key(&book.title))
        .bind(&book.series)
        .bind(book.id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

/// Bumps `updated_on` after changes that don't touch the books row itself.
pub(crate) async fn touch_book(conn: &mut SqliteConnection, book_id: i64) -> Result<()> {
    sqlx::query(include_str!("../../queries/touch_book.sql"))
        .bind(book_id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

/// Links every author to the book, creating authors as needed. The same
/// name twice collapses into one link.
pub(crate) async fn link_authors(conn: &mut SqliteConnection, book_id: i64, authors: &[String]) -> Result<()> {
    for author in authors {
        sqlx::query(include_str!("../../queries/upsert_author.sql"))
            .bind(author)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../../queries/link_author.sql"))
            .bind(book_id)
            .bind(author)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
    }
    Ok(())
}

pub(crate) async fn replace_authors(conn: &mut SqliteConnection, book_id: i64, authors: &[String]) -> Result<()> {
    sqlx::query(include_str!("../../queries/unlink_authors.sql"))
        .bind(book_id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    link_authors(conn, book_id, authors).await
}

/// Inserts the file row for `book_id` and returns its ID. Tags are linked
/// separately.
pub(crate) async fn insert_file(conn: &mut SqliteConnection, book_id: i64, file: &BookFile) -> Result<i64> {
    let row = FileRow::try_from(file)?;
    let result = sqlx::query(include_str!("../../queries/insert_file.sql"))
        .bind(book_id)
        .bind(row.extension)
        .bind(row.original_filename)
        .bind(row.filename)
        .bind(row.file_size)
        .bind(row.file_mtime)
        .bind(row.hash)
        .bind(row.source)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn update_filename(conn: &mut SqliteConnection, file_id: i64, filename: &Path) -> Result<()> {
    sqlx::query(include_str!("../../queries/update_filename.sql"))
        .bind(sqlx_hates_paths(filename)?)
        .bind(file_id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

pub(crate) async fn link_tags(conn: &mut SqliteConnection, file_id: i64, tags: &[String]) -> Result<()> {
    for tag in tags {
        sqlx::query(include_str!("../../queries/upsert_tag.sql"))
            .bind(tag)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../../queries/link_tag.sql"))
            .bind(file_id)
            .bind(tag)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
    }
    Ok(())
}

pub(crate) async fn replace_tags(conn: &mut SqliteConnection, file_id: i64, tags: &[String]) -> Result<()> {
    sqlx::query(include_str!("../../queries/unlink_tags.sql"))
        .bind(file_id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    link_tags(conn, file_id, tags).await
}

// =========================================================================
// Search index
// =========================================================================

/// Writes the full aggregate entry for `book`, replacing any existing one.
pub(crate) async fn index_book(conn: &mut SqliteConnection, book: &Book) -> Result<()> {
    delete_index(conn, book.id).await?;
    let join = |tokens: Vec<&str>| tokens.into_iter().filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" ");
    let extensions = join(book.files.iter().map(|f| f.extension.as_str()).collect());
    let tags = join(book.files.iter().flat_map(|f| &f.tags).map(String::as_str).collect());
    let sources = join(book.files.iter().map(|f| f.source.as_str()).collect());
    sqlx::query(include_str!("../../queries/insert_search_entry.sql"))
        .bind(book.id)
        .bind(book.authors.join(" & "))
        .bind(&book.series)
        .bind(&book.title)
        .bind(extensions)
        .bind(tags)
        .bind(sources)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

/// Appends a newly added file's tokens to the book's existing entry and
/// refreshes its series.
pub(crate) async fn index_appended_file(conn: &mut SqliteConnection, book: &Book, file: &BookFile) -> Result<()> {
    let entry: Option<(String, String, String)> = sqlx::query_as(include_str!("../../queries/get_search_entry.sql"))
        .bind(book.id)
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    let (extension, tags, source) = entry.ok_or_raise(|| ErrorKind::InvalidData("search index entry missing"))?;
    let append = |existing: String, new: &str| match (existing.is_empty(), new.is_empty()) {
        (_, true) => existing,
        (true, false) => new.to_string(),
        (false, false) => format!("{existing} {new}"),
    };
    sqlx::query(include_str!("../../queries/append_search_entry.sql"))
        .bind(append(extension, &file.extension))
        .bind(append(tags, &file.tags.join(" ")))
        .bind(append(source, &file.source))
        .bind(&book.series)
        .bind(book.id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

pub(crate) async fn delete_index(conn: &mut SqliteConnection, book_id: i64) -> Result<()> {
    sqlx::query(include_str!("../../queries/delete_search_entry.sql"))
        .bind(book_id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}
