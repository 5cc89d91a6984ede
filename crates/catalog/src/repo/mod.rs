//! The catalog of books, their authors, files and tags.
//!
//! Every public operation runs in a single transaction. Operations that run a
//! filename pass keep a journal of the files they placed, and put those files
//! back (best-effort) when the transaction does not commit.

mod fetch;
mod rename;
mod write;

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::filename::PathGenerator;
use crate::models::{Relocation, SearchPage};
use exn::ResultExt;
use rename::Journal;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tome_extract::{Book, BookFile};
use tome_storage::Transfer;
use tracing::instrument;

/// Repository for books and the files they are available as.
///
/// File records store paths relative to `root`, the library directory that
/// the filename pass places files into.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
    root: PathBuf,
}
impl Catalog {
    pub fn new(db: &Database, root: impl Into<PathBuf>) -> Self {
        Self { pool: db.pool().clone(), root: root.into() }
    }

    /// The library directory file paths are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Starts a transaction that holds the write lock from its first
    /// statement. A deferred `BEGIN` would read first and then fail with
    /// `SQLITE_BUSY_SNAPSHOT` when another writer commits in between.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin_with("BEGIN IMMEDIATE").await.or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Stores a freshly parsed book that carries exactly one file.
    ///
    /// The file is attached to an existing book when one with the same title
    /// and authors exists, in which case a non-empty incoming series replaces
    /// the stored one. The file is then moved or copied to its canonical
    /// location.
    ///
    /// Returns [`ErrorKind::DuplicateHash`] if a file with the same content is
    /// already catalogued.
    #[instrument(skip_all, fields(title = %book.title))]
    pub async fn import_book(&self, book: &Book, template: &PathGenerator, transfer: Transfer) -> Result<Book> {
        let [file] = book.files.as_slice() else {
            exn::bail!(ErrorKind::Validation(format!("expected exactly one file, got {}", book.files.len())));
        };
        validate_identity(book)?;
        let mut journal = Journal::default();
        match self.import_in(book, file, template, transfer, &mut journal).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                journal.revert().await;
                Err(e)
            },
        }
    }

    async fn import_in(
        &self,
        book: &Book,
        file: &BookFile,
        template: &PathGenerator,
        transfer: Transfer,
        journal: &mut Journal,
    ) -> Result<Book> {
        let mut tx = self.begin_write().await?;
        if let Some(book_id) = fetch::book_id_by_hash(&mut tx, &file.hash).await? {
            exn::bail!(ErrorKind::DuplicateHash { book_id });
        }
        let existing = fetch::book_id_by_title_and_authors(&mut tx, &book.title, &book.authors).await?;
        let book_id = match existing {
            Some(id) => {
                if !book.series.is_empty() {
                    let current = fetch::book(&mut tx, id).await?;
                    if current.series != book.series {
                        write::update_book(&mut tx, &Book { series: book.series.clone(), ..current }).await?;
                    }
                }
                id
            },
            None => {
                let id = write::insert_book(&mut tx, book).await?;
                write::link_authors(&mut tx, id, &book.authors).await?;
                id
            },
        };
        let mut file = file.clone();
        file.book_id = book_id;
        file.id = write::insert_file(&mut tx, book_id, &file).await?;
        write::link_tags(&mut tx, file.id, &file.tags).await?;

        let stored = fetch::book(&mut tx, book_id).await?;
        match existing {
            Some(_) => write::index_appended_file(&mut tx, &stored, &file).await?,
            None => write::index_book(&mut tx, &stored).await?,
        }
        rename::recalculate(&mut tx, &self.root, &stored, template, transfer, journal).await?;
        let stored = fetch::book(&mut tx, book_id).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::info!(book_id, file_id = file.id, merged = existing.is_some(), "Imported book");
        Ok(stored)
    }

    // =========================================================================
    // Update/Merge
    // =========================================================================

    /// Replaces the stored title, series, authors and per-file tags of
    /// `book.id` with those of `book`, then moves its files to match.
    ///
    /// A stored series is only replaced by a different one when
    /// `overwrite_series` is set. `book.files` must list the stored files in
    /// their stored order; only their tags are read.
    #[instrument(skip_all, fields(book_id = book.id))]
    pub async fn update_book(&self, book: &Book, template: &PathGenerator, overwrite_series: bool) -> Result<()> {
        validate_identity(book)?;
        let mut journal = Journal::default();
        let result = self.update_in(book, template, overwrite_series, &mut journal).await;
        if result.is_err() {
            journal.revert().await;
        }
        result
    }

    async fn update_in(
        &self,
        book: &Book,
        template: &PathGenerator,
        overwrite_series: bool,
        journal: &mut Journal,
    ) -> Result<()> {
        let mut tx = self.begin_write().await?;
        let current = fetch::book(&mut tx, book.id).await?;
        if let Some(book_id) = fetch::book_id_by_title_and_authors(&mut tx, &book.title, &book.authors).await?
            && book_id != book.id
        {
            exn::bail!(ErrorKind::BookExists { book_id });
        }
        if book.files.len() != current.files.len() || book.files.iter().zip(&current.files).any(|(a, b)| a.id != b.id)
        {
            exn::bail!(ErrorKind::Validation("file list reorder not supported".to_string()));
        }
        let series = if current.series.is_empty() || overwrite_series { &book.series } else { &current.series };
        if book.title != current.title || *series != current.series {
            let requested = Book { id: book.id, title: book.title.clone(), series: series.clone(), ..Book::default() };
            write::update_book(&mut tx, &requested).await?;
        }
        if book.authors != current.authors {
            write::replace_authors(&mut tx, book.id, &book.authors).await?;
        }
        for (requested, stored) in book.files.iter().zip(&current.files) {
            if requested.tags != stored.tags {
                write::replace_tags(&mut tx, stored.id, &requested.tags).await?;
            }
        }
        write::touch_book(&mut tx, book.id).await?;
        let stored = fetch::book(&mut tx, book.id).await?;
        write::index_book(&mut tx, &stored).await?;
        rename::recalculate(&mut tx, &self.root, &stored, template, Transfer::Move, journal).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Folds `ids[1..]` into `ids[0]`: their files are reassigned, the books
    /// themselves deleted, and every file of the surviving book moved to
    /// match.
    #[instrument(skip(self, template))]
    pub async fn merge_books(&self, ids: &[i64], template: &PathGenerator) -> Result<()> {
        let [target, rest @ ..] = ids else {
            exn::bail!(ErrorKind::Validation("nothing to merge".to_string()));
        };
        if rest.is_empty() {
            exn::bail!(ErrorKind::Validation("merging needs at least two books".to_string()));
        }
        if ids.iter().collect::<HashSet<_>>().len() != ids.len() {
            exn::bail!(ErrorKind::Validation("cannot merge a book into itself".to_string()));
        }
        let mut journal = Journal::default();
        let result = self.merge_in(*target, rest, template, &mut journal).await;
        if result.is_err() {
            journal.revert().await;
        }
        result
    }

    async fn merge_in(&self, target: i64, rest: &[i64], template: &PathGenerator, journal: &mut Journal) -> Result<()> {
        let mut tx = self.begin_write().await?;
        fetch::book(&mut tx, target).await?;
        let found: HashSet<i64> = fetch::books(&mut tx, rest).await?.into_iter().map(|b| b.id).collect();
        if let Some(missing) = rest.iter().find(|id| !found.contains(*id)) {
            exn::bail!(ErrorKind::NotFound(*missing));
        }
        for id in rest {
            reassign_files(&mut tx, *id, target).await?;
            write::delete_index(&mut tx, *id).await?;
            delete_book(&mut tx, *id).await?;
        }
        write::touch_book(&mut tx, target).await?;
        let stored = fetch::book(&mut tx, target).await?;
        write::index_book(&mut tx, &stored).await?;
        rename::recalculate(&mut tx, &self.root, &stored, template, Transfer::Move, journal).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::info!(book_id = target, merged = ?rest, files = stored.files.len(), "Merged books");
        Ok(())
    }

    /// Moves every file of `book_id` to the path the template currently
    /// renders for it. Running it twice in a row relocates nothing the second
    /// time.
    #[instrument(skip(self, template))]
    pub async fn recalculate_filenames(
        &self,
        book_id: i64,
        template: &PathGenerator,
        transfer: Transfer,
    ) -> Result<Vec<Relocation>> {
        let mut journal = Journal::default();
        match self.recalculate_in(book_id, template, transfer, &mut journal).await {
            Ok(()) => Ok(journal.into_inner()),
            Err(e) => {
                journal.revert().await;
                Err(e)
            },
        }
    }

    async fn recalculate_in(
        &self,
        book_id: i64,
        template: &PathGenerator,
        transfer: Transfer,
        journal: &mut Journal,
    ) -> Result<()> {
        let mut tx = self.begin_write().await?;
        let book = fetch::book(&mut tx, book_id).await?;
        rename::recalculate(&mut tx, &self.root, &book, template, transfer, journal).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Full-text search using FTS4 query syntax, e.g. `author:herbert dune`.
    ///
    /// Blank terms match nothing.
    pub async fn search(&self, terms: &str) -> Result<Vec<Book>> {
        if terms.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        let ids: Vec<i64> = sqlx::query_scalar(include_str!("../../queries/search.sql"))
            .bind(terms)
            .fetch_all(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        fetch::books(&mut conn, &ids).await
    }

    /// One page of [`search`](Self::search) results.
    ///
    /// Up to `lookahead` results past the page are counted, not fetched, and
    /// reported as [`SearchPage::more`]. A `limit` of zero returns everything
    /// from `offset` onwards.
    pub async fn search_paged(&self, terms: &str, offset: usize, limit: usize, lookahead: usize) -> Result<SearchPage> {
        if terms.trim().is_empty() {
            return Ok(SearchPage::default());
        }
        let out_of_range = || ErrorKind::Validation("page out of range".to_string());
        // SQLite treats a negative LIMIT as no limit at all.
        let window = match limit {
            0 => -1,
            n => i64::try_from(n.saturating_add(lookahead)).or_raise(out_of_range)?,
        };
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        let mut ids: Vec<i64> = sqlx::query_scalar(include_str!("../../queries/search_paged.sql"))
            .bind(terms)
            .bind(window)
            .bind(i64::try_from(offset).or_raise(out_of_range)?)
            .fetch_all(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let more = match limit {
            0 => 0,
            n => ids.len().saturating_sub(n),
        };
        if limit > 0 {
            ids.truncate(limit);
        }
        Ok(SearchPage { books: fetch::books(&mut conn, &ids).await?, more })
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Books with their authors, files and tags, ordered by ID. Unknown IDs
    /// are left out.
    pub async fn get_books_by_id(&self, ids: &[i64]) -> Result<Vec<Book>> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        fetch::books(&mut conn, ids).await
    }

    /// Files with their tags, ordered by ID. Unknown IDs are left out.
    pub async fn get_files_by_id(&self, ids: &[i64]) -> Result<Vec<BookFile>> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        fetch::files(&mut conn, ids).await
    }

    pub async fn get_book_id_by_title_and_authors(
        &self,
        title: &str,
        authors: &[impl AsRef<str>],
    ) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        fetch::book_id_by_title_and_authors(&mut conn, title, authors).await
    }

    /// The book owning the file stored at `path`, which is either relative to
    /// the library root or absolute inside it.
    pub async fn get_book_id_by_filename(&self, path: impl AsRef<Path>) -> Result<Option<i64>> {
        let path = path.as_ref();
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        fetch::book_id_by_filename(&mut conn, relative).await
    }
}

/// Titles must be non-blank, and so must every author name.
fn validate_identity(book: &Book) -> Result<()> {
    if book.title.trim().is_empty() {
        exn::bail!(ErrorKind::Validation("title is empty".to_string()));
    }
    if book.authors.iter().any(|a| a.trim().is_empty()) {
        exn::bail!(ErrorKind::Validation("author name is empty".to_string()));
    }
    Ok(())
}

async fn reassign_files(conn: &mut SqliteConnection, from: i64, to: i64) -> Result<()> {
    sqlx::query(include_str!("../../queries/reassign_files.sql"))
        .bind(to)
        .bind(from)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

async fn delete_book(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query(include_str!("../../queries/delete_book.sql"))
        .bind(id)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Durability;
    use std::sync::Arc;
    use tempfile::TempDir;
    use time::OffsetDateTime;
    use tokio::task::JoinSet;

    const TEMPLATE: &str = "{{ authors_short|escape }}/{{ title|escape }}.{{ ext }}";

    struct Fixture {
        dir: TempDir,
        catalog: Catalog,
        template: PathGenerator,
    }
    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::connect_in_memory().await.unwrap();
            let catalog = Catalog::new(&db, dir.path().join("library"));
            Self { dir, catalog, template: TEMPLATE.parse().unwrap() }
        }

        /// Writes a file into the incoming directory, hashed by its content.
        async fn incoming(&self, name: &str, content: &str) -> BookFile {
            let path = self.dir.path().join("incoming").join(name);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, content).await.unwrap();
            BookFile::new(path, content, content.len() as u64, OffsetDateTime::UNIX_EPOCH).with_source("regexp")
        }

        async fn import(&self, title: &str, authors: &[&str], series: &str, file: BookFile) -> Result<Book> {
            let book = Book::new(title, authors.iter().copied(), series).with_file(file);
            self.catalog.import_book(&book, &self.template, Transfer::Move).await
        }

        fn library(&self, relative: &str) -> PathBuf {
            self.catalog.root().join(relative)
        }

        async fn updated_on(&self, book_id: i64) -> i64 {
            let row: (i64,) = sqlx::query_as("SELECT updated_on FROM books WHERE id = ?")
                .bind(book_id)
                .fetch_one(&self.catalog.pool)
                .await
                .unwrap();
            row.0
        }
    }

    #[tokio::test]
    async fn test_import_places_file() {
        let fx = Fixture::new().await;
        let file = fx.incoming("dune (retail).epub", "dune").await;
        let source = file.filename.clone();
        let book = fx.import("Dune", &["Frank Herbert"], "", file).await.unwrap();

        assert!(book.id > 0);
        assert_eq!(book.files.len(), 1);
        assert_eq!(book.files[0].filename, Path::new("Frank Herbert/Dune.epub"));
        assert_eq!(book.files[0].original_filename, source);
        assert_eq!(book.files[0].tags, ["retail"]);
        assert!(fx.library("Frank Herbert/Dune.epub").exists());
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_import_copy_keeps_source() {
        let fx = Fixture::new().await;
        let file = fx.incoming("dune.epub", "dune").await;
        let source = file.filename.clone();
        let book = Book::new("Dune", ["Frank Herbert"], "").with_file(file);
        fx.catalog.import_book(&book, &fx.template, Transfer::Copy).await.unwrap();
        assert!(source.exists());
        assert!(fx.library("Frank Herbert/Dune.epub").exists());
    }

    #[tokio::test]
    async fn test_import_rejects_duplicate_hash() {
        let fx = Fixture::new().await;
        let first = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "same").await).await.unwrap();
        let second = fx.incoming("b.epub", "same").await;
        let err = fx.import("Other", &["Someone"], "", second.clone()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::DuplicateHash { book_id: first.id });
        // Nothing moved, nothing stored.
        assert!(second.filename.exists());
        assert_eq!(fx.catalog.get_books_by_id(&[first.id + 1]).await.unwrap(), vec![]);
        // Same bytes under the same work are refused too.
        let third = fx.incoming("c.epub", "same").await;
        let err = fx.import("Dune", &["Frank Herbert"], "", third).await.unwrap_err();
        assert_eq!(*err, ErrorKind::DuplicateHash { book_id: first.id });
        let rows: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files WHERE hash = ?")
            .bind("same")
            .fetch_one(&fx.catalog.pool)
            .await
            .unwrap();
        assert_eq!(rows.0, 1);
    }

    #[tokio::test]
    async fn test_import_same_work_adds_file() {
        let fx = Fixture::new().await;
        let epub = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("dune.epub", "e").await).await.unwrap();
        let mobi = fx.import("DUNE", &["frank herbert"], "", fx.incoming("dune.mobi", "m").await).await.unwrap();

        assert_eq!(epub.id, mobi.id);
        assert_eq!(mobi.title, "Dune", "stored title is kept");
        let names: Vec<_> = mobi.files.iter().map(|f| f.filename.clone()).collect();
        assert_eq!(names, [PathBuf::from("Frank Herbert/Dune.epub"), PathBuf::from("Frank Herbert/Dune.mobi")]);
        assert_eq!(fx.catalog.search("mobi").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_matches_titles_beyond_ascii() {
        let fx = Fixture::new().await;
        let first = fx.import("Éclat", &["Émile Zola"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        let second = fx.import("éCLAT", &["émile zola"], "", fx.incoming("b.mobi", "b").await).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.files.len(), 2);
        let found = fx.catalog.get_book_id_by_title_and_authors("ÉCLAT", &["ÉMILE ZOLA"]).await.unwrap();
        assert_eq!(found, Some(first.id));
    }

    #[tokio::test]
    async fn test_import_series_propagation() {
        let fx = Fixture::new().await;
        let first = fx.import("Dune", &["Frank Herbert"], "Dune", fx.incoming("a.epub", "a").await).await.unwrap();
        // An empty series leaves the stored one alone.
        let second = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("b.mobi", "b").await).await.unwrap();
        assert_eq!(second.series, "Dune");
        // A non-empty one replaces it.
        let third = fx.import("Dune", &["Frank Herbert"], "Chronicles", fx.incoming("c.pdf", "c").await).await.unwrap();
        assert_eq!(third.id, first.id);
        assert_eq!(third.series, "Chronicles");
        assert_eq!(fx.catalog.search("series:chronicles").await.unwrap().len(), 1);
        assert!(fx.catalog.search("series:dune").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_numbers_colliding_names() {
        let fx = Fixture::new().await;
        fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        let book = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("b.epub", "b").await).await.unwrap();
        assert_eq!(book.files[1].filename, Path::new("Frank Herbert/Dune (1).epub"));
        assert!(fx.library("Frank Herbert/Dune (1).epub").exists());
    }

    #[tokio::test]
    async fn test_import_avoids_untracked_files() {
        let fx = Fixture::new().await;
        let squatter = fx.library("Frank Herbert/Dune.epub");
        tokio::fs::create_dir_all(squatter.parent().unwrap()).await.unwrap();
        tokio::fs::write(&squatter, "not ours").await.unwrap();
        let book = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        assert_eq!(book.files[0].filename, Path::new("Frank Herbert/Dune (1).epub"));
        assert_eq!(tokio::fs::read_to_string(&squatter).await.unwrap(), "not ours");
    }

    #[tokio::test]
    async fn test_import_validation() {
        let fx = Fixture::new().await;
        let err = fx.catalog.import_book(&Book::new("Dune", ["F"], ""), &fx.template, Transfer::Copy).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
        let err = fx.import("  ", &["F"], "", fx.incoming("a.epub", "a").await).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
    }

    #[tokio::test]
    async fn test_import_rolls_back_when_source_is_missing() {
        let fx = Fixture::new().await;
        let file = fx.incoming("gone.epub", "gone").await;
        tokio::fs::remove_file(&file.filename).await.unwrap();
        let err = fx.import("Dune", &["Frank Herbert"], "", file).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
        assert_eq!(fx.catalog.get_book_id_by_title_and_authors("Dune", &["Frank Herbert"]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_search_by_field() {
        let fx = Fixture::new().await;
        fx.import("Wizard's First Rule", &["Terry Goodkind"], "Sword of Truth", fx.incoming("w.epub", "w").await)
            .await
            .unwrap();
        fx.import("Dune", &["Frank Herbert"], "", fx.incoming("d.epub", "d").await).await.unwrap();

        let found = fx.catalog.search("author:goodkind").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Wizard's First Rule");
        assert_eq!(found[0].authors, ["Terry Goodkind"]);
        assert!(fx.catalog.search("author:tolkien").await.unwrap().is_empty());
        assert_eq!(fx.catalog.search("epub").await.unwrap().len(), 2);
        assert!(fx.catalog.search("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_paged() {
        let fx = Fixture::new().await;
        for n in 0..5 {
            let file = fx.incoming(&format!("{n}.epub"), &format!("content {n}")).await;
            fx.import(&format!("Book {n}"), &["Author"], "", file).await.unwrap();
        }
        let page = fx.catalog.search_paged("epub", 0, 2, 10).await.unwrap();
        assert_eq!(page.books.iter().map(|b| b.title.as_str()).collect::<Vec<_>>(), ["Book 0", "Book 1"]);
        assert_eq!(page.more, 3);

        let page = fx.catalog.search_paged("epub", 2, 2, 1).await.unwrap();
        assert_eq!(page.books.iter().map(|b| b.title.as_str()).collect::<Vec<_>>(), ["Book 2", "Book 3"]);
        assert_eq!(page.more, 1, "capped at the lookahead");

        let page = fx.catalog.search_paged("epub", 4, 2, 10).await.unwrap();
        assert_eq!(page.books.len(), 1);
        assert_eq!(page.more, 0);

        let page = fx.catalog.search_paged("epub", 1, 0, 10).await.unwrap();
        assert_eq!(page.books.len(), 4);
        assert_eq!(page.more, 0);
    }

    #[tokio::test]
    async fn test_get_by_id_omits_unknown() {
        let fx = Fixture::new().await;
        let b = fx.import("B", &["Y"], "", fx.incoming("b.epub", "b").await).await.unwrap();
        let a = fx.import("A", &["X", "W"], "", fx.incoming("a (x) (y).epub", "a").await).await.unwrap();

        let books = fx.catalog.get_books_by_id(&[a.id, 999, b.id]).await.unwrap();
        assert_eq!(books.iter().map(|b| b.id).collect::<Vec<_>>(), [b.id, a.id]);
        assert_eq!(books[1].authors, ["X", "W"], "author link order");
        assert!(fx.catalog.get_books_by_id(&[]).await.unwrap().is_empty());

        let files = fx.catalog.get_files_by_id(&[a.files[0].id, 999]).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].tags, ["x", "y"]);
        assert_eq!(files[0].book_id, a.id);
    }

    #[tokio::test]
    async fn test_point_lookups() {
        let fx = Fixture::new().await;
        let book = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("d.epub", "d").await).await.unwrap();
        let catalog = &fx.catalog;
        assert_eq!(catalog.get_book_id_by_title_and_authors("dune", &["FRANK HERBERT"]).await.unwrap(), Some(book.id));
        assert_eq!(catalog.get_book_id_by_title_and_authors("Dune", &["Someone Else"]).await.unwrap(), None);
        assert_eq!(catalog.get_book_id_by_filename("Frank Herbert/Dune.epub").await.unwrap(), Some(book.id));
        let absolute = fx.library("Frank Herbert/Dune.epub");
        assert_eq!(catalog.get_book_id_by_filename(absolute).await.unwrap(), Some(book.id));
        assert_eq!(catalog.get_book_id_by_filename("Nobody/Nothing.epub").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_renames_and_reindexes() {
        let fx = Fixture::new().await;
        let mut book = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("d.epub", "d").await).await.unwrap();
        book.title = "Dune Messiah".to_string();
        book.authors = vec!["Frank Herbert".to_string(), "Brian Herbert".to_string()];
        book.files[0].tags = vec!["signed".to_string()];
        fx.catalog.update_book(&book, &fx.template, false).await.unwrap();

        let stored = fx.catalog.get_books_by_id(&[book.id]).await.unwrap().remove(0);
        assert_eq!(stored.title, "Dune Messiah");
        assert_eq!(stored.authors, ["Frank Herbert", "Brian Herbert"]);
        assert_eq!(stored.files[0].tags, ["signed"]);
        assert_eq!(stored.files[0].filename, Path::new("Frank Herbert & Brian Herbert/Dune Messiah.epub"));
        assert!(fx.library("Frank Herbert & Brian Herbert/Dune Messiah.epub").exists());
        assert!(!fx.library("Frank Herbert/Dune.epub").exists());
        assert_eq!(fx.catalog.search("messiah").await.unwrap().len(), 1);
        assert_eq!(fx.catalog.search("signed").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_series_overwrite() {
        let fx = Fixture::new().await;
        let mut book = fx.import("Dune", &["Frank Herbert"], "Dune", fx.incoming("d.epub", "d").await).await.unwrap();
        book.series = "Chronicles".to_string();
        fx.catalog.update_book(&book, &fx.template, false).await.unwrap();
        assert_eq!(fx.catalog.get_books_by_id(&[book.id]).await.unwrap()[0].series, "Dune");
        fx.catalog.update_book(&book, &fx.template, true).await.unwrap();
        assert_eq!(fx.catalog.get_books_by_id(&[book.id]).await.unwrap()[0].series, "Chronicles");
        book.series = String::new();
        fx.catalog.update_book(&book, &fx.template, true).await.unwrap();
        assert_eq!(fx.catalog.get_books_by_id(&[book.id]).await.unwrap()[0].series, "");
        assert!(fx.catalog.search("series:chronicles").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_bumps_updated_on() {
        let fx = Fixture::new().await;
        let mut book = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("d.epub", "d").await).await.unwrap();
        sqlx::query("UPDATE books SET updated_on = 0").execute(&fx.catalog.pool).await.unwrap();
        // Tags alone leave the books row itself unchanged.
        book.files[0].tags = vec!["signed".to_string()];
        fx.catalog.update_book(&book, &fx.template, false).await.unwrap();
        assert!(fx.updated_on(book.id).await > 0);
    }

    #[tokio::test]
    async fn test_update_errors() {
        let fx = Fixture::new().await;
        let dune = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("d.epub", "d").await).await.unwrap();
        let mut other = fx.import("Emma", &["Jane Austen"], "", fx.incoming("e.epub", "e").await).await.unwrap();

        let missing = Book { id: 999, ..Book::new("X", ["Y"], "") };
        let err = fx.catalog.update_book(&missing, &fx.template, false).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound(999));

        other.title = "dune".to_string();
        other.authors = vec!["frank herbert".to_string()];
        let err = fx.catalog.update_book(&other, &fx.template, false).await.unwrap_err();
        assert_eq!(*err, ErrorKind::BookExists { book_id: dune.id });

        let mut reordered = dune.clone();
        reordered.files.clear();
        let err = fx.catalog.update_book(&reordered, &fx.template, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
    }

    #[tokio::test]
    async fn test_merge_books() {
        let fx = Fixture::new().await;
        let a = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        let b = fx.import("Dune (1965)", &["F. Herbert"], "", fx.incoming("b.mobi", "b").await).await.unwrap();
        let c = fx.import("Dune!", &["Herbert"], "", fx.incoming("c.epub", "c").await).await.unwrap();
        fx.catalog.merge_books(&[a.id, b.id, c.id], &fx.template).await.unwrap();

        let books = fx.catalog.get_books_by_id(&[a.id, b.id, c.id]).await.unwrap();
        assert_eq!(books.len(), 1);
        let names: Vec<_> = books[0].files.iter().map(|f| f.filename.clone()).collect();
        assert_eq!(
            names,
            [
                PathBuf::from("Frank Herbert/Dune.epub"),
                PathBuf::from("Frank Herbert/Dune.mobi"),
                PathBuf::from("Frank Herbert/Dune (1).epub"),
            ]
        );
        for name in &names {
            assert!(fx.catalog.root().join(name).exists(), "{}", name.display());
        }
        assert_eq!(fx.catalog.search("mobi").await.unwrap()[0].id, a.id);
        assert!(fx.catalog.search("author:herbert").await.unwrap().iter().all(|book| book.id == a.id));
        let file_ids: Vec<_> = books[0].files.iter().map(|f| f.id).collect();
        let files = fx.catalog.get_files_by_id(&file_ids).await.unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.book_id == a.id));
    }

    #[tokio::test]
    async fn test_merge_puts_files_back_when_a_move_fails() {
        let fx = Fixture::new().await;
        let a = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        let b = fx.import("Dune (1965)", &["F. Herbert"], "", fx.incoming("b.mobi", "b").await).await.unwrap();
        let c = fx.import("Dune!", &["Herbert"], "", fx.incoming("c.epub", "c").await).await.unwrap();
        let b_path = b.files[0].filename.clone();
        // b's file is relocated before c's is found missing.
        tokio::fs::remove_file(fx.catalog.root().join(&c.files[0].filename)).await.unwrap();

        let err = fx.catalog.merge_books(&[a.id, b.id, c.id], &fx.template).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
        assert!(fx.catalog.root().join(&b_path).exists(), "{} not restored", b_path.display());
        assert!(!fx.library("Frank Herbert/Dune.mobi").exists());

        let books = fx.catalog.get_books_by_id(&[a.id, b.id, c.id]).await.unwrap();
        assert_eq!(books.len(), 3);
        assert_eq!(books[1].files[0].filename, b_path);
        assert_eq!(books[2].files[0].filename, c.files[0].filename);
        assert_eq!(fx.catalog.search("mobi").await.unwrap()[0].id, b.id);
    }

    #[tokio::test]
    async fn test_merge_bumps_updated_on() {
        let fx = Fixture::new().await;
        let a = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        let b = fx.import("Dune", &["F. Herbert"], "", fx.incoming("b.epub", "b").await).await.unwrap();
        sqlx::query("UPDATE books SET updated_on = 0").execute(&fx.catalog.pool).await.unwrap();
        fx.catalog.merge_books(&[a.id, b.id], &fx.template).await.unwrap();
        assert!(fx.updated_on(a.id).await > 0);
    }

    #[tokio::test]
    async fn test_merge_validation() {
        let fx = Fixture::new().await;
        let a = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        for ids in [vec![], vec![a.id], vec![a.id, a.id]] {
            let err = fx.catalog.merge_books(&ids, &fx.template).await.unwrap_err();
            assert!(matches!(&*err, ErrorKind::Validation(_)), "{ids:?}");
        }
        let err = fx.catalog.merge_books(&[a.id, 404], &fx.template).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound(404));
        let err = fx.catalog.merge_books(&[404, a.id], &fx.template).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound(404));
    }

    #[tokio::test]
    async fn test_recalculate_is_idempotent() {
        let fx = Fixture::new().await;
        let book = fx.import("Dune", &["Frank Herbert"], "", fx.incoming("a.epub", "a").await).await.unwrap();
        fx.import("Dune", &["Frank Herbert"], "", fx.incoming("b.epub", "b").await).await.unwrap();

        let template: PathGenerator = "{{ title }}.{{ ext }}".parse().unwrap();
        let moved = fx.catalog.recalculate_filenames(book.id, &template, Transfer::Move).await.unwrap();
        assert_eq!(moved.len(), 2);
        assert_eq!(moved[0].to, fx.library("Dune.epub"));
        assert_eq!(moved[1].to, fx.library("Dune (1).epub"));

        let moved = fx.catalog.recalculate_filenames(book.id, &template, Transfer::Move).await.unwrap();
        assert!(moved.is_empty());
    }

    #[tokio::test]
    async fn test_recalculate_unknown_book() {
        let fx = Fixture::new().await;
        let err = fx.catalog.recalculate_filenames(7, &fx.template, Transfer::Move).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_imports_on_a_file_database() {
        const BOOKS: usize = 8;
        let fx = Fixture::new().await;
        let db = Database::connect(fx.dir.path().join("books.db"), Durability::Normal).await.unwrap();
        let catalog = Catalog::new(&db, fx.dir.path().join("library"));
        let template: Arc<PathGenerator> = Arc::new(TEMPLATE.parse().unwrap());

        let mut books = Vec::new();
        for n in 0..BOOKS {
            let file = fx.incoming(&format!("{n}.epub"), &format!("book {n}")).await;
            books.push(Book::new(format!("Book {n}"), ["Author"], "").with_file(file));
        }
        for name in ["twin-a.epub", "twin-b.epub"] {
            books.push(Book::new(format!("Twin {name}"), ["Author"], "").with_file(fx.incoming(name, "twin").await));
        }

        let mut tasks = JoinSet::new();
        for book in books {
            let (catalog, template) = (catalog.clone(), Arc::clone(&template));
            tasks.spawn(async move { catalog.import_book(&book, &template, Transfer::Copy).await });
        }
        let (mut imported, mut duplicates) = (0, 0);
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(_) => imported += 1,
                Err(err) if matches!(&*err, ErrorKind::DuplicateHash { .. }) => duplicates += 1,
                Err(err) => panic!("import failed: {err:?}"),
            }
        }
        assert_eq!(imported, BOOKS + 1);
        assert_eq!(duplicates, 1);

        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT hash, COUNT(*) FROM files GROUP BY hash")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(rows.len(), BOOKS + 1);
        assert!(rows.iter().all(|(_, count)| *count == 1));
        assert_eq!(catalog.search("epub").await.unwrap().len(), BOOKS + 1);
        db.close().await;
    }
}
