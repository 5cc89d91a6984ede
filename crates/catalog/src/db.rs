//! Database connection and pool management.

use exn::ResultExt;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Schema migrations, applied on every connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Readers are plentiful, writers are serialized by SQLite anyway.
const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// How hard SQLite works to make a committed transaction survive a crash.
///
/// | Variant  | `PRAGMA synchronous` | Survives                                |
/// |----------|----------------------|-----------------------------------------|
/// | `Fast`   | `OFF`                | application crashes                     |
/// | `Normal` | `NORMAL`             | application crashes, most power losses  |
/// | `Full`   | `FULL`               | application crashes and power losses    |
///
/// `Fast` makes bulk imports an order of magnitude quicker; the most recent
/// transactions may be lost if the OS crashes or the power goes out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    #[default]
    Fast,
    Normal,
    Full,
}
impl From<Durability> for SqliteSynchronous {
    fn from(durability: Durability) -> Self {
        match durability {
            Durability::Fast => SqliteSynchronous::Off,
            Durability::Normal => SqliteSynchronous::Normal,
            Durability::Full => SqliteSynchronous::Full,
        }
    }
}

/// The catalog's SQLite pool, migrated and ready for a
/// [`Catalog`](crate::Catalog) to be built on top of it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the catalog at `path` and brings its
    /// schema up to date.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), ?durability))]
    pub async fn connect(path: impl AsRef<Path>, durability: Durability) -> Result<Self> {
        let options = Self::options(durability).filename(path.as_ref()).create_if_missing(true);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// A throwaway catalog, gone once the pool closes. Not test-only so that
    /// dependent crates can build fixtures on it.
    pub async fn connect_in_memory() -> Result<Self> {
        // Every pooled connection to ":memory:" would otherwise get its own,
        // empty, database.
        Self::open(Self::options(Durability::default()).filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Applied to every connection the pool opens, not just the first.
            .after_connect(|conn, _| Box::pin(async move { Self::tune(conn).await }))
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
        Ok(Self { pool })
    }

    fn options(durability: Durability) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // Searches keep reading while an import writes.
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(durability.into())
            // Writers queue behind one another for the write lock, and a
            // filename pass holds it while it copies whole books.
            .busy_timeout(BUSY_TIMEOUT)
    }

    /// Per-connection settings with no [`SqliteConnectOptions`] equivalent.
    async fn tune(conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query("PRAGMA cache_size = -8192; PRAGMA temp_store = MEMORY;").execute(conn).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for every connection to come back to the pool, then closes them.
    /// The catalog must not be used afterwards.
    pub async fn close(&self) {
        // Refresh query planner statistics after a session of imports.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
