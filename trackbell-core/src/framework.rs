use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point for every query in [`crate::entities`].
///
/// Queries are plain structs; running one is `processor.process(Query { .. })`
/// through [`kanau::processor::Processor`].
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: SqlitePool,
}

impl DatabaseProcessor {
    /// Open (or create) a SQLite database.
    ///
    /// WAL mode lets readers proceed while a writer holds the lock, and the
    /// busy timeout makes concurrent writers queue instead of failing.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .min_connections(1)
            .connect_with(options)
            .await?;

        info!(max_connections, "Database connection established");
        Ok(Self { pool })
    }

    /// A private in-memory database.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to exactly one connection that never expires.
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Apply the schema in `migrations/`.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../migrations").run(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
