/// Database Module
///
/// This module handles all SQLite operations including:
/// - Connection pool management
/// - Schema migrations
/// - Scoped write sessions with lookup-by-key and upsert
pub mod entity;

pub use entity::{Entity, SnapshotKind};

use crate::error::{IngestError, Result};
use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Sqlite,
};
use std::str::FromStr;
use std::time::Duration;

/// How long a session waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a connection pool to the store at `database_url`
    ///
    /// Accepts `sqlite://path`, `sqlite:path`, a bare path, or `sqlite::memory:`.
    /// The database file is created when missing. An in-memory store lives in a single
    /// connection that is never recycled, so its contents last as long as the pool.
    pub async fn new(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool_options = if is_in_memory(database_url) {
            SqlitePoolOptions::new().max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await.context("Failed to open SQLite database")?;

        tracing::debug!("Opened database at {}", database_url);
        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.context("Failed to run database migrations")?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.context("Database connection test failed")?;

        Ok(())
    }

    /// Start a write session; nothing it writes is visible until `Session::commit`
    ///
    /// The session takes the write lock up front, so a concurrent writer waits for it
    /// (up to the busy timeout) instead of failing when it upgrades from a read.
    pub async fn begin(&self) -> Result<Session> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Session { tx })
    }

    /// Look up an entity by its unique key outside of any write session
    #[allow(dead_code)]
    pub async fn find<E: Entity>(&self, key: &E::Key) -> Result<Option<E>> {
        let mut conn = self.pool.acquire().await?;
        Ok(E::find(&mut *conn, key).await?)
    }

    /// Hashes of transactions that are not yet linked to a block
    pub async fn pending_transaction_hashes(&self) -> Result<Vec<String>> {
        let hashes = sqlx::query_scalar::<_, String>("SELECT hash FROM transactions WHERE block_ref IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(hashes)
    }

    /// Number of rows stored for an entity
    pub async fn count<E: Entity>(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", E::TABLE))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A scoped write transaction
///
/// Dropping a session without calling `commit` rolls it back and returns the
/// connection to the pool.
pub struct Session {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl Session {
    /// Look up an entity by its unique key
    pub async fn find<E: Entity>(&mut self, key: &E::Key) -> Result<Option<E>> {
        Ok(E::find(&mut *self.tx, key).await?)
    }

    /// Insert a new entity; fails with `DuplicateKey` if its identity is already stored
    pub async fn insert<E: Entity>(&mut self, entity: &E) -> Result<()> {
        entity.insert(&mut *self.tx).await.map_err(IngestError::from_write)
    }

    /// Insert an entity or update the stored row with the same identity
    pub async fn upsert<E: Entity>(&mut self, entity: &E) -> Result<()> {
        entity.upsert(&mut *self.tx).await.map_err(IngestError::from_write)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Fresh in-memory database with the schema applied
#[cfg(test)]
pub async fn test_database() -> Database {
    let database = Database::new("sqlite::memory:", 1).await.unwrap();
    database.migrate().await.unwrap();
    database
}
