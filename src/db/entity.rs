/// Entity Persistence Module
///
/// Maps each stored record type onto its table: lookup by unique key, plain insert,
/// and insert-or-update keyed by the record's identity.
use crate::models::{
    Block, EtherGasStation, GasOracle, MemoryPool, NetworkStats, PendingTxCount, PoolStats, Snapshot, Transaction,
};
use async_trait::async_trait;
use sqlx::{
    query::Query,
    sqlite::{SqliteArguments, SqliteRow},
    FromRow, Row, Sqlite, SqliteConnection,
};
use std::fmt::Display;

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// A record with a unique identity in the store
#[async_trait]
pub trait Entity: Sized + Send + Sync {
    /// Unique identity used for lookups and conflict resolution
    type Key: ?Sized + ToOwned + Display + Sync;

    const TABLE: &'static str;

    async fn find(conn: &mut SqliteConnection, key: &Self::Key) -> Result<Option<Self>, sqlx::Error>;

    /// Plain insert; a stored row with the same identity is a unique-constraint violation
    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error>;

    /// Insert, or reconcile with the stored row that has the same identity
    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error>;
}

const TRANSACTION_INSERT: &str = r#"
    INSERT INTO transactions (hash, received, gas_limit, gas_price, fees, double_spend, gas_used, block_ref)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

impl Transaction {
    fn bind_all<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(&self.hash)
            .bind(self.received)
            .bind(self.gas_limit)
            .bind(self.gas_price)
            .bind(self.fees)
            .bind(self.double_spend)
            .bind(self.gas_used)
            .bind(self.block_ref)
    }
}

#[async_trait]
impl Entity for Transaction {
    type Key = str;

    const TABLE: &'static str = "transactions";

    async fn find(conn: &mut SqliteConnection, key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(
            r#"
            SELECT hash, received, gas_limit, gas_price, fees, double_spend, gas_used, block_ref
            FROM transactions
            WHERE hash = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        self.bind_all(sqlx::query(TRANSACTION_INSERT)).execute(&mut *conn).await?;
        Ok(())
    }

    /// Only the block linkage of a stored transaction can change, and only from NULL
    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        let sql = format!(
            "{} ON CONFLICT (hash) DO UPDATE SET
                gas_used = COALESCE(transactions.gas_used, excluded.gas_used),
                block_ref = COALESCE(transactions.block_ref, excluded.block_ref)",
            TRANSACTION_INSERT.trim_end()
        );

        self.bind_all(sqlx::query(&sql)).execute(&mut *conn).await?;
        Ok(())
    }
}

const BLOCK_INSERT: &str = r#"
    INSERT INTO blocks (height, hash, time, prev_block, size, fees, total, n_tx, reward)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

impl Block {
    fn bind_all<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.height)
            .bind(&self.hash)
            .bind(self.time)
            .bind(&self.prev_block)
            .bind(self.size)
            .bind(self.fees)
            .bind(self.total)
            .bind(self.n_tx)
            .bind(self.reward)
    }
}

#[async_trait]
impl Entity for Block {
    type Key = i64;

    const TABLE: &'static str = "blocks";

    async fn find(conn: &mut SqliteConnection, key: &i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Block>(
            "SELECT height, hash, time, prev_block, size, fees, total, n_tx, reward FROM blocks WHERE height = ?",
        )
        .bind(*key)
        .fetch_optional(&mut *conn)
        .await
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        self.bind_all(sqlx::query(BLOCK_INSERT)).execute(&mut *conn).await?;
        Ok(())
    }

    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        let sql = format!(
            "{} ON CONFLICT (height) DO UPDATE SET
                hash = excluded.hash,
                time = excluded.time,
                prev_block = excluded.prev_block,
                size = excluded.size,
                fees = excluded.fees,
                total = excluded.total,
                n_tx = excluded.n_tx,
                reward = excluded.reward",
            BLOCK_INSERT.trim_end()
        );

        self.bind_all(sqlx::query(&sql)).execute(&mut *conn).await?;
        Ok(())
    }
}

/// Column layout of a time-series snapshot table
///
/// Every snapshot table has a unique `time` column; `COLUMNS` lists the remaining
/// columns in the order `bind_columns` binds them.
pub trait SnapshotKind: for<'r> FromRow<'r, SqliteRow> + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
}

impl<T: SnapshotKind> Snapshot<T> {
    fn insert_sql(on_conflict: &str) -> String {
        let placeholders = vec!["?"; T::COLUMNS.len() + 1].join(", ");
        format!("INSERT INTO {} (time, {}) VALUES ({}){}", T::TABLE, T::COLUMNS.join(", "), placeholders, on_conflict)
    }

    async fn write(&self, conn: &mut SqliteConnection, on_conflict: &str) -> Result<(), sqlx::Error> {
        let sql = Self::insert_sql(on_conflict);
        self.data.bind_columns(sqlx::query(&sql).bind(self.time)).execute(&mut *conn).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: SnapshotKind> Entity for Snapshot<T> {
    type Key = i64;

    const TABLE: &'static str = T::TABLE;

    async fn find(conn: &mut SqliteConnection, key: &i64) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT time, {} FROM {} WHERE time = ?", T::COLUMNS.join(", "), T::TABLE);
        let row = sqlx::query(&sql).bind(*key).fetch_optional(&mut *conn).await?;

        match row {
            Some(row) => Ok(Some(Snapshot { time: row.try_get("time")?, data: T::from_row(&row)? })),
            None => Ok(None),
        }
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        self.write(conn, "").await
    }

    /// Snapshots are immutable once written: the stored row wins
    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        self.write(conn, " ON CONFLICT (time) DO NOTHING").await
    }
}

impl SnapshotKind for NetworkStats {
    const TABLE: &'static str = "network_stats";
    const COLUMNS: &'static [&'static str] = &["block_time", "difficulty", "hashrate", "usd", "btc"];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(self.block_time).bind(self.difficulty).bind(self.hashrate).bind(self.usd).bind(self.btc)
    }
}

impl SnapshotKind for PoolStats {
    const TABLE: &'static str = "pool_stats";
    const COLUMNS: &'static [&'static str] = &["hash_rate", "miners", "workers", "blocks_per_hour"];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(self.hash_rate).bind(self.miners).bind(self.workers).bind(self.blocks_per_hour)
    }
}

impl SnapshotKind for GasOracle {
    const TABLE: &'static str = "gas_oracle";
    const COLUMNS: &'static [&'static str] = &["safe_low", "standard", "fast", "fastest"];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(self.safe_low).bind(self.standard).bind(self.fast).bind(self.fastest)
    }
}

impl SnapshotKind for EtherGasStation {
    const TABLE: &'static str = "ether_gas_station";
    const COLUMNS: &'static [&'static str] = &[
        "average",
        "avg_wait",
        "fast",
        "fast_wait",
        "fastest",
        "fastest_wait",
        "safe_low",
        "safe_low_wait",
        "block_num",
        "block_time",
        "speed",
    ];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.average)
            .bind(self.avg_wait)
            .bind(self.fast)
            .bind(self.fast_wait)
            .bind(self.fastest)
            .bind(self.fastest_wait)
            .bind(self.safe_low)
            .bind(self.safe_low_wait)
            .bind(self.block_num)
            .bind(self.block_time)
            .bind(self.speed)
    }
}

impl SnapshotKind for PendingTxCount {
    const TABLE: &'static str = "pending_tx_counts";
    const COLUMNS: &'static [&'static str] = &["pending_txs_found"];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(self.pending_txs_found)
    }
}

impl SnapshotKind for MemoryPool {
    const TABLE: &'static str = "memory_pool";
    const COLUMNS: &'static [&'static str] = &[
        "height",
        "unconfirmed_count",
        "high_gas_price",
        "medium_gas_price",
        "low_gas_price",
        "last_fork_height",
        "peer_count",
    ];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.height)
            .bind(self.unconfirmed_count)
            .bind(self.high_gas_price)
            .bind(self.medium_gas_price)
            .bind(self.low_gas_price)
            .bind(self.last_fork_height)
            .bind(self.peer_count)
    }
}
