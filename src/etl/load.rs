/// Load Module
///
/// Handles storing normalized records into the database.
///
/// Every record is loaded in its own write session with insert-if-absent semantics:
/// a record whose identity is already stored is skipped, never merged, so replaying a
/// batch any number of times leaves the store unchanged after the first load.
use crate::db::{Database, Entity, SnapshotKind};
use crate::error::{IngestError, Result};
use crate::etl::transform::validate_hash;
use crate::models::{Block, RawBlock, RawSnapshot, RawTransaction, Snapshot, Transaction};
use std::borrow::Borrow;

/// Outcome of loading one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Rejected records in input order
    pub failures: Vec<RecordFailure>,
}

/// A record that could not be loaded
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    /// Position of the record in the batch
    pub index: usize,
    pub key: Option<String>,
    pub reason: String,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.inserted + self.skipped + self.failed
    }

    fn record_failure(&mut self, index: usize, key: Option<String>, err: IngestError) {
        tracing::warn!("Rejected record {} ({}): {}", index, key.as_deref().unwrap_or("no key"), err);
        self.failed += 1;
        self.failures.push(RecordFailure { index, key, reason: err.to_string() });
    }
}

/// A source record that maps onto one stored entity
trait RawRecord: Sync {
    type Entity: Entity;

    /// Identity of the entity this record would create
    fn key(&self) -> Result<<<Self::Entity as Entity>::Key as ToOwned>::Owned>;

    fn build(&self) -> Result<Self::Entity>;
}

impl RawRecord for RawTransaction {
    type Entity = Transaction;

    fn key(&self) -> Result<String> {
        validate_hash("transaction hash", self.hash.as_deref())
    }

    fn build(&self) -> Result<Transaction> {
        self.normalize()
    }
}

impl RawRecord for RawBlock {
    type Entity = Block;

    fn key(&self) -> Result<i64> {
        self.height.ok_or_else(|| IngestError::malformed("missing block height"))
    }

    fn build(&self) -> Result<Block> {
        self.normalize()
    }
}

impl<T: SnapshotKind + Clone> RawRecord for RawSnapshot<T> {
    type Entity = Snapshot<T>;

    fn key(&self) -> Result<i64> {
        self.normalize().map(|snapshot| snapshot.time)
    }

    fn build(&self) -> Result<Snapshot<T>> {
        self.normalize()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    Inserted,
    Skipped,
}

/// Insert raw transactions that are not stored yet, keyed by hash
///
/// Malformed records are reported and skipped; the rest of the batch still loads.
/// A store failure aborts the batch, leaving every record before it committed.
pub async fn load_transactions(database: &Database, records: &[RawTransaction]) -> Result<LoadReport> {
    load_records(database, records, "transactions").await
}

/// Insert raw blocks that are not stored yet, keyed by height
pub async fn load_blocks(database: &Database, records: &[RawBlock]) -> Result<LoadReport> {
    load_records(database, records, "blocks").await
}

/// Insert raw snapshots whose timestamp is not stored yet
pub async fn load_snapshots<T: SnapshotKind + Clone>(
    database: &Database,
    records: &[RawSnapshot<T>],
) -> Result<LoadReport> {
    load_records(database, records, T::TABLE).await
}

async fn load_records<R: RawRecord>(database: &Database, records: &[R], label: &str) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for (index, record) in records.iter().enumerate() {
        let key = match record.key() {
            Ok(key) => key,
            Err(err) => {
                report.record_failure(index, None, err);
                continue;
            }
        };
        let key: &<R::Entity as Entity>::Key = key.borrow();

        match load_one(database, key, record).await {
            Ok(LoadOutcome::Inserted) => report.inserted += 1,
            Ok(LoadOutcome::Skipped) => report.skipped += 1,
            Err(err) if err.is_retryable() => {
                tracing::error!("Aborting {} batch at record {}: {}", label, index, err);
                return Err(err);
            }
            Err(err) => report.record_failure(index, Some(key.to_string()), err),
        }
    }

    tracing::info!(
        "Loaded {} batch: {} inserted, {} skipped, {} failed",
        label,
        report.inserted,
        report.skipped,
        report.failed
    );
    Ok(report)
}

async fn load_one<R: RawRecord>(
    database: &Database,
    key: &<R::Entity as Entity>::Key,
    record: &R,
) -> Result<LoadOutcome> {
    let mut session = database.begin().await?;

    if session.find::<R::Entity>(key).await?.is_some() {
        tracing::debug!("Skipping {}: already stored", key);
        session.rollback().await?;
        return Ok(LoadOutcome::Skipped);
    }

    let entity = record.build()?;

    match session.insert(&entity).await {
        Ok(()) => {}
        Err(IngestError::DuplicateKey(reason)) => {
            // Another writer stored the same identity first
            tracing::debug!("Skipping {}: {}", key, reason);
            return Ok(LoadOutcome::Skipped);
        }
        Err(err) => return Err(err),
    }

    session.commit().await?;
    tracing::debug!("Inserted {}", key);
    Ok(LoadOutcome::Inserted)
}
