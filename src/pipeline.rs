/// Pipeline Module
///
/// Orchestrates ingestion passes: Extract → Load for collector files, and block-linkage
/// reconciliation for stored transactions, with retry logic and statistics tracking.
///
/// Every write inside a pass is idempotent, so a pass that failed on a store error is
/// retried from the start.
use crate::db::{Database, SnapshotKind};
use crate::etl::{
    extract,
    load::{self, LoadReport},
    reconcile::{ReconcileConfig, ReconcileReport, Reconciler},
};
use crate::models::{Block, RawBlock, RawSnapshot, RawTransaction, Snapshot, Transaction};
use crate::rpc::BlockResolver;
use anyhow::Result;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

/// Pipeline execution statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub records_read: usize,
    pub records_rejected: usize,
    pub attempts: usize,
    /// Rows in the target table once the pass finished
    pub stored_rows: Option<i64>,
    pub load: Option<LoadReport>,
    pub reconcile: Option<ReconcileReport>,
    pub elapsed_time: Duration,
    pub errors: Vec<PipelineError>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records handled per second, loaded or reconciled
    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        let handled = self.load.as_ref().map(LoadReport::total).unwrap_or(0)
            + self.reconcile.as_ref().map(ReconcileReport::scanned).unwrap_or(0);

        if secs == 0.0 {
            0.0
        } else {
            handled as f64 / secs
        }
    }
}

/// Pipeline error with context
#[derive(Debug, Clone)]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub message: String,
    #[allow(dead_code)]
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineStage {
    Extract,
    Load,
    Reconcile,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Extract => write!(f, "Extract"),
            PipelineStage::Load => write!(f, "Load"),
            PipelineStage::Reconcile => write!(f, "Reconcile"),
        }
    }
}

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub reconcile: ReconcileConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_retries: 3, retry_delay: Duration::from_secs(2), reconcile: ReconcileConfig::default() }
    }
}

/// Main ingestion pipeline
pub struct Pipeline {
    database: Database,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline instance
    pub fn new(database: Database, config: PipelineConfig) -> Self {
        Self { database, config }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Load a file of raw transactions
    pub async fn load_transactions(&self, path: &Path) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let mut stats = PipelineStats::new();
        println!("\n🚀 Loading transactions from {}", path.display());

        let records = self.extract::<RawTransaction>(path, &mut stats).await?;
        let (database, records) = (&self.database, &records);
        let report =
            self.with_retries(PipelineStage::Load, &mut stats, || load::load_transactions(database, records)).await?;

        stats.load = Some(report);
        stats.stored_rows = self.database.count::<Transaction>().await.ok();
        Ok(self.finish(stats, start_time))
    }

    /// Load a file of raw blocks
    pub async fn load_blocks(&self, path: &Path) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let mut stats = PipelineStats::new();
        println!("\n🚀 Loading blocks from {}", path.display());

        let records = self.extract::<RawBlock>(path, &mut stats).await?;
        let (database, records) = (&self.database, &records);
        let report = self.with_retries(PipelineStage::Load, &mut stats, || load::load_blocks(database, records)).await?;

        stats.load = Some(report);
        stats.stored_rows = self.database.count::<Block>().await.ok();
        Ok(self.finish(stats, start_time))
    }

    /// Load a file of raw snapshots of one kind
    pub async fn load_snapshots<T>(&self, path: &Path) -> Result<PipelineStats>
    where
        T: SnapshotKind + Clone + DeserializeOwned,
    {
        let start_time = Instant::now();
        let mut stats = PipelineStats::new();
        println!("\n🚀 Loading {} snapshots from {}", T::TABLE, path.display());

        let records = self.extract::<RawSnapshot<T>>(path, &mut stats).await?;
        let (database, records) = (&self.database, &records);
        let report =
            self.with_retries(PipelineStage::Load, &mut stats, || load::load_snapshots(database, records)).await?;

        stats.load = Some(report);
        stats.stored_rows = self.database.count::<Snapshot<T>>().await.ok();
        Ok(self.finish(stats, start_time))
    }

    /// Run one block-linkage reconciliation pass
    pub async fn reconcile<R: BlockResolver + ?Sized>(&self, resolver: &R) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let mut stats = PipelineStats::new();
        println!("\n🔗 Reconciling block linkage (lookup timeout {:?})", self.config.reconcile.lookup_timeout);

        let reconciler = Reconciler::new(&self.database, resolver, self.config.reconcile);
        let report =
            self.with_retries(PipelineStage::Reconcile, &mut stats, || reconciler.reconcile_pending()).await?;

        stats.reconcile = Some(report);
        stats.stored_rows = self.database.count::<Transaction>().await.ok();
        Ok(self.finish(stats, start_time))
    }

    async fn extract<T: DeserializeOwned>(&self, path: &Path, stats: &mut PipelineStats) -> Result<Vec<T>> {
        match extract::extract_records::<T>(path).await {
            Ok(extracted) => {
                stats.records_read = extracted.records.len() + extracted.rejected;
                stats.records_rejected = extracted.rejected;
                println!(
                    "   📥 Read {} records ({} rejected)",
                    format_number(stats.records_read as u64),
                    extracted.rejected
                );
                Ok(extracted.records)
            }
            Err(e) => {
                tracing::error!("Extract failed for {}: {:#}", path.display(), e);
                stats.errors.push(PipelineError {
                    stage: PipelineStage::Extract,
                    message: format!("{:#}", e),
                    retryable: false,
                });
                Err(e)
            }
        }
    }

    /// Run a stage, re-running it from the start while it fails with a retryable error
    async fn with_retries<T, F, Fut>(
        &self,
        stage: PipelineStage,
        stats: &mut PipelineStats,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let mut retry_count = 0;

        loop {
            stats.attempts += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    retry_count += 1;
                    let retryable = e.is_retryable();

                    if !retryable || retry_count >= self.config.max_retries {
                        stats.errors.push(PipelineError { stage, message: e.to_string(), retryable });
                        return Err(anyhow::Error::new(e)
                            .context(format!("{} stage failed after {} attempts", stage, retry_count)));
                    }

                    tracing::warn!(
                        "{} failed, retrying ({}/{}): {}",
                        stage,
                        retry_count,
                        self.config.max_retries,
                        e
                    );

                    tokio::time::sleep(self.config.retry_delay * retry_count as u32).await;
                }
            }
        }
    }

    fn finish(&self, mut stats: PipelineStats, start_time: Instant) -> PipelineStats {
        stats.elapsed_time = start_time.elapsed();
        println!("\n✅ Pass complete!");
        self.print_final_stats(&stats);
        stats
    }

    /// Print final statistics
    fn print_final_stats(&self, stats: &PipelineStats) {
        println!("\n📊 Pipeline Statistics:");
        println!("   ⏱️  Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
        if stats.records_read > 0 {
            println!("   📥 Records read: {}", format_number(stats.records_read as u64));
        }
        if let Some(load) = &stats.load {
            println!(
                "   💾 Inserted: {} | ⏭️  Duplicates skipped: {} | ❌ Failed: {}",
                format_number(load.inserted as u64),
                format_number(load.skipped as u64),
                format_number(load.failed as u64)
            );
            for failure in load.failures.iter().take(5) {
                println!("      #{} {}: {}", failure.index, failure.key.as_deref().unwrap_or("-"), failure.reason);
            }
            if load.failures.len() > 5 {
                println!("      ... and {} more failures", load.failures.len() - 5);
            }
        }
        if let Some(reconcile) = &stats.reconcile {
            println!(
                "   🔗 Resolved: {} | ⏳ Still pending: {} | ❌ Lookups failed: {}",
                format_number(reconcile.resolved as u64),
                format_number(reconcile.still_pending as u64),
                format_number(reconcile.lookup_failed as u64)
            );
            if reconcile.vanished + reconcile.already_linked > 0 {
                println!("   👻 Vanished: {} | Linked elsewhere: {}", reconcile.vanished, reconcile.already_linked);
            }
        }
        if let Some(rows) = stats.stored_rows {
            println!("   🗄️  Rows stored: {}", format_number(rows.max(0) as u64));
        }
        println!("   🔄 Attempts: {}", stats.attempts);
        println!("   ⚡ Throughput: {:.0} records/sec", stats.records_per_second());

        if !stats.errors.is_empty() {
            println!("\n❌ Errors encountered: {}", stats.errors.len());
            for (i, error) in stats.errors.iter().take(5).enumerate() {
                println!("   {}. [{}] {}", i + 1, error.stage, error.message);
            }
        }
    }
}

/// Format a number with thousand separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_database;
    use crate::error::IngestError;
    use crate::models::{PoolStats, Resolution, Transaction};
    use async_trait::async_trait;
    use std::io::Write;

    struct FixedResolver;

    #[async_trait]
    impl BlockResolver for FixedResolver {
        async fn resolve(&self, _hash: &str) -> anyhow::Result<Option<Resolution>> {
            Ok(Some(Resolution { height: 42, gas_used: 51000 }))
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig { max_retries: 3, retry_delay: Duration::from_millis(1), reconcile: ReconcileConfig::default() }
    }

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[tokio::test]
    async fn test_load_then_reconcile() {
        let pipeline = Pipeline::new(test_database().await, fast_config());
        let blocks = write_file(r#"[{"height": 42, "time": "2020-01-02T03:00:00Z", "hash": "0000aa"}]"#);
        let txs = write_file(
            "{\"hash\": \"0xdef\", \"received\": \"2020-01-02T03:04:05.5Z\", \"gas_limit\": 21000}\n\
             {\"hash\": \"0xdef\", \"received\": \"2020-01-02T03:04:09Z\"}\n\
             [1, 2, 3]\n",
        );

        let stats = pipeline.load_blocks(blocks.path()).await.unwrap();
        assert_eq!(stats.load.unwrap().inserted, 1);
        assert_eq!(stats.stored_rows, Some(1));

        let stats = pipeline.load_transactions(txs.path()).await.unwrap();
        assert_eq!((stats.records_read, stats.records_rejected), (3, 1));
        let load = stats.load.unwrap();
        assert_eq!((load.inserted, load.skipped), (1, 1));

        let stats = pipeline.reconcile(&FixedResolver).await.unwrap();
        assert_eq!(stats.reconcile.unwrap().resolved, 1);
        assert_eq!(stats.attempts, 1);

        let stored = pipeline.database().find::<Transaction>("0xdef").await.unwrap().unwrap();
        assert_eq!((stored.received, stored.block_ref, stored.gas_used), (1577934245, Some(42), Some(51000)));
    }

    #[tokio::test]
    async fn test_load_snapshot_file() {
        let pipeline = Pipeline::new(test_database().await, fast_config());
        let file = write_file(r#"[{"time": 1577934245, "hashRate": 12.5, "miners": 3, "workers": 9, "blocksPerHour": 2}]"#);

        let stats = pipeline.load_snapshots::<PoolStats>(file.path()).await.unwrap();
        assert_eq!(stats.load.unwrap().inserted, 1);
    }

    #[tokio::test]
    async fn test_retries_store_failures_then_gives_up() {
        let pipeline = Pipeline::new(test_database().await, fast_config());
        let mut stats = PipelineStats::new();
        let mut calls = 0;

        let result: Result<()> = pipeline
            .with_retries(PipelineStage::Load, &mut stats, || {
                calls += 1;
                async { Err(IngestError::StoreUnavailable(sqlx::Error::PoolTimedOut)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].retryable);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_not_retried() {
        let pipeline = Pipeline::new(test_database().await, fast_config());
        let mut stats = PipelineStats::new();

        let result: Result<()> = pipeline
            .with_retries(PipelineStage::Load, &mut stats, || async { Err(IngestError::malformed("bad")) })
            .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 1);
        assert!(!stats.errors[0].retryable);
    }

    #[tokio::test]
    async fn test_missing_file_fails_extract() {
        let pipeline = Pipeline::new(test_database().await, fast_config());
        assert!(pipeline.load_transactions(Path::new("/nonexistent/txs.json")).await.is_err());
    }
}
