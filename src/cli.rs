/// CLI Module
///
/// Command-line interface configuration using clap.
use crate::{
    etl::reconcile::ReconcileConfig,
    pipeline::PipelineConfig,
    rpc::DEFAULT_BLOCK_API_URL,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, path::PathBuf, time::Duration};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://tx.db";

/// Chain Telemetry Loader - idempotent ETL for blockchain telemetry
///
/// Load transactions, blocks, and network snapshots into SQLite, and backfill
/// the block each transaction was mined in
#[derive(Parser, Debug)]
#[command(name = "chain-telemetry-loader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Database connection URL (overrides DATABASE_URL env var)
    #[arg(short = 'd', long, value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Maximum number of pooled database connections
    #[arg(long, value_name = "COUNT", default_value = "5", global = true)]
    pub max_connections: u32,

    /// Maximum number of attempts per pass on store failures
    #[arg(long, value_name = "COUNT", default_value = "3", global = true)]
    pub max_retries: usize,

    /// Retry delay in seconds
    #[arg(long, value_name = "SECONDS", default_value = "2", global = true)]
    pub retry_delay: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load raw transactions, skipping hashes already stored
    LoadTxs {
        /// JSON array or newline-delimited JSON file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Load raw blocks, skipping heights already stored
    LoadBlocks {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Load time-series snapshots, skipping timestamps already stored
    LoadSnapshots {
        /// Snapshot table to load into
        #[arg(short = 'k', long, value_enum)]
        kind: SnapshotKindArg,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Link pending transactions to their blocks
    Reconcile {
        /// Block data API base URL (overrides BLOCK_API_URL env var)
        #[arg(short = 'r', long, value_name = "URL")]
        resolver_url: Option<String>,

        /// Timeout for a single block lookup in seconds
        #[arg(long, value_name = "SECONDS", default_value = "10")]
        lookup_timeout: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotKindArg {
    NetworkStats,
    PoolStats,
    GasOracle,
    GasStation,
    PendingTxs,
    MemoryPool,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("Max retries must be greater than 0");
        }

        if let Command::Reconcile { lookup_timeout: 0, .. } = self.command {
            anyhow::bail!("Lookup timeout must be greater than 0");
        }

        Ok(())
    }

    /// Database URL from the flag, then DATABASE_URL, then the default file
    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .or_else(|| env::var("DATABASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
    }

    /// Block data API URL from the flag, then BLOCK_API_URL, then the public endpoint
    pub fn resolver_url(&self) -> String {
        let flag = match &self.command {
            Command::Reconcile { resolver_url, .. } => resolver_url.clone(),
            _ => None,
        };

        flag.or_else(|| env::var("BLOCK_API_URL").ok()).unwrap_or_else(|| DEFAULT_BLOCK_API_URL.to_string())
    }

    pub fn lookup_timeout(&self) -> Duration {
        match self.command {
            Command::Reconcile { lookup_timeout, .. } => Duration::from_secs(lookup_timeout),
            _ => ReconcileConfig::default().lookup_timeout,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
            reconcile: ReconcileConfig { lookup_timeout: self.lookup_timeout() },
        }
    }
}
