/// Chain Telemetry Loader
///
/// An ETL pipeline that loads blockchain telemetry into SQLite exactly once per record
/// and backfills the block linkage of transactions as blocks become known.
mod cli;
mod db;
mod error;
mod etl;
mod models;
mod pipeline;
mod rpc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, SnapshotKindArg};
use db::Database;
use models::{EtherGasStation, GasOracle, MemoryPool, NetworkStats, PendingTxCount, PoolStats};
use pipeline::Pipeline;
use rpc::BlockCypherClient;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt().with_env_filter(log_filter(std::env::var("RUST_LOG").ok())).init();

    let cli = Cli::parse();
    cli.validate()?;

    println!("🚀 Starting Chain Telemetry Loader...");

    let database_url = cli.database_url();
    println!("\n💾 Opening database {}...", database_url);
    let database =
        Database::new(&database_url, cli.max_connections).await.context("Failed to open the telemetry database")?;

    database.test_connection().await.context("Database connection test failed")?;

    println!("📋 Running database migrations...");
    database.migrate().await.context("Failed to run database migrations")?;
    println!("✅ Database ready!");

    let pipeline = Pipeline::new(database, cli.pipeline_config());

    // Every record commits on its own, so stopping between records loses nothing
    let outcome = tokio::select! {
        result = run(&pipeline, &cli) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; records committed so far are kept");
            Ok(())
        }
    };

    pipeline.database().close().await;
    outcome
}

async fn run(pipeline: &Pipeline, cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::LoadTxs { file } => {
            pipeline.load_transactions(file).await.context("Transaction load failed")?;
        }
        Command::LoadBlocks { file } => {
            pipeline.load_blocks(file).await.context("Block load failed")?;
        }
        Command::LoadSnapshots { kind, file } => {
            let stats = match kind {
                SnapshotKindArg::NetworkStats => pipeline.load_snapshots::<NetworkStats>(file).await,
                SnapshotKindArg::PoolStats => pipeline.load_snapshots::<PoolStats>(file).await,
                SnapshotKindArg::GasOracle => pipeline.load_snapshots::<GasOracle>(file).await,
                SnapshotKindArg::GasStation => pipeline.load_snapshots::<EtherGasStation>(file).await,
                SnapshotKindArg::PendingTxs => pipeline.load_snapshots::<PendingTxCount>(file).await,
                SnapshotKindArg::MemoryPool => pipeline.load_snapshots::<MemoryPool>(file).await,
            };
            stats.context("Snapshot load failed")?;
        }
        Command::Reconcile { .. } => {
            let resolver = BlockCypherClient::new(cli.resolver_url(), cli.lookup_timeout())
                .context("Failed to create block data client")?;
            println!("🔌 Block data source: {}", resolver.endpoint());

            pipeline.reconcile(&resolver).await.context("Reconciliation pass failed")?;
        }
    }

    println!("\n✨ Done!");
    Ok(())
}

/// Log filter from RUST_LOG directives, falling back to the default level
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL))
}
