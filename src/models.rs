/// Data Models Module
///
/// This module defines the records flowing through the loader: raw records as delivered by
/// a source, and the normalized entities persisted in the store (transactions, blocks, and
/// the time-series snapshots collected alongside them).
use serde::{Deserialize, Serialize};
use std::fmt;

/// A timestamp as delivered by a source, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampLike {
    /// Unix seconds
    Epoch(i64),
    /// ISO-8601, locale-formatted, or a numeric string
    Text(String),
}

impl From<&str> for TimestampLike {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for TimestampLike {
    fn from(value: i64) -> Self {
        Self::Epoch(value)
    }
}

impl fmt::Display for TimestampLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch(secs) => write!(f, "{}", secs),
            Self::Text(text) => write!(f, "{:?}", text),
        }
    }
}

/// Transaction record as delivered by a source
///
/// Every field is optional so that one incomplete record is reported on its own
/// instead of failing the whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: Option<String>,
    #[serde(alias = "received")]
    pub timestamp: Option<TimestampLike>,
    pub gas_limit: Option<i64>,
    pub gas_price: Option<f64>,
    pub fees: Option<i64>,
    pub double_spend: Option<bool>,
}

/// A stored transaction
///
/// `gas_used` and `block_ref` are only ever filled by block-linkage reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub hash: String,
    pub received: i64,
    pub gas_limit: Option<i64>,
    pub gas_price: Option<f64>,
    pub fees: Option<i64>,
    pub double_spend: Option<bool>,
    pub gas_used: Option<i64>,
    pub block_ref: Option<i64>,
}

impl Transaction {
    /// Apply a block resolution to the unset linkage fields.
    ///
    /// Fields already present are never overwritten. Returns false when the transaction
    /// was already linked to a block, in which case nothing changes.
    pub fn link(&mut self, resolution: Resolution) -> bool {
        if self.block_ref.is_some() {
            return false;
        }

        self.block_ref = Some(resolution.height);
        self.gas_used.get_or_insert(resolution.gas_used);
        true
    }
}

/// Block location of a transaction, as reported by the block-data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub height: i64,
    pub gas_used: i64,
}

/// Block record as delivered by a source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBlock {
    pub height: Option<i64>,
    pub time: Option<TimestampLike>,
    pub hash: Option<String>,
    pub prev_block: Option<String>,
    pub size: Option<i64>,
    pub fees: Option<i64>,
    pub total: Option<i64>,
    pub n_tx: Option<i64>,
    pub reward: Option<i64>,
}

/// A stored block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Block {
    pub height: i64,
    pub hash: String,
    pub time: i64,
    pub prev_block: Option<String>,
    pub size: Option<i64>,
    pub fees: Option<i64>,
    pub total: Option<i64>,
    pub n_tx: Option<i64>,
    pub reward: Option<i64>,
}

/// Snapshot record as delivered by a source: a timestamp plus the kind-specific fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSnapshot<T> {
    #[serde(alias = "timestamp", alias = "ts")]
    pub time: Option<TimestampLike>,
    #[serde(flatten)]
    pub data: T,
}

/// A stored time-series row, unique on `time`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub time: i64,
    pub data: T,
}

/// Network-wide statistics (block time, difficulty, hashrate, prices)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NetworkStats {
    #[serde(alias = "blockTime")]
    pub block_time: f64,
    pub difficulty: i64,
    pub hashrate: i64,
    pub usd: Option<f64>,
    pub btc: Option<f64>,
}

/// Mining pool statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PoolStats {
    #[serde(alias = "hashRate")]
    pub hash_rate: f64,
    pub miners: i64,
    pub workers: i64,
    #[serde(alias = "blocksPerHour")]
    pub blocks_per_hour: f64,
}

/// Gas price oracle recommendation tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GasOracle {
    #[serde(alias = "safeLow")]
    pub safe_low: Option<f64>,
    pub standard: Option<f64>,
    pub fast: Option<f64>,
    pub fastest: Option<f64>,
}

/// Gas station price tiers with their expected confirmation waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EtherGasStation {
    pub average: Option<f64>,
    #[serde(alias = "avgWait")]
    pub avg_wait: Option<f64>,
    pub fast: Option<f64>,
    #[serde(alias = "fastWait")]
    pub fast_wait: Option<f64>,
    pub fastest: Option<f64>,
    #[serde(alias = "fastestWait")]
    pub fastest_wait: Option<f64>,
    #[serde(alias = "safeLow")]
    pub safe_low: Option<f64>,
    #[serde(alias = "safeLowWait")]
    pub safe_low_wait: Option<f64>,
    #[serde(alias = "blockNum")]
    pub block_num: Option<i64>,
    pub block_time: Option<f64>,
    pub speed: Option<f64>,
}

/// Number of pending transactions observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingTxCount {
    pub pending_txs_found: i64,
}

/// Memory pool state and suggested gas prices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MemoryPool {
    pub height: i64,
    pub unconfirmed_count: i64,
    pub high_gas_price: i64,
    pub medium_gas_price: i64,
    pub low_gas_price: i64,
    pub last_fork_height: i64,
    pub peer_count: i64,
}
