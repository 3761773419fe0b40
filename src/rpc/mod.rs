/// RPC Client Module
///
/// This module handles lookups against the external block-data service. It resolves a
/// transaction hash to the height of the block that contains it and the gas it used.
use crate::models::Resolution;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BLOCK_API_URL: &str = "https://api.blockcypher.com/v1/eth/main";

/// Source of block linkage for transactions
///
/// `Ok(None)` means the transaction is not in a block yet (or unknown to the source);
/// callers keep it pending and ask again on a later pass.
#[async_trait]
pub trait BlockResolver: Send + Sync {
    async fn resolve(&self, hash: &str) -> Result<Option<Resolution>>;
}

/// BlockCypher-compatible REST client (`GET {base}/txs/{hash}`)
pub struct BlockCypherClient {
    client: reqwest::Client,
    base_url: String,
}

impl BlockCypherClient {
    /// Create a client for `base_url`; every request is bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build().context("Failed to build HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    /// Get the endpoint URL this client queries
    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn transaction_url(&self, hash: &str) -> String {
        format!("{}/txs/{}", self.base_url, hash)
    }
}

/// The subset of the transaction document needed for linkage
#[derive(Debug, Deserialize)]
struct TransactionDocument {
    /// -1 while the transaction is unconfirmed
    block_height: Option<i64>,
    gas_used: Option<i64>,
}

impl TransactionDocument {
    fn into_resolution(self) -> Option<Resolution> {
        match (self.block_height, self.gas_used) {
            (Some(height), Some(gas_used)) if height >= 0 => Some(Resolution { height, gas_used }),
            _ => None,
        }
    }
}

#[async_trait]
impl BlockResolver for BlockCypherClient {
    async fn resolve(&self, hash: &str) -> Result<Option<Resolution>> {
        let url = self.transaction_url(hash);
        tracing::debug!("Resolving block for {}", hash);

        let response = self.client.get(&url).send().await.with_context(|| format!("Request to {} failed", url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let document: TransactionDocument = response
            .error_for_status()
            .with_context(|| format!("Block lookup for {} rejected", hash))?
            .json()
            .await
            .with_context(|| format!("Invalid block lookup response for {}", hash))?;

        Ok(document.into_resolution())
    }
}
