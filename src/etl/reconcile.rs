/// Reconcile Module
///
/// Backfills the block linkage of stored transactions. A transaction is usually seen
/// before its block is mined or indexed, so linkage is eventual: each pass asks the
/// block-data source about every unlinked transaction and patches the ones it knows.
///
/// A pass is safe to re-run any number of times. Linked transactions never appear in the
/// pending scan again, and each patch commits on its own, so an aborted pass keeps every
/// link made before it stopped.
use crate::db::Database;
use crate::error::{IngestError, Result};
use crate::models::{Block, Resolution, Transaction};
use crate::rpc::BlockResolver;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// Upper bound on one block lookup; a lookup that runs out is treated as unresolved
    pub lookup_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { lookup_timeout: Duration::from_secs(10) }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Linked to their block in this pass
    pub resolved: usize,
    /// Unknown to the source, timed out, or pointing at a block not stored yet
    pub still_pending: usize,
    /// The lookup itself failed; the transaction stays pending
    pub lookup_failed: usize,
    /// Removed from the store between the pending scan and the patch
    pub vanished: usize,
    /// Linked by another writer between the pending scan and the patch
    pub already_linked: usize,
}

impl ReconcileReport {
    pub fn scanned(&self) -> usize {
        self.resolved + self.still_pending + self.lookup_failed + self.vanished + self.already_linked
    }
}

enum Lookup {
    Resolved(Resolution),
    Unresolved,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOutcome {
    Linked,
    BlockMissing,
    Vanished,
    AlreadyLinked,
}

pub struct Reconciler<'a, R: BlockResolver + ?Sized> {
    database: &'a Database,
    resolver: &'a R,
    config: ReconcileConfig,
}

impl<'a, R: BlockResolver + ?Sized> Reconciler<'a, R> {
    pub fn new(database: &'a Database, resolver: &'a R, config: ReconcileConfig) -> Self {
        Self { database, resolver, config }
    }

    /// Try to link every transaction whose block is still unknown
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let pending = self.database.pending_transaction_hashes().await?;
        tracing::info!("Reconciling {} pending transactions", pending.len());

        let mut report = ReconcileReport::default();

        for hash in &pending {
            match self.lookup(hash).await {
                Lookup::Resolved(resolution) => match self.link(hash, resolution).await? {
                    LinkOutcome::Linked => report.resolved += 1,
                    LinkOutcome::BlockMissing => report.still_pending += 1,
                    LinkOutcome::Vanished => report.vanished += 1,
                    LinkOutcome::AlreadyLinked => report.already_linked += 1,
                },
                Lookup::Unresolved => report.still_pending += 1,
                Lookup::Failed => report.lookup_failed += 1,
            }
        }

        tracing::info!(
            "Reconciliation pass: {} resolved, {} still pending, {} lookups failed",
            report.resolved,
            report.still_pending,
            report.lookup_failed
        );
        Ok(report)
    }

    async fn lookup(&self, hash: &str) -> Lookup {
        match tokio::time::timeout(self.config.lookup_timeout, self.resolver.resolve(hash)).await {
            Ok(Ok(Some(resolution))) => Lookup::Resolved(resolution),
            Ok(Ok(None)) => {
                tracing::debug!("{} not in a block yet", hash);
                Lookup::Unresolved
            }
            Ok(Err(e)) => {
                tracing::warn!("Block lookup failed for {}: {:#}", hash, e);
                Lookup::Failed
            }
            Err(_) => {
                tracing::debug!("Block lookup for {} timed out after {:?}", hash, self.config.lookup_timeout);
                Lookup::Unresolved
            }
        }
    }

    /// Re-read the transaction and patch its linkage inside one session
    async fn link(&self, hash: &str, resolution: Resolution) -> Result<LinkOutcome> {
        let mut session = self.database.begin().await?;

        let Some(mut transaction) = session.find::<Transaction>(hash).await? else {
            tracing::warn!("Transaction {} disappeared before it could be linked", hash);
            return Ok(LinkOutcome::Vanished);
        };

        if session.find::<Block>(&resolution.height).await?.is_none() {
            tracing::debug!("Block {} for {} is not stored yet", resolution.height, hash);
            return Ok(LinkOutcome::BlockMissing);
        }

        if !transaction.link(resolution) {
            return Ok(LinkOutcome::AlreadyLinked);
        }

        match session.upsert(&transaction).await {
            Ok(()) => {}
            Err(IngestError::DuplicateKey(_)) => return Ok(LinkOutcome::AlreadyLinked),
            Err(err) => return Err(err),
        }
        session.commit().await?;

        tracing::debug!("Linked {} to block {} (gas used {})", hash, resolution.height, resolution.gas_used);
        Ok(LinkOutcome::Linked)
    }
}
