/// ETL Module
///
/// This module holds the stages of an ingestion pass:
/// - Extract: Read raw records from collector output files
/// - Transform: Normalize timestamps and validate record identities
/// - Load: Insert records that are not stored yet
/// - Reconcile: Backfill block linkage for stored transactions
pub mod extract;
pub mod load;
pub mod reconcile;
pub mod transform;
