//! Lease store: persistence for domains and records.
//!
//! This module provides the `LeaseStore` trait and two implementations:
//! - `SqliteLeaseStore` - SQLite via sqlx, the production backend
//! - `MemoryLeaseStore` - in-process storage for tests and throwaway deployments
//!
//! Every operation that touches more than one row for one logical change
//! (renew, purge) is atomic: callers never observe a partial application.

mod memory;
mod sqlite;

pub use memory::MemoryLeaseStore;
pub use sqlite::SqliteLeaseStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::model::{Domain, FqdnTypePair, Record, RecordType};

/// Maximum slug draws before domain creation gives up.
pub const MAX_SLUG_ATTEMPTS: usize = 100;

/// Source of candidate slugs.
pub type SlugSource = dyn Fn() -> String + Send + Sync;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Every slug draw collided with an existing domain.
    #[error("couldn't generate a unique slug after {0} attempts")]
    SlugExhausted(usize),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Counts from one stale-lease purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    /// Domains soft-deleted.
    pub domains: u64,
    /// Records hard-deleted.
    pub records: u64,
}

/// Storage backend for leases.
///
/// The trait is object-safe and is shared as `Arc<dyn LeaseStore>` between
/// request handlers and the purger.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Create a domain under `root_domain` with a fresh slug drawn from `slugs`.
    ///
    /// Slugs are checked against every domain ever issued, including
    /// reclaimed ones. Fails with [`StoreError::SlugExhausted`] after
    /// [`MAX_SLUG_ATTEMPTS`] collisions.
    async fn create_domain(
        &self,
        token_hash: &str,
        root_domain: &str,
        slugs: &SlugSource,
        now: DateTime<Utc>,
    ) -> Result<Domain>;

    /// Get a live domain by fqdn.
    async fn get_domain(&self, fqdn: &str) -> Result<Option<Domain>>;

    /// Create the record for `(fqdn, rtype)` or refresh its values, owner and
    /// check-in time. The record id is stable across upserts.
    async fn upsert_record(
        &self,
        domain_id: i64,
        fqdn: &str,
        rtype: RecordType,
        values: &[String],
        now: DateTime<Utc>,
    ) -> Result<Record>;

    /// Refresh `last_check_in` on the domain and on its records matching `pairs`.
    async fn renew(&self, domain_id: i64, pairs: &[FqdnTypePair], now: DateTime<Utc>)
        -> Result<()>;

    /// All records owned by a domain, keyed by pair.
    async fn domain_records(&self, domain_id: i64) -> Result<HashMap<FqdnTypePair, Record>>;

    /// Every stored record, owned or orphaned, ordered by id.
    async fn all_records(&self) -> Result<Vec<Record>>;

    /// Records owned by a domain with the given fqdn (any type).
    async fn domain_records_by_fqdn(&self, fqdn: &str, domain_id: i64) -> Result<Vec<Record>>;

    /// Delete records by id. Returns the number of rows removed.
    async fn delete_records(&self, records: &[Record]) -> Result<u64>;

    /// Soft-delete domains not renewed since `domain_cutoff` (nulling their
    /// records' back-references) and hard-delete records not renewed since
    /// `record_cutoff`, in one transaction.
    async fn purge_stale(
        &self,
        domain_cutoff: DateTime<Utc>,
        record_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<PurgeCounts>;

    /// The subset of `pairs` with a stored record checked in at or after `cutoff`.
    async fn young_records(
        &self,
        cutoff: DateTime<Utc>,
        pairs: &HashSet<FqdnTypePair>,
    ) -> Result<HashSet<FqdnTypePair>>;
}

/// Open the store selected by configuration.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn LeaseStore>> {
    if config.is_memory() {
        return Ok(Arc::new(MemoryLeaseStore::new()));
    }
    let store = SqliteLeaseStore::connect(&config.url, config.max_connections).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests;
