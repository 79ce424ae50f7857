//! In-memory lease store.
//!
//! All state lives behind one lock, so every operation is trivially atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::{LeaseStore, PurgeCounts, Result, SlugSource, StoreError, MAX_SLUG_ATTEMPTS};
use crate::model::{canonical_values, Domain, FqdnTypePair, Record, RecordType};

/// Thread-safe in-memory lease store.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    /// id -> Domain, including soft-deleted ones
    domains: BTreeMap<i64, Domain>,

    /// id -> Record
    records: BTreeMap<i64, Record>,

    next_domain_id: i64,
    next_record_id: i64,
}

impl MemoryInner {
    fn slug_taken(&self, slug: &str) -> bool {
        self.domains.values().any(|d| d.unique_slug == slug)
    }

    fn record_by_pair_mut(&mut self, fqdn: &str, rtype: RecordType) -> Option<&mut Record> {
        self.records
            .values_mut()
            .find(|r| r.fqdn == fqdn && r.rtype == rtype)
    }
}

impl MemoryLeaseStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of live domains.
    pub fn domains_count(&self) -> usize {
        self.inner
            .read()
            .domains
            .values()
            .filter(|d| d.deleted_at.is_none())
            .count()
    }

    /// Count of stored records.
    pub fn records_count(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Snapshot of a record by pair, regardless of owner.
    pub fn record(&self, fqdn: &str, rtype: RecordType) -> Option<Record> {
        self.inner
            .read()
            .records
            .values()
            .find(|r| r.fqdn == fqdn && r.rtype == rtype)
            .cloned()
    }

    /// Snapshot of a domain by id, including soft-deleted ones.
    pub fn domain_by_id(&self, id: i64) -> Option<Domain> {
        self.inner.read().domains.get(&id).cloned()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn create_domain(
        &self,
        token_hash: &str,
        root_domain: &str,
        slugs: &SlugSource,
        now: DateTime<Utc>,
    ) -> Result<Domain> {
        let mut inner = self.inner.write();

        let slug = (0..MAX_SLUG_ATTEMPTS)
            .map(|_| slugs())
            .find(|s| !inner.slug_taken(s))
            .ok_or(StoreError::SlugExhausted(MAX_SLUG_ATTEMPTS))?;

        inner.next_domain_id += 1;
        let domain = Domain {
            id: inner.next_domain_id,
            fqdn: format!("{}.{}", slug, root_domain),
            unique_slug: slug,
            token_hash: token_hash.to_string(),
            last_check_in: now,
            created_at: now,
            deleted_at: None,
        };
        debug!(domain_id = domain.id, fqdn = %domain.fqdn, "created domain");
        inner.domains.insert(domain.id, domain.clone());
        Ok(domain)
    }

    async fn get_domain(&self, fqdn: &str) -> Result<Option<Domain>> {
        let inner = self.inner.read();
        Ok(inner
            .domains
            .values()
            .find(|d| d.fqdn == fqdn && d.deleted_at.is_none())
            .cloned())
    }

    async fn upsert_record(
        &self,
        domain_id: i64,
        fqdn: &str,
        rtype: RecordType,
        values: &[String],
        now: DateTime<Utc>,
    ) -> Result<Record> {
        let mut inner = self.inner.write();
        let canonical = canonical_values(values);

        if let Some(existing) = inner.record_by_pair_mut(fqdn, rtype) {
            existing.values = canonical;
            existing.domain_id = Some(domain_id);
            existing.last_check_in = now;
            return Ok(existing.clone());
        }

        inner.next_record_id += 1;
        let record = Record {
            id: inner.next_record_id,
            fqdn: fqdn.to_string(),
            rtype,
            domain_id: Some(domain_id),
            values: canonical,
            created_at: now,
            last_check_in: now,
        };
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn renew(
        &self,
        domain_id: i64,
        pairs: &[FqdnTypePair],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let wanted: HashSet<&FqdnTypePair> = pairs.iter().collect();

        for record in inner.records.values_mut() {
            if record.domain_id == Some(domain_id) && wanted.contains(&record.pair()) {
                record.last_check_in = now;
            }
        }

        if let Some(domain) = inner.domains.get_mut(&domain_id) {
            if domain.deleted_at.is_none() {
                domain.last_check_in = now;
            }
        }

        Ok(())
    }

    async fn domain_records(&self, domain_id: i64) -> Result<HashMap<FqdnTypePair, Record>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .values()
            .filter(|r| r.domain_id == Some(domain_id))
            .map(|r| (r.pair(), r.clone()))
            .collect())
    }

    async fn all_records(&self) -> Result<Vec<Record>> {
        Ok(self.inner.read().records.values().cloned().collect())
    }

    async fn domain_records_by_fqdn(&self, fqdn: &str, domain_id: i64) -> Result<Vec<Record>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .values()
            .filter(|r| r.fqdn == fqdn && r.domain_id == Some(domain_id))
            .cloned()
            .collect())
    }

    async fn delete_records(&self, records: &[Record]) -> Result<u64> {
        let mut inner = self.inner.write();
        let deleted = records
            .iter()
            .filter(|r| inner.records.remove(&r.id).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn purge_stale(
        &self,
        domain_cutoff: DateTime<Utc>,
        record_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<PurgeCounts> {
        let mut inner = self.inner.write();

        let stale_domains: HashSet<i64> = inner
            .domains
            .values()
            .filter(|d| d.deleted_at.is_none() && d.last_check_in < domain_cutoff)
            .map(|d| d.id)
            .collect();

        for record in inner.records.values_mut() {
            if record
                .domain_id
                .is_some_and(|id| stale_domains.contains(&id))
            {
                record.domain_id = None;
            }
        }
        // Soft delete only: the slug stays reserved.
        for id in &stale_domains {
            if let Some(domain) = inner.domains.get_mut(id) {
                domain.deleted_at = Some(now);
            }
        }

        let before = inner.records.len();
        inner.records.retain(|_, r| r.last_check_in >= record_cutoff);
        let records = (before - inner.records.len()) as u64;

        Ok(PurgeCounts {
            domains: stale_domains.len() as u64,
            records,
        })
    }

    async fn young_records(
        &self,
        cutoff: DateTime<Utc>,
        pairs: &HashSet<FqdnTypePair>,
    ) -> Result<HashSet<FqdnTypePair>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .values()
            .filter(|r| r.last_check_in >= cutoff)
            .map(Record::pair)
            .filter(|pair| pairs.contains(pair))
            .collect())
    }
}
