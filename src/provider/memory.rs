//! In-process DNS provider.
//!
//! Enforces the same rules as a hosted zone: batches apply all-or-nothing,
//! deletes must carry the current values exactly, and names must fall inside
//! the zone. Failures can be injected for tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::model::Record;

use super::{
    absolute_name, ChangeAction, ChangeBatch, DnsProvider, ProviderError, RecordSet,
    RecordSetPage, Result,
};

const DEFAULT_PAGE_SIZE: usize = 100;

type SetKey = (String, u16);

fn key_of(set: &RecordSet) -> SetKey {
    (set.name.clone(), u16::from(set.rtype))
}

fn same_values(a: &[String], b: &[String]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// Zone held in memory.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    inner: Arc<MemoryZone>,
    page_size: usize,
}

#[derive(Debug)]
struct MemoryZone {
    /// Absolute zone name.
    origin: String,
    record_sets: RwLock<BTreeMap<SetKey, RecordSet>>,
    applied: RwLock<Vec<ChangeBatch>>,
    fail_listing: AtomicBool,
    fail_changes: AtomicBool,
}

impl MemoryProvider {
    /// Empty zone rooted at `zone`.
    pub fn new(zone: &str) -> Self {
        Self {
            inner: Arc::new(MemoryZone {
                origin: absolute_name(zone),
                record_sets: RwLock::new(BTreeMap::new()),
                applied: RwLock::new(Vec::new()),
                fail_listing: AtomicBool::new(false),
                fail_changes: AtomicBool::new(false),
            }),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the listing page size of this handle.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Place a record set directly, bypassing batch validation and the log.
    pub fn insert(&self, set: RecordSet) {
        self.inner.record_sets.write().insert(key_of(&set), set);
    }

    /// Rebuild record sets from stored records, skipping names outside the
    /// zone. Returns how many sets were placed.
    pub fn restore(&self, records: &[Record], ttl: u32) -> usize {
        let mut sets = self.inner.record_sets.write();
        let mut restored = 0;
        for record in records {
            let set = RecordSet::for_record(&record.fqdn, record.rtype, &record.value_list(), ttl);
            if !self.in_zone(&set.name) {
                debug!(name = %set.name, "skipping stored record outside the zone");
                continue;
            }
            sets.insert(key_of(&set), set);
            restored += 1;
        }
        restored
    }

    /// Current record set for an absolute or relative name.
    pub fn get(&self, name: &str, rtype: hickory_proto::rr::RecordType) -> Option<RecordSet> {
        let key = (absolute_name(name), u16::from(rtype));
        self.inner.record_sets.read().get(&key).cloned()
    }

    /// Number of record sets in the zone.
    pub fn len(&self) -> usize {
        self.inner.record_sets.read().len()
    }

    /// True when the zone holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches applied successfully, oldest first.
    pub fn applied_batches(&self) -> Vec<ChangeBatch> {
        self.inner.applied.read().clone()
    }

    /// Make every listing call fail.
    pub fn fail_listing(&self, fail: bool) {
        self.inner.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make every change batch fail.
    pub fn fail_changes(&self, fail: bool) {
        self.inner.fail_changes.store(fail, Ordering::SeqCst);
    }

    fn in_zone(&self, name: &str) -> bool {
        let origin = &self.inner.origin;
        name == origin || name.ends_with(&format!(".{origin}"))
    }
}

#[async_trait]
impl DnsProvider for MemoryProvider {
    async fn apply(&self, batch: ChangeBatch) -> Result<()> {
        if self.inner.fail_changes.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("injected change failure".to_string()));
        }
        if batch.is_empty() {
            return Err(ProviderError::InvalidChange("empty change batch".to_string()));
        }

        let mut sets = self.inner.record_sets.write();
        let mut staged = sets.clone();

        for change in &batch.changes {
            let set = &change.record_set;
            if !self.in_zone(&set.name) {
                return Err(ProviderError::InvalidChange(format!(
                    "{} is not in zone {}",
                    set.name, self.inner.origin
                )));
            }
            if set.values.is_empty() {
                return Err(ProviderError::InvalidChange(format!(
                    "{} {} has no values",
                    set.name, set.rtype
                )));
            }

            let key = key_of(set);
            match change.action {
                ChangeAction::Upsert => {
                    staged.insert(key, set.clone());
                }
                ChangeAction::Delete => match staged.get(&key) {
                    Some(current) if same_values(&current.values, &set.values) => {
                        staged.remove(&key);
                    }
                    Some(_) => {
                        return Err(ProviderError::Rejected(format!(
                            "values for {} {} do not match",
                            set.name, set.rtype
                        )));
                    }
                    None => {
                        return Err(ProviderError::Rejected(format!(
                            "{} {} not found",
                            set.name, set.rtype
                        )));
                    }
                },
            }
        }

        *sets = staged;
        debug!(changes = batch.len(), "applied change batch");
        self.inner.applied.write().push(batch);
        Ok(())
    }

    async fn list_page(&self, cursor: Option<String>) -> Result<RecordSetPage> {
        if self.inner.fail_listing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("injected listing failure".to_string()));
        }

        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| ProviderError::InvalidChange(format!("bad cursor {c:?}")))?,
            None => 0,
        };

        let sets = self.inner.record_sets.read();
        let record_sets: Vec<RecordSet> = sets
            .values()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let end = start + record_sets.len();
        let next = (end < sets.len()).then(|| end.to_string());

        Ok(RecordSetPage { record_sets, next })
    }
}
