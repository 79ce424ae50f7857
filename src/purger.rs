//! Background reconciliation between the lease store and the DNS provider.
//!
//! Each cycle reclaims stale leases in the store, then deletes provider
//! record sets that no young lease record vouches for. The two sides share
//! no transaction; repeated cycles converge them.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PurgeConfig;
use crate::error::LeaseError;
use crate::metrics::{self, ChangeResult, PurgeResult, Timer};
use crate::model::{FqdnTypePair, RecordType};
use crate::provider::{list_all, ChangeAction, DnsProvider, RecordSet};
use crate::store::{LeaseStore, PurgeCounts};

/// Types the provider sweep may delete. AAAA is left alone.
const PURGEABLE_TYPES: [RecordType; 3] = [RecordType::A, RecordType::CNAME, RecordType::TXT];

/// What one purge cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Leases soft-deleted in the store.
    pub domains_purged: u64,
    /// Records deleted from the store.
    pub records_purged: u64,
    /// Record sets deleted from the provider.
    pub provider_records_deleted: usize,
    /// The store purge failed; counts above are zero for the store side.
    pub store_failed: bool,
}

/// Periodic purge task.
pub struct Purger {
    store: Arc<dyn LeaseStore>,
    provider: Arc<dyn DnsProvider>,
    config: PurgeConfig,
}

impl Purger {
    /// Create a purger over the shared store and provider.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        provider: Arc<dyn DnsProvider>,
        config: PurgeConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Spawn [`Purger::run`] on the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run cycles until `cancel` fires. The first cycle starts immediately;
    /// cancellation is only observed between cycles.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.interval_secs,
            jitter = self.config.jitter,
            "purger started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let timer = Timer::start();
            match self.run_cycle().await {
                Ok(report) => {
                    let result = if report.store_failed {
                        PurgeResult::Partial
                    } else {
                        PurgeResult::Success
                    };
                    metrics::record_purge_cycle(result, timer.elapsed());
                }
                Err(e) => {
                    error!(error = %e, "purge cycle failed");
                    metrics::record_purge_cycle(PurgeResult::Error, timer.elapsed());
                }
            }

            let wait = self.next_wait();
            debug!(wait_secs = wait.as_secs_f64(), "next purge scheduled");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("purger stopped");
    }

    /// Run one purge cycle.
    pub async fn run_cycle(&self) -> Result<PurgeReport, LeaseError> {
        let now = Utc::now();
        let domain_cutoff = cutoff(now, self.config.domain_max_age())?;
        let record_cutoff = cutoff(now, self.config.record_max_age())?;

        let mut report = PurgeReport::default();
        match self.store.purge_stale(domain_cutoff, record_cutoff, now).await {
            Ok(PurgeCounts { domains, records }) => {
                info!(domains, records, "purged stale leases from store");
                report.domains_purged = domains;
                report.records_purged = records;
            }
            Err(e) => {
                warn!(error = %e, "failed to purge stale leases from store");
                report.store_failed = true;
            }
        }

        let mut candidates = self.stale_provider_records(record_cutoff).await?;
        candidates.retain(|pair, _| !self.is_exempt(&pair.fqdn));

        if candidates.is_empty() {
            info!("no stale provider records to delete");
        } else {
            let sets: Vec<RecordSet> = candidates.into_values().collect();
            let count = sets.len();
            match self.provider.delete(sets).await {
                Ok(()) => {
                    metrics::record_provider_change(ChangeAction::Delete, count, ChangeResult::Applied);
                    info!(count, "deleted stale provider records");
                    report.provider_records_deleted = count;
                }
                Err(e) => {
                    metrics::record_provider_change(ChangeAction::Delete, count, ChangeResult::Failed);
                    return Err(e.into());
                }
            }
        }

        metrics::record_purged(
            report.domains_purged,
            report.records_purged,
            report.provider_records_deleted,
        );
        Ok(report)
    }

    /// Provider record sets of purgeable types with no young store record.
    async fn stale_provider_records(
        &self,
        record_cutoff: DateTime<Utc>,
    ) -> Result<BTreeMap<FqdnTypePair, RecordSet>, LeaseError> {
        let mut candidates = BTreeMap::new();
        let mut pages = pin!(list_all(self.provider.as_ref()));

        while let Some(page) = pages.try_next().await? {
            let page_sets: HashMap<FqdnTypePair, RecordSet> = page
                .into_iter()
                .filter_map(|set| {
                    let rtype = RecordType::try_from(set.rtype).ok()?;
                    PURGEABLE_TYPES
                        .contains(&rtype)
                        .then(|| (FqdnTypePair::new(set.relative_name(), rtype), set))
                })
                .collect();
            if page_sets.is_empty() {
                continue;
            }

            let pairs: HashSet<FqdnTypePair> = page_sets.keys().cloned().collect();
            let young = self.store.young_records(record_cutoff, &pairs).await?;
            debug!(listed = pairs.len(), young = young.len(), "checked provider page");

            candidates.extend(page_sets.into_iter().filter(|(pair, _)| !young.contains(pair)));
        }

        Ok(candidates)
    }

    fn is_exempt(&self, fqdn: &str) -> bool {
        self.config
            .exempt_suffixes
            .iter()
            .map(|suffix| suffix.trim_end_matches('.'))
            .any(|suffix| !suffix.is_empty() && fqdn.ends_with(suffix))
    }

    fn next_wait(&self) -> Duration {
        let interval = self.config.interval();
        if self.config.jitter.is_nan() || self.config.jitter <= 0.0 {
            return interval;
        }
        let factor = rand::thread_rng().gen::<f64>() * self.config.jitter.min(1.0);
        interval + interval.mul_f64(factor)
    }
}

fn cutoff(now: DateTime<Utc>, max_age: Duration) -> Result<DateTime<Utc>, LeaseError> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| LeaseError::Config(format!("max age {max_age:?} out of range")))
}
