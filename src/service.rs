//! Domain and record lifecycle.
//!
//! Writes go to the provider first and are persisted only once the provider
//! accepted them. A store failure after a provider success is surfaced to the
//! caller without compensation; the purger converges the two sides later.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::error::LeaseError;
use crate::metrics::{self, ChangeResult};
use crate::model::{
    canonical_values, is_under_domain, record_fqdn, validate_fqdn, Domain, DomainResponse,
    FqdnTypePair, Record, RecordRequest, RecordResponse, RenewResponse,
};
use crate::provider::{ChangeAction, DnsProvider, RecordSet};
use crate::store::LeaseStore;
use crate::token;

type Result<T> = std::result::Result<T, LeaseError>;

/// Use-case layer shared by the API handlers.
#[derive(Clone)]
pub struct LeaseService {
    store: Arc<dyn LeaseStore>,
    provider: Arc<dyn DnsProvider>,
    root_domain: String,
    record_ttl: u32,
}

impl LeaseService {
    /// Create a service issuing leases under `config.zone`.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        provider: Arc<dyn DnsProvider>,
        config: &ProviderConfig,
    ) -> Self {
        Self {
            store,
            provider,
            root_domain: config.root_domain().to_string(),
            record_ttl: config.record_ttl,
        }
    }

    /// Root domain leases are issued under.
    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }

    /// Issue a new lease. The plaintext token is returned exactly once.
    pub async fn create_domain(&self) -> Result<DomainResponse> {
        let token = token::generate_token();
        let plaintext = token.clone();
        let token_hash = tokio::task::spawn_blocking(move || token::hash_token(&plaintext)).await??;

        let domain = self
            .store
            .create_domain(&token_hash, &self.root_domain, &token::generate_slug, Utc::now())
            .await?;

        metrics::record_domain_created();
        info!(domain = %domain.fqdn, "created domain");

        Ok(DomainResponse {
            name: domain.fqdn,
            token: Some(token),
        })
    }

    /// Look up a live lease.
    pub async fn get_domain(&self, fqdn: &str) -> Result<Option<Domain>> {
        Ok(self.store.get_domain(fqdn).await?)
    }

    /// Resolve a lease and check the presented bearer token against it.
    pub async fn authenticate(&self, fqdn: &str, token: Option<&str>) -> Result<Domain> {
        let Some(domain) = self.get_domain(fqdn).await? else {
            metrics::record_auth_failure(true);
            return Err(LeaseError::Forbidden {
                domain_unknown: true,
            });
        };

        let Some(token) = token else {
            metrics::record_auth_failure(false);
            return Err(LeaseError::Forbidden {
                domain_unknown: false,
            });
        };

        let token = token.to_string();
        let hash = domain.token_hash.clone();
        let valid = tokio::task::spawn_blocking(move || token::verify_token(&token, &hash)).await?;
        if !valid {
            metrics::record_auth_failure(false);
            return Err(LeaseError::Forbidden {
                domain_unknown: false,
            });
        }

        Ok(domain)
    }

    /// Validate a record, upsert it to the provider and then persist it.
    pub async fn create_record(
        &self,
        domain: &Domain,
        input: RecordRequest,
    ) -> Result<RecordResponse> {
        let rtype = input.validate()?;
        let fqdn = record_fqdn(&input.name, &domain.fqdn);
        validate_fqdn(&fqdn)?;

        let result = self
            .provider
            .upsert(&fqdn, rtype, &input.values, self.record_ttl)
            .await;
        observe_change(ChangeAction::Upsert, 1, result)?;

        let record = self
            .store
            .upsert_record(domain.id, &fqdn, rtype, &input.values, Utc::now())
            .await?;
        debug!(
            domain = %domain.fqdn,
            fqdn = %record.fqdn,
            rtype = %record.rtype,
            record_id = record.id,
            "upserted record"
        );

        Ok(RecordResponse {
            record: input,
            fqdn,
        })
    }

    /// Delete every record named `<name>.<domain>` owned by the lease.
    pub async fn delete_record(&self, domain: &Domain, name: &str) -> Result<()> {
        let fqdn = record_fqdn(name, &domain.fqdn);
        let records = self
            .store
            .domain_records_by_fqdn(&fqdn, domain.id)
            .await?;
        self.delete_records(&domain.fqdn, records).await
    }

    /// Delete every record owned by the lease.
    pub async fn purge_records(&self, domain: &Domain) -> Result<()> {
        let records: Vec<Record> = self
            .store
            .domain_records(domain.id)
            .await?
            .into_values()
            .collect();
        self.delete_records(&domain.fqdn, records).await
    }

    /// Refresh the lease and report submitted records whose stored content
    /// is missing or differs. Stored values are never rewritten here.
    ///
    /// Entries with an unsupported type or a name outside the lease are
    /// skipped; the lease itself is always refreshed.
    pub async fn renew(
        &self,
        domain: &Domain,
        records: Vec<RecordRequest>,
    ) -> Result<RenewResponse> {
        let mut order: Vec<FqdnTypePair> = Vec::with_capacity(records.len());
        let mut submitted: HashMap<FqdnTypePair, Vec<String>> = HashMap::new();
        let total = records.len();

        for record in records {
            let rtype = match record.record_type() {
                Ok(rtype) => rtype,
                Err(e) => {
                    debug!(
                        domain = %domain.fqdn,
                        name = %record.name,
                        error = %e,
                        "ignoring unsupported record in renew"
                    );
                    continue;
                }
            };
            if !is_under_domain(&record.name, &domain.fqdn) {
                debug!(domain = %domain.fqdn, name = %record.name, "ignoring foreign record in renew");
                continue;
            }
            let pair = FqdnTypePair::new(record.name, rtype);
            if !submitted.contains_key(&pair) {
                order.push(pair.clone());
            }
            submitted.insert(pair, record.values);
        }

        self.store.renew(domain.id, &order, Utc::now()).await?;
        let stored = self.store.domain_records(domain.id).await?;

        let out_of_sync: Vec<FqdnTypePair> = order
            .into_iter()
            .filter(|pair| {
                let wanted = submitted
                    .get(pair)
                    .map(|values| canonical_values(values))
                    .unwrap_or_default();
                stored.get(pair).is_none_or(|record| record.values != wanted)
            })
            .collect();

        metrics::record_renew(total, out_of_sync.len());
        if !out_of_sync.is_empty() {
            info!(
                domain = %domain.fqdn,
                out_of_sync = out_of_sync.len(),
                "renew found out-of-sync records"
            );
        }

        Ok(RenewResponse {
            name: domain.fqdn.clone(),
            out_of_sync_records: out_of_sync,
        })
    }

    async fn delete_records(&self, domain_fqdn: &str, records: Vec<Record>) -> Result<()> {
        if records.is_empty() {
            debug!(domain = %domain_fqdn, "no records to delete");
            return Ok(());
        }

        let sets: Vec<RecordSet> = records
            .iter()
            .map(|r| RecordSet::for_record(&r.fqdn, r.rtype, &r.value_list(), self.record_ttl))
            .collect();
        let changes = sets.len();
        let result = self.provider.delete(sets).await;
        observe_change(ChangeAction::Delete, changes, result)?;

        let deleted = self.store.delete_records(&records).await?;
        info!(domain = %domain_fqdn, deleted, "deleted records");
        Ok(())
    }
}

fn observe_change(
    action: ChangeAction,
    changes: usize,
    result: crate::provider::Result<()>,
) -> Result<()> {
    match result {
        Ok(()) => {
            metrics::record_provider_change(action, changes, ChangeResult::Applied);
            Ok(())
        }
        Err(e) => {
            warn!(action = action.as_str(), changes, error = %e, "provider change failed");
            metrics::record_provider_change(action, changes, ChangeResult::Failed);
            Err(e.into())
        }
    }
}
