//! Shared test infrastructure for lease-dns integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use lease_dns::api::{self, AppState};
use lease_dns::config::{ApiConfig, ProviderConfig, PurgeConfig};
use lease_dns::model::{Domain, FqdnTypePair, Record, RecordRequest, RecordType};
use lease_dns::provider::{absolute_name, RecordSet};
use lease_dns::store::{self, PurgeCounts, SlugSource, StoreError};
use lease_dns::{LeaseService, LeaseStore, MemoryLeaseStore, MemoryProvider, Purger, SqliteLeaseStore};

// --- Constants ---

pub const ROOT: &str = "example.com";
pub const TTL: u32 = 300;

// --- Environment builder ---

/// Service wired to in-process backends, with handles kept for assertions.
pub struct TestEnv {
    pub store: Arc<dyn LeaseStore>,
    /// Failure switches of the wrapped store.
    pub faults: Arc<StoreFaults>,
    /// Concrete handle when the memory store is in use.
    pub memory_store: Option<MemoryLeaseStore>,
    pub provider: MemoryProvider,
    pub service: LeaseService,
}

pub struct TestEnvBuilder {
    page_size: usize,
    sqlite: bool,
}

impl TestEnvBuilder {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            sqlite: false,
        }
    }

    /// Provider listing page size.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Back the service with an in-memory SQLite database.
    pub fn sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    pub async fn build(self) -> TestEnv {
        let (store, memory_store): (Arc<dyn LeaseStore>, Option<MemoryLeaseStore>) = if self.sqlite {
            let store = SqliteLeaseStore::connect("sqlite::memory:", 1)
                .await
                .expect("failed to open in-memory sqlite");
            (Arc::new(store), None)
        } else {
            let store = MemoryLeaseStore::new();
            (Arc::new(store.clone()), Some(store))
        };

        let faults = Arc::new(StoreFaults::default());
        let store: Arc<dyn LeaseStore> = Arc::new(FaultyStore {
            inner: store,
            faults: faults.clone(),
        });

        let provider = MemoryProvider::new(ROOT).with_page_size(self.page_size);
        let service = LeaseService::new(
            store.clone(),
            Arc::new(provider.clone()),
            &ProviderConfig::new(ROOT),
        );

        TestEnv {
            store,
            faults,
            memory_store,
            provider,
            service,
        }
    }
}

impl TestEnv {
    pub async fn new() -> Self {
        TestEnvBuilder::new().build().await
    }

    /// Create a lease and return it with its plaintext token.
    pub async fn lease(&self) -> (Domain, String) {
        let created = self.service.create_domain().await.expect("create domain");
        let token = created.token.expect("token returned on creation");
        let domain = self
            .store
            .get_domain(&created.name)
            .await
            .unwrap()
            .expect("domain persisted");
        (domain, token)
    }

    /// Create a record through the service.
    pub async fn record(&self, domain: &Domain, name: &str, rtype: &str, values: &[&str]) {
        self.service
            .create_record(domain, record_request(name, rtype, values))
            .await
            .expect("create record");
    }

    /// Rewind a record's check-in time.
    pub async fn age_record(
        &self,
        domain: &Domain,
        fqdn: &str,
        rtype: RecordType,
        values: &[&str],
        age: Duration,
    ) {
        self.store
            .upsert_record(domain.id, fqdn, rtype, &strings(values), Utc::now() - age)
            .await
            .expect("age record");
    }

    /// Rewind a domain's check-in time.
    pub async fn age_domain(&self, domain: &Domain, age: Duration) {
        self.store
            .renew(domain.id, &[], Utc::now() - age)
            .await
            .expect("age domain");
    }

    pub fn purger(&self, config: PurgeConfig) -> Purger {
        Purger::new(self.store.clone(), Arc::new(self.provider.clone()), config)
    }

    pub fn router(&self, api_config: &ApiConfig) -> Router {
        api::router(AppState::new(self.service.clone(), api_config))
    }
}

// --- Store failures ---

/// Switches that make selected store operations fail.
#[derive(Debug, Default)]
pub struct StoreFaults {
    purge_stale: AtomicBool,
    young_records: AtomicBool,
}

impl StoreFaults {
    pub fn fail_purge_stale(&self, fail: bool) {
        self.purge_stale.store(fail, Ordering::SeqCst);
    }

    pub fn fail_young_records(&self, fail: bool) {
        self.young_records.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, op: &str) -> store::Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData(format!("injected {op} failure")));
        }
        Ok(())
    }
}

/// Store that delegates to `inner` unless a fault is switched on.
pub struct FaultyStore {
    inner: Arc<dyn LeaseStore>,
    faults: Arc<StoreFaults>,
}

#[async_trait]
impl LeaseStore for FaultyStore {
    async fn create_domain(
        &self,
        token_hash: &str,
        root_domain: &str,
        slugs: &SlugSource,
        now: DateTime<Utc>,
    ) -> store::Result<Domain> {
        self.inner.create_domain(token_hash, root_domain, slugs, now).await
    }

    async fn get_domain(&self, fqdn: &str) -> store::Result<Option<Domain>> {
        self.inner.get_domain(fqdn).await
    }

    async fn upsert_record(
        &self,
        domain_id: i64,
        fqdn: &str,
        rtype: RecordType,
        values: &[String],
        now: DateTime<Utc>,
    ) -> store::Result<Record> {
        self.inner.upsert_record(domain_id, fqdn, rtype, values, now).await
    }

    async fn renew(
        &self,
        domain_id: i64,
        pairs: &[FqdnTypePair],
        now: DateTime<Utc>,
    ) -> store::Result<()> {
        self.inner.renew(domain_id, pairs, now).await
    }

    async fn domain_records(&self, domain_id: i64) -> store::Result<HashMap<FqdnTypePair, Record>> {
        self.inner.domain_records(domain_id).await
    }

    async fn all_records(&self) -> store::Result<Vec<Record>> {
        self.inner.all_records().await
    }

    async fn domain_records_by_fqdn(&self, fqdn: &str, domain_id: i64) -> store::Result<Vec<Record>> {
        self.inner.domain_records_by_fqdn(fqdn, domain_id).await
    }

    async fn delete_records(&self, records: &[Record]) -> store::Result<u64> {
        self.inner.delete_records(records).await
    }

    async fn purge_stale(
        &self,
        domain_cutoff: DateTime<Utc>,
        record_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> store::Result<PurgeCounts> {
        StoreFaults::check(&self.faults.purge_stale, "purge_stale")?;
        self.inner.purge_stale(domain_cutoff, record_cutoff, now).await
    }

    async fn young_records(
        &self,
        cutoff: DateTime<Utc>,
        pairs: &HashSet<FqdnTypePair>,
    ) -> store::Result<HashSet<FqdnTypePair>> {
        StoreFaults::check(&self.faults.young_records, "young_records")?;
        self.inner.young_records(cutoff, pairs).await
    }
}

// --- Builders ---

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn record_request(name: &str, rtype: &str, values: &[&str]) -> RecordRequest {
    RecordRequest {
        name: name.to_string(),
        rtype: rtype.to_string(),
        values: strings(values),
    }
}

/// A record set as it would appear in a provider listing.
pub fn provider_set(name: &str, rtype: hickory_proto::rr::RecordType, values: &[&str]) -> RecordSet {
    RecordSet {
        name: absolute_name(name),
        rtype,
        ttl: TTL,
        values: strings(values),
    }
}

pub fn ago(age: Duration) -> DateTime<Utc> {
    Utc::now() - age
}

// --- HTTP helpers ---

/// Send one request through the router and decode the JSON body.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
