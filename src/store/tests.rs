//! Behaviour shared by every `LeaseStore` backend.
//!
//! Each scenario is written once against `&dyn LeaseStore` and run for both
//! the in-memory and the SQLite implementations.

use super::*;
use chrono::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};

const ROOT: &str = "example.com";

async fn sqlite_store() -> SqliteLeaseStore {
    SqliteLeaseStore::connect("sqlite::memory:", 1)
        .await
        .expect("failed to open in-memory sqlite")
}

fn fixed_slugs(slugs: &'static [&'static str]) -> impl Fn() -> String + Send + Sync {
    let next = AtomicUsize::new(0);
    move || {
        let i = next.fetch_add(1, Ordering::SeqCst);
        slugs[i.min(slugs.len() - 1)].to_string()
    }
}

fn values(vals: &[&str]) -> Vec<String> {
    vals.iter().map(|v| v.to_string()).collect()
}

async fn create_domain_assigns_slug_and_fqdn(store: &dyn LeaseStore) {
    let now = Utc::now();
    let domain = store
        .create_domain("hash", ROOT, &fixed_slugs(&["abc123"]), now)
        .await
        .unwrap();

    assert_eq!(domain.unique_slug, "abc123");
    assert_eq!(domain.fqdn, "abc123.example.com");
    assert_eq!(domain.token_hash, "hash");
    assert!(domain.deleted_at.is_none());

    let found = store.get_domain("abc123.example.com").await.unwrap();
    assert_eq!(found.map(|d| d.id), Some(domain.id));
    assert!(store.get_domain("nope.example.com").await.unwrap().is_none());
}

async fn create_domain_retries_slug_collisions(store: &dyn LeaseStore) {
    let now = Utc::now();
    store
        .create_domain("h1", ROOT, &fixed_slugs(&["aaaaaa"]), now)
        .await
        .unwrap();

    let second = store
        .create_domain("h2", ROOT, &fixed_slugs(&["aaaaaa", "aaaaaa", "bbbbbb"]), now)
        .await
        .unwrap();
    assert_eq!(second.unique_slug, "bbbbbb");
}

async fn create_domain_fails_when_slugs_exhausted(store: &dyn LeaseStore) {
    let now = Utc::now();
    store
        .create_domain("h1", ROOT, &fixed_slugs(&["zzzzzz"]), now)
        .await
        .unwrap();

    let err = store
        .create_domain("h2", ROOT, &fixed_slugs(&["zzzzzz"]), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SlugExhausted(MAX_SLUG_ATTEMPTS)));
}

async fn upsert_keeps_identity_and_refreshes(store: &dyn LeaseStore) {
    let t0 = Utc::now() - Duration::hours(1);
    let t1 = Utc::now();
    let domain = store
        .create_domain("hash", ROOT, &fixed_slugs(&["abc123"]), t0)
        .await
        .unwrap();
    let fqdn = "www.abc123.example.com";

    let first = store
        .upsert_record(domain.id, fqdn, RecordType::A, &values(&["10.0.0.2", "10.0.0.1"]), t0)
        .await
        .unwrap();
    assert_eq!(first.values, "10.0.0.1,10.0.0.2");

    let second = store
        .upsert_record(domain.id, fqdn, RecordType::A, &values(&["10.0.0.3"]), t1)
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.values, "10.0.0.3");
    assert_eq!(second.last_check_in.timestamp_millis(), t1.timestamp_millis());
    assert_eq!(second.created_at.timestamp_millis(), t0.timestamp_millis());

    let records = store.domain_records(domain.id).await.unwrap();
    assert_eq!(records.len(), 1);
}

async fn same_fqdn_different_types_are_distinct(store: &dyn LeaseStore) {
    let now = Utc::now();
    let domain = store
        .create_domain("hash", ROOT, &fixed_slugs(&["abc123"]), now)
        .await
        .unwrap();
    let fqdn = "www.abc123.example.com";

    store
        .upsert_record(domain.id, fqdn, RecordType::A, &values(&["10.0.0.1"]), now)
        .await
        .unwrap();
    store
        .upsert_record(domain.id, fqdn, RecordType::TXT, &values(&["hello"]), now)
        .await
        .unwrap();

    let by_fqdn = store.domain_records_by_fqdn(fqdn, domain.id).await.unwrap();
    assert_eq!(by_fqdn.len(), 2);

    let deleted = store.delete_records(&by_fqdn).await.unwrap();
    assert_eq!(deleted, 2);
    assert!(store.domain_records(domain.id).await.unwrap().is_empty());
}

async fn renew_touches_only_named_pairs(store: &dyn LeaseStore) {
    let t0 = Utc::now() - Duration::days(1);
    let t1 = Utc::now();
    let domain = store
        .create_domain("hash", ROOT, &fixed_slugs(&["abc123"]), t0)
        .await
        .unwrap();
    let kept = "www.abc123.example.com";
    let other = "api.abc123.example.com";

    store
        .upsert_record(domain.id, kept, RecordType::A, &values(&["10.0.0.1"]), t0)
        .await
        .unwrap();
    store
        .upsert_record(domain.id, other, RecordType::A, &values(&["10.0.0.2"]), t0)
        .await
        .unwrap();

    store
        .renew(domain.id, &[FqdnTypePair::new(kept, RecordType::A)], t1)
        .await
        .unwrap();

    let records = store.domain_records(domain.id).await.unwrap();
    let kept_rec = &records[&FqdnTypePair::new(kept, RecordType::A)];
    let other_rec = &records[&FqdnTypePair::new(other, RecordType::A)];
    assert_eq!(kept_rec.last_check_in.timestamp_millis(), t1.timestamp_millis());
    assert_eq!(other_rec.last_check_in.timestamp_millis(), t0.timestamp_millis());
    assert_eq!(kept_rec.values, "10.0.0.1");

    let refreshed = store.get_domain(&domain.fqdn).await.unwrap().unwrap();
    assert_eq!(refreshed.last_check_in.timestamp_millis(), t1.timestamp_millis());
}

async fn purge_soft_deletes_domains_and_orphans_records(store: &dyn LeaseStore) {
    let now = Utc::now();
    let old = now - Duration::days(40);
    let domain = store
        .create_domain("hash", ROOT, &fixed_slugs(&["old111"]), old)
        .await
        .unwrap();
    let fresh = store
        .create_domain("hash", ROOT, &fixed_slugs(&["new222"]), now)
        .await
        .unwrap();

    // Record kept alive independently of its stale domain.
    let fqdn = "www.old111.example.com";
    store
        .upsert_record(domain.id, fqdn, RecordType::A, &values(&["10.0.0.1"]), now)
        .await
        .unwrap();

    let counts = store
        .purge_stale(now - Duration::days(30), now - Duration::days(2), now)
        .await
        .unwrap();
    assert_eq!(counts, PurgeCounts { domains: 1, records: 0 });

    assert!(store.get_domain(&domain.fqdn).await.unwrap().is_none());
    assert!(store.get_domain(&fresh.fqdn).await.unwrap().is_some());
    assert!(store.domain_records(domain.id).await.unwrap().is_empty());

    // The record survives, orphaned, and still counts as young.
    let pairs: HashSet<FqdnTypePair> = [FqdnTypePair::new(fqdn, RecordType::A)].into();
    let young = store
        .young_records(now - Duration::days(2), &pairs)
        .await
        .unwrap();
    assert_eq!(young, pairs);

    // Reclaimed slugs are never reissued.
    let err = store
        .create_domain("hash", ROOT, &fixed_slugs(&["old111"]), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SlugExhausted(_)));
}

async fn purge_deletes_stale_records(store: &dyn LeaseStore) {
    let now = Utc::now();
    let domain = store
        .create_domain("hash", ROOT, &fixed_slugs(&["abc123"]), now)
        .await
        .unwrap();

    store
        .upsert_record(
            domain.id,
            "old.abc123.example.com",
            RecordType::A,
            &values(&["10.0.0.1"]),
            now - Duration::days(3),
        )
        .await
        .unwrap();
    store
        .upsert_record(
            domain.id,
            "new.abc123.example.com",
            RecordType::A,
            &values(&["10.0.0.2"]),
            now,
        )
        .await
        .unwrap();

    let counts = store
        .purge_stale(now - Duration::days(30), now - Duration::days(2), now)
        .await
        .unwrap();
    assert_eq!(counts, PurgeCounts { domains: 0, records: 1 });

    let remaining = store.domain_records(domain.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains_key(&FqdnTypePair::new("new.abc123.example.com", RecordType::A)));
}

async fn young_records_filters_by_age_and_pair(store: &dyn LeaseStore) {
    let now = Utc::now();
    let domain = store
        .create_domain("hash", ROOT, &fixed_slugs(&["abc123"]), now)
        .await
        .unwrap();
    let fqdn = "www.abc123.example.com";

    store
        .upsert_record(domain.id, fqdn, RecordType::A, &values(&["10.0.0.1"]), now)
        .await
        .unwrap();
    store
        .upsert_record(
            domain.id,
            fqdn,
            RecordType::TXT,
            &values(&["old"]),
            now - Duration::days(3),
        )
        .await
        .unwrap();

    let pairs: HashSet<FqdnTypePair> = [
        FqdnTypePair::new(fqdn, RecordType::A),
        FqdnTypePair::new(fqdn, RecordType::TXT),
        FqdnTypePair::new(fqdn, RecordType::CNAME),
        FqdnTypePair::new("unknown.example.com", RecordType::A),
    ]
    .into();

    let young = store
        .young_records(now - Duration::days(2), &pairs)
        .await
        .unwrap();
    assert_eq!(young, [FqdnTypePair::new(fqdn, RecordType::A)].into());

    assert!(store
        .young_records(now, &HashSet::new())
        .await
        .unwrap()
        .is_empty());
}

async fn all_records_includes_orphans(store: &dyn LeaseStore) {
    let now = Utc::now();
    let stale = store
        .create_domain("hash", ROOT, &fixed_slugs(&["old333"]), now - Duration::days(40))
        .await
        .unwrap();
    let live = store
        .create_domain("hash", ROOT, &fixed_slugs(&["new444"]), now)
        .await
        .unwrap();
    store
        .upsert_record(stale.id, "www.old333.example.com", RecordType::A, &values(&["10.0.0.1"]), now)
        .await
        .unwrap();
    store
        .upsert_record(live.id, "txt.new444.example.com", RecordType::TXT, &values(&["b", "a"]), now)
        .await
        .unwrap();
    store
        .purge_stale(now - Duration::days(30), now - Duration::days(2), now)
        .await
        .unwrap();

    let records = store.all_records().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].fqdn, "www.old333.example.com");
    assert_eq!(records[0].domain_id, None);
    assert_eq!(records[1].domain_id, Some(live.id));
    assert_eq!(records[1].values, "a,b");
}

macro_rules! store_suite {
    ($($name:ident),* $(,)?) => {
        mod memory_backend {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    let store = MemoryLeaseStore::new();
                    super::$name(&store).await;
                }
            )*
        }

        mod sqlite_backend {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    let store = sqlite_store().await;
                    super::$name(&store).await;
                }
            )*
        }
    };
}

store_suite!(
    create_domain_assigns_slug_and_fqdn,
    create_domain_retries_slug_collisions,
    create_domain_fails_when_slugs_exhausted,
    upsert_keeps_identity_and_refreshes,
    same_fqdn_different_types_are_distinct,
    renew_touches_only_named_pairs,
    purge_soft_deletes_domains_and_orphans_records,
    purge_deletes_stale_records,
    young_records_filters_by_age_and_pair,
    all_records_includes_orphans,
);
