//! SQLite lease store backed by sqlx.
//!
//! Timestamps are stored as UTC milliseconds so range predicates compare
//! integers rather than formatted strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{LeaseStore, PurgeCounts, Result, SlugSource, StoreError, MAX_SLUG_ATTEMPTS};
use crate::model::{canonical_values, Domain, FqdnTypePair, Record, RecordType};

const DOMAIN_COLUMNS: &str =
    "id, unique_slug, fqdn, token_hash, last_check_in, created_at, deleted_at";
const RECORD_COLUMNS: &str = "id, fqdn, type, domain_id, record_values, created_at, last_check_in";

/// Lease store persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {ms}")))
}

fn domain_from_row(row: &SqliteRow) -> Result<Domain> {
    let deleted_at: Option<i64> = row.try_get("deleted_at")?;
    Ok(Domain {
        id: row.try_get("id")?,
        unique_slug: row.try_get("unique_slug")?,
        fqdn: row.try_get("fqdn")?,
        token_hash: row.try_get("token_hash")?,
        last_check_in: from_millis(row.try_get("last_check_in")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        deleted_at: deleted_at.map(from_millis).transpose()?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<Record> {
    let rtype: String = row.try_get("type")?;
    let rtype = RecordType::from_str(&rtype)
        .map_err(|_| StoreError::InvalidData(format!("unknown record type {rtype:?}")))?;
    Ok(Record {
        id: row.try_get("id")?,
        fqdn: row.try_get("fqdn")?,
        rtype,
        domain_id: row.try_get("domain_id")?,
        values: row.try_get("record_values")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        last_check_in: from_millis(row.try_get("last_check_in")?)?,
    })
}

impl SqliteLeaseStore {
    /// Connect to `url` and make sure the schema exists.
    ///
    /// In-memory databases (`sqlite::memory:`) are private to a connection,
    /// so they are always opened with a single pooled connection.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!(url, max_connections, "lease store ready");
        Ok(store)
    }

    /// Wrap an existing pool. The schema is created if missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unique_slug TEXT NOT NULL UNIQUE,
                fqdn TEXT NOT NULL UNIQUE,
                token_hash TEXT NOT NULL,
                last_check_in INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // domain_id is a plain nullable column: reclaiming a domain nulls it
        // explicitly and never cascades.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fqdn TEXT NOT NULL,
                type TEXT NOT NULL,
                domain_id INTEGER,
                record_values TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_check_in INTEGER NOT NULL,
                UNIQUE (fqdn, type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_domain ON records(domain_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_check_in ON records(last_check_in)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_domains_check_in ON domains(last_check_in)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn create_domain(
        &self,
        token_hash: &str,
        root_domain: &str,
        slugs: &SlugSource,
        now: DateTime<Utc>,
    ) -> Result<Domain> {
        let mut tx = self.pool.begin().await?;

        let mut slug = None;
        for _ in 0..MAX_SLUG_ATTEMPTS {
            let candidate = slugs();
            let taken = sqlx::query("SELECT 1 FROM domains WHERE unique_slug = ?")
                .bind(&candidate)
                .fetch_optional(&mut *tx)
                .await;
            match taken {
                Ok(None) => {
                    slug = Some(candidate);
                    break;
                }
                Ok(Some(_)) => {}
                Err(e) => warn!(error = %e, "error while finding unique slug"),
            }
        }
        let slug = slug.ok_or(StoreError::SlugExhausted(MAX_SLUG_ATTEMPTS))?;
        let fqdn = format!("{}.{}", slug, root_domain);

        let row = sqlx::query(&format!(
            "INSERT INTO domains (unique_slug, fqdn, token_hash, last_check_in, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(&slug)
        .bind(&fqdn)
        .bind(token_hash)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .fetch_one(&mut *tx)
        .await?;
        let domain = domain_from_row(&row)?;

        tx.commit().await?;
        debug!(domain_id = domain.id, fqdn = %domain.fqdn, "created domain");
        Ok(domain)
    }

    async fn get_domain(&self, fqdn: &str) -> Result<Option<Domain>> {
        let row = sqlx::query(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE fqdn = ? AND deleted_at IS NULL LIMIT 1"
        ))
        .bind(fqdn)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(domain_from_row).transpose()
    }

    async fn upsert_record(
        &self,
        domain_id: i64,
        fqdn: &str,
        rtype: RecordType,
        values: &[String],
        now: DateTime<Utc>,
    ) -> Result<Record> {
        let canonical = canonical_values(values);

        // ON CONFLICT keeps the original row id and created_at.
        let row = sqlx::query(&format!(
            "INSERT INTO records (fqdn, type, domain_id, record_values, created_at, last_check_in) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (fqdn, type) DO UPDATE SET \
                 domain_id = excluded.domain_id, \
                 record_values = excluded.record_values, \
                 last_check_in = excluded.last_check_in \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(fqdn)
        .bind(rtype.as_str())
        .bind(domain_id)
        .bind(&canonical)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await?;

        record_from_row(&row)
    }

    async fn renew(
        &self,
        domain_id: i64,
        pairs: &[FqdnTypePair],
        now: DateTime<Utc>,
    ) -> Result<()> {
        // One UPDATE per type: `... WHERE type = 'A' AND fqdn IN (...)`
        let mut fqdns_by_type: BTreeMap<RecordType, Vec<&str>> = BTreeMap::new();
        for pair in pairs {
            fqdns_by_type
                .entry(pair.rtype)
                .or_default()
                .push(pair.fqdn.as_str());
        }

        let mut tx = self.pool.begin().await?;

        for (rtype, fqdns) in fqdns_by_type {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE records SET last_check_in = ");
            query.push_bind(to_millis(now));
            query.push(" WHERE type = ");
            query.push_bind(rtype.as_str());
            query.push(" AND domain_id = ");
            query.push_bind(domain_id);
            query.push(" AND fqdn IN (");
            let mut separated = query.separated(", ");
            for fqdn in fqdns {
                separated.push_bind(fqdn);
            }
            separated.push_unseparated(")");
            query.build().execute(&mut *tx).await?;
        }

        sqlx::query("UPDATE domains SET last_check_in = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(to_millis(now))
            .bind(domain_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn domain_records(&self, domain_id: i64) -> Result<HashMap<FqdnTypePair, Record>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE domain_id = ?"
        ))
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| record_from_row(row).map(|r| (r.pair(), r)))
            .collect()
    }

    async fn all_records(&self) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn domain_records_by_fqdn(&self, fqdn: &str, domain_id: i64) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE fqdn = ? AND domain_id = ?"
        ))
        .bind(fqdn)
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn delete_records(&self, records: &[Record]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM records WHERE id IN (");
        let mut separated = query.separated(", ");
        for record in records {
            separated.push_bind(record.id);
        }
        separated.push_unseparated(")");

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn purge_stale(
        &self,
        domain_cutoff: DateTime<Utc>,
        record_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<PurgeCounts> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE records SET domain_id = NULL WHERE domain_id IN \
             (SELECT id FROM domains WHERE deleted_at IS NULL AND last_check_in < ?)",
        )
        .bind(to_millis(domain_cutoff))
        .execute(&mut *tx)
        .await?;

        // Domain rows stay behind so their slugs are never issued again.
        let domains = sqlx::query(
            "UPDATE domains SET deleted_at = ? WHERE deleted_at IS NULL AND last_check_in < ?",
        )
        .bind(to_millis(now))
        .bind(to_millis(domain_cutoff))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let records = sqlx::query("DELETE FROM records WHERE last_check_in < ?")
            .bind(to_millis(record_cutoff))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(PurgeCounts { domains, records })
    }

    async fn young_records(
        &self,
        cutoff: DateTime<Utc>,
        pairs: &HashSet<FqdnTypePair>,
    ) -> Result<HashSet<FqdnTypePair>> {
        if pairs.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM records WHERE last_check_in >= "));
        query.push_bind(to_millis(cutoff));
        query.push(" AND fqdn IN (");
        let mut separated = query.separated(", ");
        let fqdns: HashSet<&str> = pairs.iter().map(|p| p.fqdn.as_str()).collect();
        for fqdn in fqdns {
            separated.push_bind(fqdn);
        }
        separated.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut young = HashSet::new();
        for row in &rows {
            let pair = record_from_row(row)?.pair();
            if pairs.contains(&pair) {
                young.insert(pair);
            }
        }
        Ok(young)
    }
}
