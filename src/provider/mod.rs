//! DNS provider gateway.
//!
//! The external authoritative DNS service is reached through [`DnsProvider`]:
//! atomic change batches for writes and a paginated listing for reads.
//! [`MemoryProvider`] implements the same contract in-process.

mod memory;

pub use memory::MemoryProvider;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use hickory_proto::rr::RecordType as WireType;
use thiserror::Error;

use crate::model::RecordType;

/// Errors from provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the change batch. Nothing was applied.
    #[error("change batch rejected: {0}")]
    Rejected(String),

    /// The provider could not be reached or failed internally.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The change batch itself is malformed.
    #[error("invalid change: {0}")]
    InvalidChange(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// One named, typed set of values as the provider sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    /// Absolute name, with trailing dot.
    pub name: String,
    /// Record type. Listings may contain types the lease API never writes.
    pub rtype: WireType,
    /// Time to live in seconds.
    pub ttl: u32,
    /// Values in provider form (TXT values quoted).
    pub values: Vec<String>,
}

impl RecordSet {
    /// Build the provider-side record set for a lease record.
    pub fn for_record(fqdn: &str, rtype: RecordType, values: &[String], ttl: u32) -> Self {
        Self {
            name: absolute_name(fqdn),
            rtype: rtype.into(),
            ttl,
            values: values.iter().map(|v| provider_value(rtype, v)).collect(),
        }
    }

    /// Name without the trailing dot.
    pub fn relative_name(&self) -> &str {
        self.name.strip_suffix('.').unwrap_or(&self.name)
    }
}

/// Kind of change in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// Create or replace the record set.
    Upsert,
    /// Remove the record set. Values must match the provider's exactly.
    Delete,
}

impl ChangeAction {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Upsert => "upsert",
            ChangeAction::Delete => "delete",
        }
    }
}

/// A single change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Upsert or delete.
    pub action: ChangeAction,
    /// Target record set.
    pub record_set: RecordSet,
}

/// Changes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Ordered changes.
    pub changes: Vec<Change>,
}

impl ChangeBatch {
    /// Batch of upserts.
    pub fn upserts(sets: impl IntoIterator<Item = RecordSet>) -> Self {
        Self::with_action(ChangeAction::Upsert, sets)
    }

    /// Batch of deletes.
    pub fn deletes(sets: impl IntoIterator<Item = RecordSet>) -> Self {
        Self::with_action(ChangeAction::Delete, sets)
    }

    fn with_action(action: ChangeAction, sets: impl IntoIterator<Item = RecordSet>) -> Self {
        Self {
            changes: sets
                .into_iter()
                .map(|record_set| Change { action, record_set })
                .collect(),
        }
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True when the batch carries no change.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// One page of a zone listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSetPage {
    /// Record sets on this page.
    pub record_sets: Vec<RecordSet>,
    /// Cursor of the next page, `None` on the last one.
    pub next: Option<String>,
}

/// External authoritative DNS service.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Apply a change batch atomically.
    async fn apply(&self, batch: ChangeBatch) -> Result<()>;

    /// Fetch one page of the zone listing starting at `cursor`.
    async fn list_page(&self, cursor: Option<String>) -> Result<RecordSetPage>;

    /// Create or replace one record set. Idempotent.
    async fn upsert(
        &self,
        fqdn: &str,
        rtype: RecordType,
        values: &[String],
        ttl: u32,
    ) -> Result<()> {
        let set = RecordSet::for_record(fqdn, rtype, values, ttl);
        self.apply(ChangeBatch::upserts([set])).await
    }

    /// Delete record sets in one batch. An empty list is a no-op.
    async fn delete(&self, sets: Vec<RecordSet>) -> Result<()> {
        if sets.is_empty() {
            return Ok(());
        }
        self.apply(ChangeBatch::deletes(sets)).await
    }
}

/// Lazily page through the whole zone.
///
/// Each call starts a fresh listing from the first page.
pub fn list_all(provider: &dyn DnsProvider) -> impl Stream<Item = Result<Vec<RecordSet>>> + Send + '_ {
    stream::try_unfold(Some(None::<String>), move |cursor| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, ProviderError>(None);
        };
        let page = provider.list_page(cursor).await?;
        Ok(Some((page.record_sets, page.next.map(Some))))
    })
}

/// Append the root dot if missing.
pub fn absolute_name(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Value as sent to the provider: TXT values are wrapped in double quotes
/// unless already quoted.
pub fn provider_value(rtype: RecordType, value: &str) -> String {
    if rtype == RecordType::TXT && !value.starts_with('"') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}
