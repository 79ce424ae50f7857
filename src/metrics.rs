//! Metrics instrumentation for lease-dns.
//!
//! All metrics are prefixed with `lease_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::provider::ChangeAction;

/// Record an API request.
pub fn record_request(route: &str, status: u16, duration: std::time::Duration) {
    let route = route.to_string();
    let outcome = match status {
        200..=299 => "success",
        429 => "rate_limited",
        400..=499 => "client_error",
        _ => "server_error",
    };

    counter!("lease_dns.api.request.count", "route" => route.clone(), "outcome" => outcome).increment(1);
    histogram!("lease_dns.api.request.duration.seconds", "route" => route)
        .record(duration.as_secs_f64());
}

/// Record a change batch sent to the provider.
pub fn record_provider_change(action: ChangeAction, changes: usize, result: ChangeResult) {
    let result_str = match result {
        ChangeResult::Applied => "applied",
        ChangeResult::Failed => "failed",
    };

    counter!("lease_dns.provider.batch.count", "action" => action.as_str(), "result" => result_str)
        .increment(1);
    if matches!(result, ChangeResult::Applied) {
        counter!("lease_dns.provider.change.count", "action" => action.as_str())
            .increment(changes as u64);
    }
}

/// Outcome of a provider change batch.
#[derive(Debug, Clone, Copy)]
pub enum ChangeResult {
    /// Batch applied.
    Applied,
    /// Batch rejected or provider unavailable.
    Failed,
}

/// Record a finished purge cycle.
pub fn record_purge_cycle(result: PurgeResult, duration: std::time::Duration) {
    let result_str = match result {
        PurgeResult::Success => "success",
        PurgeResult::Partial => "partial",
        PurgeResult::Error => "error",
    };

    counter!("lease_dns.purge.cycle.count", "result" => result_str).increment(1);
    histogram!("lease_dns.purge.cycle.duration.seconds").record(duration.as_secs_f64());
}

/// Purge cycle outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeResult {
    /// Every step succeeded.
    Success,
    /// Store purge failed but the provider sweep ran.
    Partial,
    /// The provider sweep failed.
    Error,
}

/// Record what one purge cycle removed.
pub fn record_purged(domains: u64, records: u64, provider_records: usize) {
    counter!("lease_dns.purge.domains.count").increment(domains);
    counter!("lease_dns.purge.records.count").increment(records);
    counter!("lease_dns.purge.provider_records.count").increment(provider_records as u64);
    gauge!("lease_dns.purge.last_provider_records").set(provider_records as f64);
}

/// Record lease creation.
pub fn record_domain_created() {
    counter!("lease_dns.domain.created.count").increment(1);
}

/// Record a renew and how many submitted records were out of sync.
pub fn record_renew(submitted: usize, out_of_sync: usize) {
    counter!("lease_dns.renew.count").increment(1);
    histogram!("lease_dns.renew.records").record(submitted as f64);
    histogram!("lease_dns.renew.out_of_sync").record(out_of_sync as f64);
}

/// Record a rejected authentication attempt.
pub fn record_auth_failure(domain_unknown: bool) {
    let reason = if domain_unknown {
        "unknown_domain"
    } else {
        "bad_token"
    };
    counter!("lease_dns.auth.failure.count", "reason" => reason).increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
