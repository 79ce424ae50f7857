//! Error types for lease-dns.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::store::StoreError;

/// Errors surfaced by the domain/record service and the server.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Malformed record type, value or missing field. No state was changed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or invalid bearer token.
    ///
    /// `domain_unknown` tells the caller the domain itself does not exist, so a
    /// stale token can be dropped instead of retried.
    #[error("forbidden to use")]
    Forbidden {
        /// True when the requested domain is not a live lease.
        domain_unknown: bool,
    },

    /// Domain or record absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// External DNS provider failure.
    #[error("DNS provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Lease store failure.
    #[error("lease store error: {0}")]
    Persistence(#[from] StoreError),

    /// Token hashing or verification failure.
    #[error("token hash error: {0}")]
    TokenHash(#[from] bcrypt::BcryptError),

    /// Blocking task failed to complete.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LeaseError {
    /// True for errors caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LeaseError::Validation(_) | LeaseError::Forbidden { .. } | LeaseError::NotFound(_)
        )
    }
}
