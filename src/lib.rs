//! Lease DNS - a dynamic DNS control plane.
//!
//! Clients lease short-lived, token-protected subdomains of a shared root
//! domain, publish A/AAAA/CNAME/TXT records under them, and keep them alive by
//! renewing. Records are mirrored into an authoritative DNS provider; leases
//! and records that stop being renewed are reclaimed by a background purger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           lease-dns                             │
//! │                                                                 │
//! │   HTTP :4315      ┌──────────────────┐                          │
//! │  ────────────────▶│   API (axum)     │ auth, rate limits        │
//! │                   └────────┬─────────┘                          │
//! │                            ▼                                    │
//! │                   ┌──────────────────┐                          │
//! │                   │  LeaseService    │                          │
//! │                   └───┬──────────┬───┘                          │
//! │                       │          │                              │
//! │            ┌──────────▼───┐  ┌───▼──────────┐                   │
//! │            │  LeaseStore  │  │ DnsProvider  │                   │
//! │            │ (SQLite/mem) │  │  (zone)      │                   │
//! │            └──────────▲───┘  └───▲──────────┘                   │
//! │                       │          │                              │
//! │                   ┌───┴──────────┴───┐                          │
//! │                   │     Purger       │ every interval + jitter  │
//! │                   └──────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lease names
//!
//! ```text
//! POST /v1/domains          → k3x9q2.example.com + token
//! POST .../records {www, A} → www.k3x9q2.example.com A
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use lease_dns::{Config, LeaseServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = config::Config::builder()
//!         .add_source(config::File::with_name("lease-dns.toml"))
//!         .build()
//!         .unwrap()
//!         .try_deserialize()
//!         .unwrap();
//!
//!     let cancel = CancellationToken::new();
//!     let server = LeaseServer::new(config).await.unwrap();
//!     server.run(cancel).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod provider;
pub mod purger;
pub mod server;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod token;

// Re-export main types
pub use config::{ApiConfig, Config, ProviderConfig, PurgeConfig, StoreConfig, TelemetryConfig};
pub use error::LeaseError;
pub use provider::{DnsProvider, MemoryProvider};
pub use purger::{PurgeReport, Purger};
pub use server::LeaseServer;
pub use service::LeaseService;
pub use store::{LeaseStore, MemoryLeaseStore, SqliteLeaseStore};
