//! Configuration types for lease-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::LeaseError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP API configuration.
    #[serde(default)]
    pub api: ApiConfig,

    /// Lease store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// DNS provider configuration.
    pub provider: ProviderConfig,

    /// Background purge configuration.
    #[serde(default)]
    pub purge: PurgeConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn validate(&self) -> Result<(), LeaseError> {
        if self.provider.root_domain().is_empty() {
            return Err(LeaseError::Config("provider.zone must not be empty".into()));
        }

        if self.purge.interval_secs == 0 {
            return Err(LeaseError::Config("purge.interval_secs must be non-zero".into()));
        }

        if !(0.0..=1.0).contains(&self.purge.jitter) {
            return Err(LeaseError::Config(format!(
                "purge.jitter must be between 0 and 1, got {}",
                self.purge.jitter
            )));
        }

        Ok(())
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address for the HTTP API to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enforce per-route request limits.
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,

    /// Requests per interval per caller IP on unauthenticated routes.
    #[serde(default = "default_unauthed_rate_limit")]
    pub unauthed_rate_limit: u32,

    /// Requests per interval per domain on authenticated routes.
    #[serde(default = "default_authed_rate_limit")]
    pub authed_rate_limit: u32,

    /// Length of the rate limit window in seconds.
    #[serde(default = "default_rate_limit_interval")]
    pub rate_limit_interval_secs: u64,

    /// How long in-flight requests may drain after shutdown is requested.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl ApiConfig {
    /// Rate limit window.
    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_interval_secs)
    }

    /// Shutdown drain period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            rate_limit_enabled: true,
            unauthed_rate_limit: default_unauthed_rate_limit(),
            authed_rate_limit: default_authed_rate_limit(),
            rate_limit_interval_secs: default_rate_limit_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Lease store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite connection URL, or `memory` for the in-process store.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl StoreConfig {
    /// True when the in-process store is selected.
    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// DNS provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Root domain leases are issued under (e.g., "example.com").
    pub zone: String,

    /// TTL for record sets written to the provider, in seconds.
    #[serde(default = "default_record_ttl")]
    pub record_ttl: u32,

    /// Record sets per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl ProviderConfig {
    /// Provider settings for `zone` with default TTL and page size.
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            record_ttl: default_record_ttl(),
            page_size: default_page_size(),
        }
    }

    /// Zone without a trailing dot.
    pub fn root_domain(&self) -> &str {
        self.zone.trim_end_matches('.')
    }
}

/// Background purge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Seconds between purge cycles.
    #[serde(default = "default_purge_interval")]
    pub interval_secs: u64,

    /// Up to this fraction of the interval is added to each wait.
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Domains not renewed for this many seconds are reclaimed.
    #[serde(default = "default_domain_max_age")]
    pub domain_max_age_secs: u64,

    /// Records not renewed for this many seconds are deleted.
    #[serde(default = "default_record_max_age")]
    pub record_max_age_secs: u64,

    /// Provider record names ending with any of these are never deleted.
    #[serde(default)]
    pub exempt_suffixes: Vec<String>,
}

impl PurgeConfig {
    /// Interval between cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Domain max age.
    pub fn domain_max_age(&self) -> Duration {
        Duration::from_secs(self.domain_max_age_secs)
    }

    /// Record max age.
    pub fn record_max_age(&self) -> Duration {
        Duration::from_secs(self.record_max_age_secs)
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_purge_interval(),
            jitter: default_jitter(),
            domain_max_age_secs: default_domain_max_age(),
            record_max_age_secs: default_record_max_age(),
            exempt_suffixes: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "lease_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Include source file and line in log lines.
    #[serde(default)]
    pub log_caller: bool,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_caller: false,
            prometheus_addr: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4315))
}

fn default_true() -> bool {
    true
}

fn default_unauthed_rate_limit() -> u32 {
    20
}

fn default_authed_rate_limit() -> u32 {
    1000
}

fn default_rate_limit_interval() -> u64 {
    3600
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_store_url() -> String {
    "sqlite://lease-dns.sqlite?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_record_ttl() -> u32 {
    300
}

fn default_page_size() -> usize {
    100
}

fn default_purge_interval() -> u64 {
    86400
}

fn default_jitter() -> f64 {
    0.002
}

fn default_domain_max_age() -> u64 {
    2_592_000
}

fn default_record_max_age() -> u64 {
    172_800
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = load(
            r#"
            [provider]
            zone = "example.com"
            "#,
        );

        assert_eq!(config.api.listen_addr, "0.0.0.0:4315".parse().unwrap());
        assert!(config.api.rate_limit_enabled);
        assert_eq!(config.api.unauthed_rate_limit, 20);
        assert_eq!(config.api.shutdown_grace(), Duration::from_secs(5));
        assert!(!config.store.is_memory());
        assert_eq!(config.provider.record_ttl, 300);
        assert_eq!(config.purge.interval(), Duration::from_secs(86400));
        assert_eq!(config.purge.record_max_age(), Duration::from_secs(2 * 86400));
        assert_eq!(config.purge.domain_max_age(), Duration::from_secs(30 * 86400));
        assert_eq!(config.telemetry.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let config = load(
            r#"
            [store]
            url = "memory"

            [provider]
            zone = "example.com."
            page_size = 10

            [purge]
            exempt_suffixes = ["._psl.example.com"]

            [telemetry]
            log_format = "json"
            "#,
        );

        assert!(config.store.is_memory());
        assert_eq!(config.provider.root_domain(), "example.com");
        assert_eq!(config.provider.page_size, 10);
        assert_eq!(config.purge.exempt_suffixes, vec!["._psl.example.com"]);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
    }

    #[test]
    fn test_provider_zone_is_required() {
        let result: Result<Config, _> = config::Config::builder()
            .add_source(config::File::from_str("[api]\n", config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_purge_settings() {
        let valid = load("[provider]\nzone = \"example.com\"\n");
        assert!(valid.validate().is_ok());

        let mut config = valid.clone();
        config.purge.jitter = f64::NAN;
        assert!(matches!(config.validate(), Err(LeaseError::Config(_))));

        config.purge.jitter = 2.0;
        assert!(matches!(config.validate(), Err(LeaseError::Config(_))));

        let mut config = valid.clone();
        config.purge.interval_secs = 0;
        assert!(matches!(config.validate(), Err(LeaseError::Config(_))));

        let mut config = valid;
        config.provider.zone = ".".to_string();
        assert!(matches!(config.validate(), Err(LeaseError::Config(_))));
    }
}
