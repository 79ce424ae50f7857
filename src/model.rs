//! Domain and record entities plus the request/response shapes of the API.
//!
//! Record values are stored denormalized: sorted and joined into one
//! canonical string (see [`canonical_values`]) so submitted content can be
//! compared for drift independent of input order.

use chrono::{DateTime, Utc};
use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::LeaseError;

/// Separator used by the canonical value string.
pub const VALUE_SEPARATOR: char = ',';

/// Record types a lease holder may manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record.
    A,
    /// IPv6 address record.
    AAAA,
    /// Canonical name record.
    CNAME,
    /// Text record.
    TXT,
}

impl RecordType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::TXT => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = LeaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "TXT" => Ok(RecordType::TXT),
            other => Err(LeaseError::Validation(format!(
                "invalid record type {other:?}"
            ))),
        }
    }
}

impl From<RecordType> for hickory_proto::rr::RecordType {
    fn from(rtype: RecordType) -> Self {
        match rtype {
            RecordType::A => hickory_proto::rr::RecordType::A,
            RecordType::AAAA => hickory_proto::rr::RecordType::AAAA,
            RecordType::CNAME => hickory_proto::rr::RecordType::CNAME,
            RecordType::TXT => hickory_proto::rr::RecordType::TXT,
        }
    }
}

impl TryFrom<hickory_proto::rr::RecordType> for RecordType {
    type Error = hickory_proto::rr::RecordType;

    fn try_from(rtype: hickory_proto::rr::RecordType) -> Result<Self, Self::Error> {
        match rtype {
            hickory_proto::rr::RecordType::A => Ok(RecordType::A),
            hickory_proto::rr::RecordType::AAAA => Ok(RecordType::AAAA),
            hickory_proto::rr::RecordType::CNAME => Ok(RecordType::CNAME),
            hickory_proto::rr::RecordType::TXT => Ok(RecordType::TXT),
            other => Err(other),
        }
    }
}

/// A leased subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Store-assigned identifier.
    pub id: i64,
    /// Random slug embedded in the fqdn.
    pub unique_slug: String,
    /// `<slug>.<root domain>`.
    pub fqdn: String,
    /// bcrypt hash of the bearer token. Never updated after creation.
    pub token_hash: String,
    /// Last renewal.
    pub last_check_in: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set when the purger reclaims the lease.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A DNS record owned (weakly) by a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Store-assigned identifier.
    pub id: i64,
    /// Fully-qualified name without trailing dot.
    pub fqdn: String,
    /// Record type.
    pub rtype: RecordType,
    /// Non-owning back-reference; `None` once the owning domain was reclaimed.
    pub domain_id: Option<i64>,
    /// Canonical value string.
    pub values: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last create or renew.
    pub last_check_in: DateTime<Utc>,
}

impl Record {
    /// Key used for uniqueness and drift detection.
    pub fn pair(&self) -> FqdnTypePair {
        FqdnTypePair::new(&self.fqdn, self.rtype)
    }

    /// Individual values expanded back out of the canonical string.
    pub fn value_list(&self) -> Vec<String> {
        if self.values.is_empty() {
            return Vec::new();
        }
        self.values
            .split(VALUE_SEPARATOR)
            .map(str::to_string)
            .collect()
    }
}

/// `(fqdn, type)` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FqdnTypePair {
    /// Fully-qualified name.
    pub fqdn: String,
    /// Record type.
    #[serde(rename = "type")]
    pub rtype: RecordType,
}

impl FqdnTypePair {
    /// Build a pair.
    pub fn new(fqdn: impl Into<String>, rtype: RecordType) -> Self {
        Self {
            fqdn: fqdn.into(),
            rtype,
        }
    }
}

impl fmt::Display for FqdnTypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fqdn, self.rtype)
    }
}

/// Sort and join values into the canonical comparable form.
pub fn canonical_values<S: AsRef<str>>(values: &[S]) -> String {
    let mut sorted: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    sorted.join(&VALUE_SEPARATOR.to_string())
}

/// Compose the fqdn of a record under a domain.
pub fn record_fqdn(name: &str, domain_fqdn: &str) -> String {
    format!("{}.{}", name.trim_end_matches('.'), domain_fqdn)
}

/// True when `name` is a strict subdomain of `domain_fqdn`.
pub fn is_under_domain(name: &str, domain_fqdn: &str) -> bool {
    name.len() > domain_fqdn.len() + 1
        && name.ends_with(domain_fqdn)
        && name.as_bytes()[name.len() - domain_fqdn.len() - 1] == b'.'
}

/// Record payload submitted by clients to create or renew records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRequest {
    /// Record name. A prefix for create, a full fqdn for renew.
    #[serde(default)]
    pub name: String,
    /// Record type as submitted.
    #[serde(rename = "type", default)]
    pub rtype: String,
    /// Record values.
    #[serde(default)]
    pub values: Vec<String>,
}

impl RecordRequest {
    /// Parse the submitted type.
    pub fn record_type(&self) -> Result<RecordType, LeaseError> {
        self.rtype.parse()
    }

    /// Validate the request and return its parsed type.
    pub fn validate(&self) -> Result<RecordType, LeaseError> {
        let rtype = self.record_type()?;

        if self.name.is_empty() {
            return Err(LeaseError::Validation(
                "record name must be provided".to_string(),
            ));
        }

        if self.values.is_empty() {
            return Err(LeaseError::Validation(
                "must supply at least one value".to_string(),
            ));
        }

        for value in &self.values {
            if value.is_empty() {
                return Err(LeaseError::Validation(
                    "record values must not be empty".to_string(),
                ));
            }
            if value.contains(VALUE_SEPARATOR) {
                return Err(LeaseError::Validation(format!(
                    "value {value:?} must not contain {VALUE_SEPARATOR:?}"
                )));
            }
        }

        match rtype {
            RecordType::A => {
                for value in &self.values {
                    if value.parse::<Ipv4Addr>().is_err() {
                        return Err(LeaseError::Validation(format!(
                            "value {value} is not a valid IPv4 address"
                        )));
                    }
                }
            }
            RecordType::AAAA => {
                for value in &self.values {
                    if value.parse::<Ipv6Addr>().is_err() {
                        return Err(LeaseError::Validation(format!(
                            "value {value} is not a valid IPv6 address"
                        )));
                    }
                }
            }
            RecordType::CNAME => {
                if self.values.len() != 1 {
                    return Err(LeaseError::Validation(format!(
                        "cname records must contain exactly one value. this contains {} values",
                        self.values.len()
                    )));
                }
            }
            RecordType::TXT => {}
        }

        Ok(rtype)
    }
}

/// Check that a composed fqdn is a syntactically valid DNS name.
pub fn validate_fqdn(fqdn: &str) -> Result<(), LeaseError> {
    Name::from_ascii(fqdn)
        .map(|_| ())
        .map_err(|e| LeaseError::Validation(format!("invalid record name {fqdn}: {e}")))
}

/// Response to domain creation and lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResponse {
    /// Domain fqdn.
    pub name: String,
    /// Plaintext token, present only in the creation response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Created record echoed back with its resolved fqdn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResponse {
    /// Submitted record.
    #[serde(flatten)]
    pub record: RecordRequest,
    /// Resolved fully-qualified name.
    pub fqdn: String,
}

/// Body of a renew request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewRequest {
    /// Records the caller believes it owns.
    #[serde(default)]
    pub records: Vec<RecordRequest>,
}

/// Renew result: records the caller must re-create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewResponse {
    /// Domain fqdn.
    pub name: String,
    /// Pairs whose stored content is missing or differs.
    #[serde(default)]
    pub out_of_sync_records: Vec<FqdnTypePair>,
}
