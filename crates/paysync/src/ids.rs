//! Identifiers shared across every mirrored resource family.
//!
//! Three identities exist for every record:
//!
//! - [`LocalId`] - owned by this system, immutable, primary identity
//! - [`ExternalId`] - the idempotency key sent to the provider on create
//! - [`ProviderId`] - assigned by the provider once a create succeeds
//!
//! External ids are produced before the first provider call and never change
//! afterwards. A retry of the same logical request must reuse the same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Longest external id the provider accepts.
pub const MAX_EXTERNAL_ID_LEN: usize = 255;

/// Number of digest bytes kept when deriving a key from a natural key.
const NATURAL_KEY_DIGEST_BYTES: usize = 16;

/// The resource families mirrored between the local store and the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceFamily {
    Worker,
    Shift,
    Payable,
    WorkLocation,
}

impl ResourceFamily {
    pub const ALL: [ResourceFamily; 4] = [
        ResourceFamily::Worker,
        ResourceFamily::Shift,
        ResourceFamily::Payable,
        ResourceFamily::WorkLocation,
    ];

    /// Stable name used in logs, errors and storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Shift => "shift",
            Self::Payable => "payable",
            Self::WorkLocation => "work-location",
        }
    }

    const fn key_prefix(self) -> &'static str {
        match self {
            Self::Worker => "wkr",
            Self::Shift => "shf",
            Self::Payable => "pay",
            Self::WorkLocation => "loc",
        }
    }
}

impl fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceFamily {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| UnknownFamily(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource family: {0}")]
pub struct UnknownFamily(pub String);

// ============================================================================
// Local identity
// ============================================================================

/// System-owned primary identity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Idempotency key
// ============================================================================

/// Why a string was refused as an external id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidExternalId {
    #[error("external id is empty")]
    Empty,
    #[error("external id is {len} characters, limit is {MAX_EXTERNAL_ID_LEN}")]
    TooLong { len: usize },
    #[error("external id contains invalid character {ch:?}")]
    InvalidCharacter { ch: char },
}

/// Idempotency key sent to the provider on resource creation.
///
/// Printable ASCII without whitespace, at most [`MAX_EXTERNAL_ID_LEN`]
/// characters. Keys are unique per logical creation attempt:
///
/// - [`ExternalId::from_natural_key`] is deterministic, so retries that carry
///   the same natural key land on the same key
/// - [`ExternalId::generate`] is random; the caller must keep the returned
///   record's key to retry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalId(String);

impl ExternalId {
    /// Accept a caller-supplied key after validation.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidExternalId> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidExternalId::Empty);
        }
        if value.len() > MAX_EXTERNAL_ID_LEN {
            return Err(InvalidExternalId::TooLong { len: value.len() });
        }
        if let Some(ch) = value.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(InvalidExternalId::InvalidCharacter { ch });
        }
        Ok(Self(value))
    }

    /// Derive a key from a natural key such as `"W1:bonus:2024-05"`.
    ///
    /// The family is mixed into the digest so the same natural key used for a
    /// worker and a payable never collides.
    pub fn from_natural_key(family: ResourceFamily, natural_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(family.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(natural_key.as_bytes());
        let digest = hasher.finalize();
        Self(format!(
            "{}_{}",
            family.key_prefix(),
            hex::encode(&digest[..NATURAL_KEY_DIGEST_BYTES])
        ))
    }

    /// A fresh random key for requests that carry no natural key.
    pub fn generate(family: ResourceFamily) -> Self {
        Self(format!("{}_{}", family.key_prefix(), Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExternalId {
    type Error = InvalidExternalId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ExternalId> for String {
    fn from(id: ExternalId) -> Self {
        id.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the idempotency key for a new record comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Caller already holds a key (e.g. from an earlier attempt).
    Explicit(ExternalId),
    /// Deterministic derivation from a caller-supplied natural key.
    Natural(String),
    /// No natural key; a random key is generated and persisted with the draft.
    Generated,
}

impl KeySource {
    pub fn natural(key: impl Into<String>) -> Self {
        Self::Natural(key.into())
    }

    pub fn resolve(&self, family: ResourceFamily) -> ExternalId {
        match self {
            Self::Explicit(id) => id.clone(),
            Self::Natural(key) => ExternalId::from_natural_key(family, key),
            Self::Generated => ExternalId::generate(family),
        }
    }
}

// ============================================================================
// Provider identity
// ============================================================================

/// Identifier assigned by the provider on first successful create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an inbound provider event, used for delivery dedup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_keys_are_stable() {
        let a = ExternalId::from_natural_key(ResourceFamily::Payable, "W1:bonus:2024-05");
        let b = ExternalId::from_natural_key(ResourceFamily::Payable, "W1:bonus:2024-05");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("pay_"));
        assert_eq!(a.as_str().len(), 4 + NATURAL_KEY_DIGEST_BYTES * 2);
    }

    #[test]
    fn natural_keys_differ_by_input_and_family() {
        let base = ExternalId::from_natural_key(ResourceFamily::Payable, "W1:bonus:2024-05");
        let other_input = ExternalId::from_natural_key(ResourceFamily::Payable, "W1:bonus:2024-06");
        let other_family = ExternalId::from_natural_key(ResourceFamily::Shift, "W1:bonus:2024-05");
        assert_ne!(base, other_input);
        assert_ne!(base.as_str()[4..], other_family.as_str()[4..]);
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = ExternalId::generate(ResourceFamily::Worker);
        let b = ExternalId::generate(ResourceFamily::Worker);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("wkr_"));
    }

    #[test]
    fn parse_rejects_bad_keys() {
        assert_eq!(ExternalId::parse(""), Err(InvalidExternalId::Empty));
        assert_eq!(
            ExternalId::parse("has space"),
            Err(InvalidExternalId::InvalidCharacter { ch: ' ' })
        );
        assert_eq!(
            ExternalId::parse("x".repeat(256)),
            Err(InvalidExternalId::TooLong { len: 256 })
        );
        assert!(ExternalId::parse("payable-2024-05-W1").is_ok());
    }

    #[test]
    fn external_id_deserialization_validates() {
        let ok: ExternalId = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(ok.as_str(), "abc-123");
        assert!(serde_json::from_str::<ExternalId>("\"\"").is_err());
    }

    #[test]
    fn family_round_trips_through_str() {
        for family in ResourceFamily::ALL {
            assert_eq!(family.as_str().parse::<ResourceFamily>().unwrap(), family);
        }
        assert!("timesheet".parse::<ResourceFamily>().is_err());
    }
}
