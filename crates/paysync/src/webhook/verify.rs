//! Webhook signature verification.
//!
//! The provider signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends
//! the hex digest as `v1=<hex>` in the signature header. Several `v1` entries
//! may be present while the signing key is being rotated; any match is
//! accepted. The digest is always computed over the raw bytes received.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use smallvec::SmallVec;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-everee-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-everee-webhook-timestamp";

const SCHEME: &str = "v1";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("no webhook signing key is configured")]
    MissingSigningKey,

    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("signature header carries no v1 signatures")]
    NoSignatures,

    #[error("no signature matches the request body")]
    Mismatch,

    #[error("timestamp {0:?} is not unix seconds")]
    InvalidTimestamp(String),

    #[error("timestamp is {age_secs}s away from now, tolerance is {tolerance_secs}s")]
    Stale { age_secs: i64, tolerance_secs: i64 },
}

/// Checks webhook signatures against the configured signing key.
#[derive(Clone, Default)]
pub struct WebhookVerifier {
    key: Option<Vec<u8>>,
}

impl fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl WebhookVerifier {
    /// A verifier without a key rejects every request.
    pub fn new(signing_key: Option<impl Into<Vec<u8>>>) -> Self {
        Self {
            key: signing_key.map(Into::into).filter(|key| !key.is_empty()),
        }
    }

    pub fn with_key(signing_key: impl Into<Vec<u8>>) -> Self {
        Self::new(Some(signing_key))
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Verify `raw_body` against the signature and timestamp headers.
    pub fn verify(
        &self,
        signature_header: Option<&str>,
        timestamp: Option<&str>,
        raw_body: &[u8],
    ) -> Result<(), VerifyError> {
        let key = self.key.as_deref().ok_or(VerifyError::MissingSigningKey)?;
        let header = signature_header.ok_or(VerifyError::MissingHeader(SIGNATURE_HEADER))?;
        let timestamp = timestamp.ok_or(VerifyError::MissingHeader(TIMESTAMP_HEADER))?;

        let candidates = parse_signatures(header);
        if candidates.is_empty() {
            return Err(VerifyError::NoSignatures);
        }

        let expected = digest(key, timestamp, raw_body).ok_or(VerifyError::MissingSigningKey)?;
        let matched = candidates
            .iter()
            .filter_map(|candidate| hex::decode(candidate).ok())
            .fold(subtle::Choice::from(0), |acc, candidate| {
                acc | expected.as_slice().ct_eq(candidate.as_slice())
            });
        if bool::from(matched) {
            Ok(())
        } else {
            Err(VerifyError::Mismatch)
        }
    }

    /// Signature header value for `raw_body`; `None` without a key.
    pub fn sign(&self, timestamp: &str, raw_body: &[u8]) -> Option<String> {
        let key = self.key.as_deref()?;
        digest(key, timestamp, raw_body).map(|bytes| format!("{SCHEME}={}", hex::encode(bytes)))
    }
}

fn digest(key: &[u8], timestamp: &str, raw_body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// The `v1` values of a signature header. Other schemes are skipped.
fn parse_signatures(header: &str) -> SmallVec<[&str; 2]> {
    header
        .split(',')
        .filter_map(|entry| {
            let (scheme, value) = entry.trim().split_once('=')?;
            (scheme == SCHEME && !value.is_empty()).then_some(value)
        })
        .collect()
}

/// Reject timestamps further than `tolerance` from `now` in either direction.
pub fn check_freshness(
    timestamp: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), VerifyError> {
    let seconds: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| VerifyError::InvalidTimestamp(timestamp.to_string()))?;
    let age_secs = (now.timestamp() - seconds).abs();
    if age_secs > tolerance.num_seconds() {
        return Err(VerifyError::Stale {
            age_secs,
            tolerance_secs: tolerance.num_seconds(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"worker.created"}"#;
    const TS: &str = "1714953600";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::with_key("whsec_test")
    }

    #[test]
    fn accepts_own_signature() {
        let header = verifier().sign(TS, BODY).unwrap();
        assert!(header.starts_with("v1="));
        assert_eq!(verifier().verify(Some(&header), Some(TS), BODY), Ok(()));
    }

    #[test]
    fn accepts_any_matching_entry() {
        let good = verifier().sign(TS, BODY).unwrap();
        let header = format!("v0=abc, v1=deadbeef, {good}");
        assert_eq!(verifier().verify(Some(&header), Some(TS), BODY), Ok(()));
    }

    #[test]
    fn signature_covers_the_timestamp() {
        let header = verifier().sign(TS, BODY).unwrap();
        assert_eq!(
            verifier().verify(Some(&header), Some("1714953601"), BODY),
            Err(VerifyError::Mismatch)
        );
    }

    #[test]
    fn unknown_schemes_only_means_no_signatures() {
        assert_eq!(
            verifier().verify(Some("v0=abcd,t=1"), Some(TS), BODY),
            Err(VerifyError::NoSignatures)
        );
        assert_eq!(
            verifier().verify(Some(""), Some(TS), BODY),
            Err(VerifyError::NoSignatures)
        );
    }

    #[test]
    fn missing_key_rejects_everything() {
        let header = verifier().sign(TS, BODY).unwrap();
        let unconfigured = WebhookVerifier::new(None::<Vec<u8>>);
        assert!(!unconfigured.is_configured());
        assert_eq!(
            unconfigured.verify(Some(&header), Some(TS), BODY),
            Err(VerifyError::MissingSigningKey)
        );
        assert_eq!(unconfigured.sign(TS, BODY), None);
        assert!(!WebhookVerifier::new(Some("")).is_configured());
    }

    #[test]
    fn missing_headers_are_named() {
        assert_eq!(
            verifier().verify(None, Some(TS), BODY),
            Err(VerifyError::MissingHeader(SIGNATURE_HEADER))
        );
        assert_eq!(
            verifier().verify(Some("v1=00"), None, BODY),
            Err(VerifyError::MissingHeader(TIMESTAMP_HEADER))
        );
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", verifier());
        assert!(!rendered.contains("whsec_test"));
    }

    #[test]
    fn freshness_window() {
        let now = DateTime::from_timestamp(1_714_953_600, 0).unwrap();
        let tolerance = Duration::minutes(5);
        assert!(check_freshness("1714953600", now, tolerance).is_ok());
        assert!(check_freshness("1714953400", now, tolerance).is_ok());
        assert!(matches!(
            check_freshness("1714950000", now, tolerance),
            Err(VerifyError::Stale { .. })
        ));
        assert!(matches!(
            check_freshness("yesterday", now, tolerance),
            Err(VerifyError::InvalidTimestamp(_))
        ));
    }
}
