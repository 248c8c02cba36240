//! Error taxonomy for synchronization, lifecycle and webhook handling.
//!
//! Every provider failure is classified into one of a few kinds so callers
//! can decide what to do without inspecting messages:
//!
//! | Kind                | Typical cause                       | Safe action               |
//! |---------------------|-------------------------------------|---------------------------|
//! | `Authentication`    | bad webhook signature               | reject, never process     |
//! | `Conflict`          | key reused, illegal transition      | surface to caller         |
//! | `NotFound`          | unknown record                      | surface / retry later     |
//! | `UnknownOutcome`    | timeout after the request was sent  | reconcile, never re-key   |
//! | `TransientProvider` | 5xx, rate limiting                  | retry with the same key   |
//! | `PermanentProvider` | 4xx validation                      | fix input                 |
//! | `Validation`        | local precondition failed           | fix input                 |
//! | `Store`             | persistence failure                 | retry                     |

use crate::gateway::ProviderError;
use crate::ids::ResourceFamily;
use crate::lifecycle::TransitionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Conflict,
    NotFound,
    UnknownOutcome,
    TransientProvider,
    PermanentProvider,
    Validation,
    Store,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::UnknownOutcome => "unknown_outcome",
            Self::TransientProvider => "transient_provider",
            Self::PermanentProvider => "permanent_provider",
            Self::Validation => "validation",
            Self::Store => "store",
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("webhook authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("{family} {key}: {message}")]
    Conflict {
        family: ResourceFamily,
        key: String,
        message: String,
    },

    #[error("{family} {key}: {source}")]
    IllegalTransition {
        family: ResourceFamily,
        key: String,
        #[source]
        source: TransitionError,
    },

    #[error("{family} {key} not found")]
    NotFound { family: ResourceFamily, key: String },

    #[error("outcome of {operation} for {family} {key} is unknown: {message}")]
    UnknownOutcome {
        family: ResourceFamily,
        key: String,
        operation: &'static str,
        message: String,
    },

    #[error("provider failed {operation} for {family} {key}, retry with the same key: {source}")]
    TransientProvider {
        family: ResourceFamily,
        key: String,
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("provider rejected {operation} for {family} {key}: {source}")]
    PermanentProvider {
        family: ResourceFamily,
        key: String,
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Conflict { .. } | Self::IllegalTransition { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UnknownOutcome { .. } => ErrorKind::UnknownOutcome,
            Self::TransientProvider { .. } => ErrorKind::TransientProvider,
            Self::PermanentProvider { .. } => ErrorKind::PermanentProvider,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether repeating the same call (same idempotency key) may succeed.
    ///
    /// `UnknownOutcome` is excluded: the caller must reconcile
    /// first, the resource may already exist.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientProvider | ErrorKind::Store
        )
    }

    /// HTTP status an outer surface should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Authentication { .. } => 401,
            Self::Conflict { .. } | Self::IllegalTransition { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::UnknownOutcome { .. } => 504,
            Self::TransientProvider { .. } => 502,
            Self::PermanentProvider { source, .. } => match source.status_code() {
                Some(status) if (400..500).contains(&status) => 422,
                _ => 502,
            },
            Self::Validation { .. } => 400,
            Self::Store(_) => 500,
        }
    }

    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    pub fn conflict(family: ResourceFamily, key: impl ToString, message: impl Into<String>) -> Self {
        Self::Conflict {
            family,
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(family: ResourceFamily, key: impl ToString) -> Self {
        Self::NotFound {
            family,
            key: key.to_string(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn transition(family: ResourceFamily, key: impl ToString, source: TransitionError) -> Self {
        Self::IllegalTransition {
            family,
            key: key.to_string(),
            source,
        }
    }

    /// Classify a provider failure observed while running `operation`.
    pub fn from_provider(
        family: ResourceFamily,
        key: impl ToString,
        operation: &'static str,
        err: ProviderError,
    ) -> Self {
        let key = key.to_string();
        if err.outcome_unknown() {
            return Self::UnknownOutcome {
                family,
                key,
                operation,
                message: err.to_string(),
            };
        }
        match err.status_code() {
            Some(404) => Self::NotFound { family, key },
            Some(409) => Self::Conflict {
                family,
                key,
                message: err.to_string(),
            },
            Some(status) if status == 429 || status >= 500 => Self::TransientProvider {
                family,
                key,
                operation,
                source: err,
            },
            // Connection refused and similar: the request never left.
            None => Self::TransientProvider {
                family,
                key,
                operation,
                source: err,
            },
            Some(_) => Self::PermanentProvider {
                family,
                key,
                operation,
                source: err,
            },
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(anyhow::Error::new(err).context("failed to serialize record"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn classify(err: ProviderError) -> ErrorKind {
        SyncError::from_provider(ResourceFamily::Payable, "pay_1", "create", err).kind()
    }

    #[test]
    fn provider_statuses_map_to_kinds() {
        assert_eq!(
            classify(ProviderError::status(503, None, "unavailable")),
            ErrorKind::TransientProvider
        );
        assert_eq!(
            classify(ProviderError::status(429, None, "slow down")),
            ErrorKind::TransientProvider
        );
        assert_eq!(
            classify(ProviderError::status(422, Some("INVALID".into()), "bad amount")),
            ErrorKind::PermanentProvider
        );
        assert_eq!(
            classify(ProviderError::status(409, None, "exists")),
            ErrorKind::Conflict
        );
        assert_eq!(
            classify(ProviderError::status(404, None, "missing")),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn timeouts_are_unknown_outcomes() {
        let err = SyncError::from_provider(
            ResourceFamily::Shift,
            "shf_1",
            "create",
            ProviderError::Timeout(Duration::from_secs(30)),
        );
        assert_eq!(err.kind(), ErrorKind::UnknownOutcome);
        assert!(!err.is_retryable());
        assert_eq!(err.http_status(), 504);
    }

    #[test]
    fn unsent_requests_are_transient() {
        let err = ProviderError::Transport {
            message: "connection refused".into(),
            request_sent: false,
        };
        assert_eq!(classify(err), ErrorKind::TransientProvider);
    }

    #[test]
    fn transitions_are_conflicts() {
        let err = SyncError::transition(
            ResourceFamily::Payable,
            "pay_1",
            TransitionError::new("paid", "edit", "paid payables are immutable"),
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.http_status(), 409);
        assert!(err.to_string().contains("paid payables are immutable"));
    }
}
