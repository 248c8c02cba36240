//! Provider ports.
//!
//! The synchronizer talks to the payroll provider only through these traits.
//! An HTTP client implements them in production; tests plug in a fake. Every
//! failure comes back as a [`ProviderError`] which the synchronizer classifies
//! (see [`SyncError::from_provider`](crate::SyncError::from_provider)).

use crate::ids::{ExternalId, ProviderId};
use crate::sync::SyncFamily;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {message}")]
    Transport { message: String, request_sent: bool },

    /// The provider answered with a success status but an unreadable body.
    #[error("unreadable provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn status(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// The request may have been applied by the provider.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Decode(_) => true,
            Self::Transport { request_sent, .. } => *request_sent,
            Self::Status { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Required by the provider to remove shifts in a finalized pay period.
    pub correction_authorized: bool,
}

/// CRUD port for one resource family.
#[async_trait]
pub trait ProviderGateway<F: SyncFamily>: Send + Sync {
    async fn create(&self, request: &F::CreateRequest) -> Result<F::Response, ProviderError>;

    async fn get(&self, provider_id: &ProviderId) -> Result<F::Response, ProviderError>;

    /// Look a resource up by the idempotency key it was created with.
    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<F::Response>, ProviderError>;

    async fn update(
        &self,
        provider_id: &ProviderId,
        request: &F::UpdateRequest,
    ) -> Result<F::Response, ProviderError>;

    async fn delete(&self, provider_id: &ProviderId, options: DeleteOptions)
        -> Result<(), ProviderError>;
}

/// Request to pay out approved payables for a set of workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub external_worker_ids: Vec<String>,
    pub include_workers_on_regular_pay_cycle: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutResponse {
    #[serde(default)]
    pub payable_payment_request_id: Option<i64>,
    #[serde(default)]
    pub payable_external_ids: Vec<String>,
}

#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn process_payables(&self, request: &PayoutRequest)
        -> Result<PayoutResponse, ProviderError>;
}
