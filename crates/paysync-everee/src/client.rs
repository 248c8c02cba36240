//! HTTP gateway to the Everee API.
//!
//! Everee splits its API over two hosts:
//!
//! ```text
//!  core         /onboarding/{contractor,employee}   POST
//!               /workers/{id}                        GET PATCH DELETE
//!               /workers?externalWorkerId=           GET
//!               /workers/{id}/terminate              POST
//!               /payables[/{externalId}]             POST GET PUT DELETE
//!               /payables/payment-request            POST
//!
//!  integration  /labor/timesheet/worked-shifts[/{id}] POST GET PUT DELETE
//!               /work-locations[/{id}]               POST GET DELETE
//! ```
//!
//! Every call carries `Authorization: Basic base64(token)` and the tenant
//! header. Failures are mapped onto [`ProviderError`] so the synchronizer can
//! tell a rejected request from one whose outcome is unknown.

use crate::config::{ConfigError, EvereeConfig};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use paysync_core::gateway::{DeleteOptions, PayoutGateway, PayoutRequest, PayoutResponse};
use paysync_core::payable::{CreatePayableRequest, PayableFields, PayableResponse, UpdatePayableRequest};
use paysync_core::shift::{CreateShiftRequest, ShiftFields, ShiftResponse, UpdateShiftRequest};
use paysync_core::work_location::{CreateWorkLocationRequest, WorkLocationFields, WorkLocationResponse};
use paysync_core::worker::{
    CreateWorkerRequest, UpdateWorkerRequest, WorkerClassification, WorkerFields, WorkerResponse,
};
use paysync_core::{ExternalId, ProviderError, ProviderGateway, ProviderId};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const TENANT_HEADER: &str = "x-everee-tenant-id";
const SHIFTS: &str = "/labor/timesheet/worked-shifts";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy)]
enum Api {
    Core,
    Integration,
}

#[derive(Clone)]
pub struct EvereeClient {
    http: Client,
    authorization: String,
    tenant_id: String,
    core_base_url: String,
    integration_base_url: String,
    timeout: Duration,
}

impl EvereeClient {
    pub fn new(config: &EvereeConfig) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                name: "http client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            authorization: basic_auth(&config.api_token),
            tenant_id: config.tenant_id.clone(),
            core_base_url: config.core_base_url.clone(),
            integration_base_url: config.integration_base_url.clone(),
            timeout: config.timeout,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(&EvereeConfig::from_env()?)
    }

    fn request(&self, method: Method, api: Api, path: &str) -> RequestBuilder {
        let base = match api {
            Api::Core => &self.core_base_url,
            Api::Integration => &self.integration_base_url,
        };
        self.http
            .request(method, format!("{base}{path}"))
            .header(AUTHORIZATION, &self.authorization)
            .header(TENANT_HEADER, &self.tenant_id)
            .header(ACCEPT, "application/json")
    }

    /// Send a request and return the raw body of a 2xx response.
    async fn send(&self, builder: RequestBuilder) -> Result<String, ProviderError> {
        let request = builder.build().map_err(|e| ProviderError::Transport {
            message: e.to_string(),
            request_sent: false,
        })?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        debug!(%method, %path, "everee request");
        let started = Instant::now();

        let result = match self.http.execute(request).await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) if (200..300).contains(&status) => Ok(body),
                    Ok(body) => Err(status_error(status, &body)),
                    Err(e) => Err(self.classify(e)),
                }
            }
            Err(e) => Err(self.classify(e)),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(%method, %path, duration_ms, "everee request succeeded"),
            Err(error) => warn!(
                %method,
                %path,
                duration_ms,
                status = error.status_code(),
                error = %error,
                "everee request failed"
            ),
        }
        result
    }

    fn classify(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else if error.is_decode() {
            ProviderError::Decode(error.to_string())
        } else {
            ProviderError::Transport {
                message: error.to_string(),
                request_sent: !(error.is_connect() || error.is_builder()),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, api: Api, path: &str) -> Result<T, ProviderError> {
        let body = self.send(self.request(Method::GET, api, path)).await?;
        decode(&body)
    }

    async fn send_json<T, B>(
        &self,
        method: Method,
        api: Api,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let builder = self.request(method, api, path).query(query).json(body);
        decode(&self.send(builder).await?)
    }

    async fn delete_at(&self, api: Api, path: &str, query: &[(&str, &str)]) -> Result<(), ProviderError> {
        self.send(self.request(Method::DELETE, api, path).query(query))
            .await
            .map(|_| ())
    }
}

fn basic_auth(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(token))
}

fn correction_query(authorized: bool) -> &'static [(&'static str, &'static str)] {
    if authorized {
        &[("correction-authorized", "true")]
    } else {
        &[]
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))
}

fn not_found_as_none<T>(result: Result<T, ProviderError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Map a non-2xx response onto [`ProviderError::Status`].
///
/// Everee reports `{errorCode, errorMessage, path}`; anything else keeps the
/// raw body (truncated) as the message.
fn status_error(status: u16, body: &str) -> ProviderError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.error_message.unwrap_or_else(|| {
        let raw = body.trim();
        if raw.is_empty() {
            format!("HTTP {status}")
        } else {
            raw.chars().take(500).collect()
        }
    });
    ProviderError::status(status, parsed.error_code, message)
}

// ============================================================================
// Workers
// ============================================================================

#[async_trait]
impl ProviderGateway<WorkerFields> for EvereeClient {
    async fn create(&self, request: &CreateWorkerRequest) -> Result<WorkerResponse, ProviderError> {
        let path = match request.classification {
            WorkerClassification::Contractor => "/onboarding/contractor",
            WorkerClassification::Employee => "/onboarding/employee",
        };
        self.send_json(Method::POST, Api::Core, path, &[], request).await
    }

    async fn get(&self, provider_id: &ProviderId) -> Result<WorkerResponse, ProviderError> {
        self.get_json(Api::Core, &format!("/workers/{provider_id}")).await
    }

    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<WorkerResponse>, ProviderError> {
        let builder = self
            .request(Method::GET, Api::Core, "/workers")
            .query(&[("externalWorkerId", external_id.as_str())]);
        not_found_as_none(self.send(builder).await.and_then(|body| decode(&body)))
    }

    async fn update(
        &self,
        provider_id: &ProviderId,
        request: &UpdateWorkerRequest,
    ) -> Result<WorkerResponse, ProviderError> {
        match request {
            UpdateWorkerRequest::Profile(profile) => {
                let path = format!("/workers/{provider_id}");
                self.send_json(Method::PATCH, Api::Core, &path, &[], profile).await
            }
            UpdateWorkerRequest::Terminate(terminate) => {
                // The terminate endpoint does not echo the worker.
                let path = format!("/workers/{provider_id}/terminate");
                let builder = self.request(Method::POST, Api::Core, &path).json(terminate);
                self.send(builder).await?;
                ProviderGateway::<WorkerFields>::get(self, provider_id).await
            }
        }
    }

    async fn delete(&self, provider_id: &ProviderId, _options: DeleteOptions) -> Result<(), ProviderError> {
        self.delete_at(Api::Core, &format!("/workers/{provider_id}"), &[]).await
    }
}

// ============================================================================
// Work locations
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkLocationPage {
    #[serde(default)]
    page_number: u32,
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    items: Vec<WorkLocationResponse>,
}

#[async_trait]
impl ProviderGateway<WorkLocationFields> for EvereeClient {
    async fn create(
        &self,
        request: &CreateWorkLocationRequest,
    ) -> Result<WorkLocationResponse, ProviderError> {
        self.send_json(Method::POST, Api::Integration, "/work-locations", &[], request)
            .await
    }

    async fn get(&self, provider_id: &ProviderId) -> Result<WorkLocationResponse, ProviderError> {
        self.get_json(Api::Integration, &format!("/work-locations/{provider_id}"))
            .await
    }

    /// Everee has no lookup by external id for locations, so page through
    /// the tenant's list.
    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<WorkLocationResponse>, ProviderError> {
        let size = PAGE_SIZE.to_string();
        let mut page = 0u32;
        loop {
            let number = page.to_string();
            let builder = self
                .request(Method::GET, Api::Integration, "/work-locations")
                .query(&[("page", number.as_str()), ("size", size.as_str())]);
            let listing: WorkLocationPage = decode(&self.send(builder).await?)?;

            if let Some(found) = listing
                .items
                .iter()
                .find(|l| l.external_id.as_deref() == Some(external_id.as_str()))
            {
                return Ok(Some(found.clone()));
            }
            if listing.items.is_empty() || listing.page_number + 1 >= listing.total_pages {
                return Ok(None);
            }
            page += 1;
        }
    }

    /// Locations are immutable at the provider; return the current state.
    async fn update(
        &self,
        provider_id: &ProviderId,
        _request: &(),
    ) -> Result<WorkLocationResponse, ProviderError> {
        ProviderGateway::<WorkLocationFields>::get(self, provider_id).await
    }

    async fn delete(&self, provider_id: &ProviderId, _options: DeleteOptions) -> Result<(), ProviderError> {
        self.delete_at(Api::Integration, &format!("/work-locations/{provider_id}"), &[])
            .await
    }
}

// ============================================================================
// Shifts
// ============================================================================

#[async_trait]
impl ProviderGateway<ShiftFields> for EvereeClient {
    async fn create(&self, request: &CreateShiftRequest) -> Result<ShiftResponse, ProviderError> {
        let query = correction_query(request.correction_authorized);
        self.send_json(Method::POST, Api::Integration, SHIFTS, query, request)
            .await
    }

    async fn get(&self, provider_id: &ProviderId) -> Result<ShiftResponse, ProviderError> {
        self.get_json(Api::Integration, &format!("{SHIFTS}/{provider_id}"))
            .await
    }

    /// Pages through worked shifts until one carries the external id.
    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<ShiftResponse>, ProviderError> {
        let size = PAGE_SIZE.to_string();
        let mut page = 0u32;
        loop {
            let number = page.to_string();
            let builder = self
                .request(Method::GET, Api::Integration, SHIFTS)
                .query(&[("page", number.as_str()), ("size", size.as_str())]);
            let shifts: Vec<ShiftResponse> = decode(&self.send(builder).await?)?;

            if let Some(found) = shifts
                .iter()
                .find(|s| s.external_id.as_deref() == Some(external_id.as_str()))
            {
                return Ok(Some(found.clone()));
            }
            if shifts.len() < PAGE_SIZE as usize {
                return Ok(None);
            }
            page += 1;
        }
    }

    async fn update(
        &self,
        provider_id: &ProviderId,
        request: &UpdateShiftRequest,
    ) -> Result<ShiftResponse, ProviderError> {
        let path = format!("{SHIFTS}/{provider_id}");
        self.send_json(Method::PUT, Api::Integration, &path, &[], request)
            .await
    }

    async fn delete(&self, provider_id: &ProviderId, options: DeleteOptions) -> Result<(), ProviderError> {
        let path = format!("{SHIFTS}/{provider_id}");
        self.delete_at(Api::Integration, &path, correction_query(options.correction_authorized))
            .await
    }
}

// ============================================================================
// Payables
// ============================================================================

#[async_trait]
impl ProviderGateway<PayableFields> for EvereeClient {
    async fn create(&self, request: &CreatePayableRequest) -> Result<PayableResponse, ProviderError> {
        self.send_json(Method::POST, Api::Core, "/payables", &[], request)
            .await
    }

    /// Payables are addressed by their external id.
    async fn get(&self, provider_id: &ProviderId) -> Result<PayableResponse, ProviderError> {
        self.get_json(Api::Core, &format!("/payables/{provider_id}")).await
    }

    async fn get_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<PayableResponse>, ProviderError> {
        not_found_as_none(
            self.get_json(Api::Core, &format!("/payables/{external_id}"))
                .await,
        )
    }

    async fn update(
        &self,
        provider_id: &ProviderId,
        request: &UpdatePayableRequest,
    ) -> Result<PayableResponse, ProviderError> {
        let path = format!("/payables/{provider_id}");
        self.send_json(Method::PUT, Api::Core, &path, &[], request).await
    }

    async fn delete(&self, provider_id: &ProviderId, _options: DeleteOptions) -> Result<(), ProviderError> {
        self.delete_at(Api::Core, &format!("/payables/{provider_id}"), &[])
            .await
    }
}

#[async_trait]
impl PayoutGateway for EvereeClient {
    async fn process_payables(
        &self,
        request: &PayoutRequest,
    ) -> Result<PayoutResponse, ProviderError> {
        self.send_json(Method::POST, Api::Core, "/payables/payment-request", &[], request)
            .await
    }
}
