//! Everee connection settings, read from the environment.
//!
//! | Variable                       | Required | Notes                          |
//! |--------------------------------|----------|--------------------------------|
//! | `EVEREE_API_TOKEN`             | yes      | sent as HTTP Basic credentials |
//! | `EVEREE_TENANT_ID`             | yes      | `x-everee-tenant-id` header    |
//! | `EVEREE_CORE_BASE_URL`         | yes      | workers, payables, payouts     |
//! | `EVEREE_INTEGRATION_BASE_URL`  | yes      | shifts, work locations         |
//! | `EVEREE_WEBHOOK_SIGNING_KEY`   | no       | unset rejects every webhook    |
//! | `EVEREE_TIMEOUT_SECS`          | no       | per-request timeout, default 30 |

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct EvereeConfig {
    pub api_token: String,
    pub tenant_id: String,
    pub webhook_signing_key: Option<String>,
    pub core_base_url: String,
    pub integration_base_url: String,
    pub timeout: Duration,
}

impl EvereeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let timeout = match get("EVEREE_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    name: "EVEREE_TIMEOUT_SECS",
                    reason: format!("{raw:?} is not a whole number of seconds"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        name: "EVEREE_TIMEOUT_SECS",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            api_token: required("EVEREE_API_TOKEN")?,
            tenant_id: required("EVEREE_TENANT_ID")?,
            webhook_signing_key: get("EVEREE_WEBHOOK_SIGNING_KEY"),
            core_base_url: base_url("EVEREE_CORE_BASE_URL", required("EVEREE_CORE_BASE_URL")?)?,
            integration_base_url: base_url(
                "EVEREE_INTEGRATION_BASE_URL",
                required("EVEREE_INTEGRATION_BASE_URL")?,
            )?,
            timeout,
        })
    }
}

fn base_url(name: &'static str, value: String) -> Result<String, ConfigError> {
    if !(value.starts_with("https://") || value.starts_with("http://")) {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("{value:?} is not an http(s) URL"),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

impl fmt::Debug for EvereeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvereeConfig")
            .field("api_token", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field(
                "webhook_signing_key",
                &self.webhook_signing_key.as_ref().map(|_| "<redacted>"),
            )
            .field("core_base_url", &self.core_base_url)
            .field("integration_base_url", &self.integration_base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}
