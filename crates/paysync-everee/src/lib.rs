//! Everee provider for paysync.
//!
//! [`EvereeClient`] implements every provider port the engine needs, so one
//! client wires the whole engine:
//!
//! ```ignore
//! let config = EvereeConfig::from_env()?;
//! let client = Arc::new(EvereeClient::new(&config)?);
//! let ctx = SyncContext::new(Stores::shared(store), Gateways::shared(client))
//!     .with_settings(SyncSettings::default().with_call_timeout(config.timeout));
//! let verifier = config.verifier();
//! ```

pub mod client;
pub mod config;

pub use client::EvereeClient;
pub use config::{ConfigError, EvereeConfig, DEFAULT_TIMEOUT};

use paysync_core::webhook::WebhookVerifier;

impl EvereeConfig {
    /// Verifier for inbound webhooks; rejects everything when no signing
    /// key is configured.
    pub fn verifier(&self) -> WebhookVerifier {
        WebhookVerifier::new(self.webhook_signing_key.clone())
    }
}
