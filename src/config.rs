//! Configuration management

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Authorization proxy configuration
    pub auth: AuthConfig,
    /// Private-key vending configuration
    pub vending: VendingConfig,
    /// HTTP client configuration
    pub http: HttpConfig,
}

/// Authorization proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Absolute URI of the authorization endpoint
    pub endpoint_uri: String,
    /// Lifetime of a cached authorization, in seconds
    pub cache_entry_lifetime_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint_uri: String::new(),
            cache_entry_lifetime_secs: 150,
        }
    }
}

/// Private-key vending configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VendingConfig {
    /// Vending endpoint base URIs, in key-split order
    pub endpoints: Vec<String>,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout, in seconds
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl Config {
    /// Load configuration from an optional YAML file with `KEYBROKER_`
    /// environment overrides (`KEYBROKER_AUTH__ENDPOINT_URI=...`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed("KEYBROKER_").split("__"))
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that configured URIs are parseable.
    pub fn validate(&self) -> Result<()> {
        if !self.auth.endpoint_uri.is_empty() {
            Url::parse(&self.auth.endpoint_uri).map_err(|e| {
                Error::InvalidConfig(format!("auth.endpoint_uri: {e}"))
            })?;
        }
        for endpoint in &self.vending.endpoints {
            Url::parse(endpoint)
                .map_err(|e| Error::InvalidConfig(format!("vending endpoint {endpoint}: {e}")))?;
        }
        Ok(())
    }

    /// Cached authorization lifetime as a [`Duration`].
    #[must_use]
    pub fn cache_entry_lifetime(&self) -> Duration {
        Duration::from_secs(self.auth.cache_entry_lifetime_secs)
    }

    /// HTTP timeout as a [`Duration`].
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}
