//! Registry connection settings.
//!
//! Settings can be built in code, deserialized with serde, or read from
//! `FRED_*` environment variables. When no backend is given it is detected
//! from the endpoint URL.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::FredError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// API endpoint, e.g. `http://apps.dhis2.org/dev/api-fred/v1`.
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub backend: Option<Backend>,
    /// Extended property names holding dates.
    #[serde(default)]
    pub extended_date_properties: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl RegistryConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: None,
            password: None,
            backend: None,
            extended_date_properties: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_extended_date_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extended_date_properties = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// The configured backend, or the one the URL suggests.
    pub fn backend(&self) -> Backend {
        self.backend
            .unwrap_or_else(|| Backend::detect(&self.base_url))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Read `FRED_URL`, `FRED_USERNAME`, `FRED_PASSWORD`, `FRED_BACKEND`,
    /// `FRED_TIMEOUT_SECS` and `FRED_EXTENDED_DATE_PROPERTIES` (comma
    /// separated).
    pub fn from_env() -> Result<Self, FredError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FredError> {
        let base_url = lookup("FRED_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| FredError::validation("FRED_URL", "registry URL is not set"))?;
        let mut config = Self::new(base_url.trim());

        if let Some(username) = lookup("FRED_USERNAME").filter(|u| !u.is_empty()) {
            let password = lookup("FRED_PASSWORD").unwrap_or_default();
            config = config.with_credentials(&username, &password);
        }
        if let Some(backend) = lookup("FRED_BACKEND") {
            config.backend = Some(backend.parse()?);
        }
        if let Some(secs) = lookup("FRED_TIMEOUT_SECS") {
            let secs = secs.trim().parse().map_err(|_| {
                FredError::validation("FRED_TIMEOUT_SECS", &format!("not a number of seconds: {secs}"))
            })?;
            config.timeout_secs = Some(secs);
        }
        if let Some(names) = lookup("FRED_EXTENDED_DATE_PROPERTIES") {
            config.extended_date_properties = names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(config)
    }
}
