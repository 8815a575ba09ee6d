//! Main client for the Cascade SDK.

use crate::api::*;
use crate::config::{ClientConfig, RetryConfig};
use crate::error::{CascadeError, CascadeResult};
use crate::transport::HttpTransport;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Main client for interacting with a Cascade server.
#[derive(Clone)]
pub struct CascadeClient {
    pub(crate) http: HttpTransport,
}

impl CascadeClient {
    /// Create a new client builder.
    pub fn builder() -> CascadeClientBuilder {
        CascadeClientBuilder::new()
    }

    /// Create a client from configuration.
    pub fn from_config(config: ClientConfig) -> CascadeResult<Self> {
        let http = HttpTransport::new(Arc::new(config))?;
        Ok(Self { http })
    }

    /// Get the health API.
    pub fn health(&self) -> HealthApi<'_> {
        HealthApi::new(self)
    }

    /// Get the graphs API.
    pub fn graphs(&self) -> GraphsApi<'_> {
        GraphsApi::new(self)
    }

    /// Get the invocations API.
    pub fn invocations(&self) -> InvocationsApi<'_> {
        InvocationsApi::new(self)
    }
}

/// Builder for creating a CascadeClient.
pub struct CascadeClientBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
    retry_config: RetryConfig,
}

impl CascadeClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout: Duration::from_secs(30),
            retry_config: RetryConfig::default(),
        }
    }

    /// Set the base URL of the Cascade server.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the API key for authentication.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry configuration.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Build the client.
    pub fn build(self) -> CascadeResult<CascadeClient> {
        let base_url_str = self
            .base_url
            .ok_or_else(|| CascadeError::Config("base_url is required".to_string()))?;

        let base_url = Url::parse(&base_url_str)?;

        let config = ClientConfig {
            base_url,
            api_key: self.api_key,
            timeout: self.timeout,
            retry_config: self.retry_config,
        };

        CascadeClient::from_config(config)
    }
}

impl Default for CascadeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
