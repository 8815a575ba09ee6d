//! Health API endpoints.

use crate::client::CascadeClient;
use crate::error::CascadeResult;
use serde::{Deserialize, Serialize};

/// Health API for checking server status.
pub struct HealthApi<'a> {
    client: &'a CascadeClient,
}

impl<'a> HealthApi<'a> {
    pub(crate) fn new(client: &'a CascadeClient) -> Self {
        Self { client }
    }

    /// Check basic health status.
    pub async fn check(&self) -> CascadeResult<HealthCheck> {
        self.client.http.get("/api/health").await
    }
}

/// Basic health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub service: String,
    pub version: String,
}
