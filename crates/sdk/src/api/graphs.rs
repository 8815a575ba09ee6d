//! Graph registration endpoints.

use crate::client::CascadeClient;
use crate::error::CascadeResult;
use cascade_core::function::CatalogFunction;
use cascade_core::GraphDefinition;
use serde::{Deserialize, Serialize};

/// Graphs API for registering and inspecting graphs.
pub struct GraphsApi<'a> {
    client: &'a CascadeClient,
}

impl<'a> GraphsApi<'a> {
    pub(crate) fn new(client: &'a CascadeClient) -> Self {
        Self { client }
    }

    /// Register a graph definition. Returns the registered name.
    pub async fn register(&self, definition: &GraphDefinition) -> CascadeResult<String> {
        let response: RegisterGraphResponse = self.client.http.post("/api/graphs", definition).await?;
        Ok(response.name)
    }

    /// List all registered graphs.
    pub async fn list(&self) -> CascadeResult<Vec<GraphDefinition>> {
        let response: ListGraphsResponse = self.client.http.get("/api/graphs").await?;
        Ok(response.graphs)
    }

    /// Get a graph definition by name.
    pub async fn get(&self, name: &str) -> CascadeResult<GraphDefinition> {
        self.client.http.get(&format!("/api/graphs/{}", name)).await
    }

    /// Deregister a graph.
    pub async fn delete(&self, name: &str) -> CascadeResult<()> {
        self.client
            .http
            .delete_no_response(&format!("/api/graphs/{}", name))
            .await
    }

    /// Functions the server can bind graph nodes to.
    pub async fn functions(&self) -> CascadeResult<Vec<CatalogFunction>> {
        let response: ListFunctionsResponse = self.client.http.get("/api/functions").await?;
        Ok(response.functions)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RegisterGraphResponse {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListGraphsResponse {
    graphs: Vec<GraphDefinition>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListFunctionsResponse {
    functions: Vec<CatalogFunction>,
}
