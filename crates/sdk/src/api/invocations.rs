//! Invocation endpoints.

use crate::client::CascadeClient;
use crate::error::CascadeResult;
use crate::transport::Idempotency;
use cascade_core::events::Event;
use cascade_core::{InvocationId, InvocationSummary, NodeRun, OutputRecord, Payload};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Invocations API for running graphs and reading their outputs.
pub struct InvocationsApi<'a> {
    client: &'a CascadeClient,
}

impl<'a> InvocationsApi<'a> {
    pub(crate) fn new(client: &'a CascadeClient) -> Self {
        Self { client }
    }

    fn base(graph: &str) -> String {
        format!("/api/graphs/{}/invocations", graph)
    }

    /// Start an invocation without waiting for it.
    pub async fn invoke(&self, graph: &str, payload: Payload) -> CascadeResult<InvocationId> {
        let response: InvokeResponse = self
            .client
            .http
            .post_with_query(
                &Self::base(graph),
                &InvokeQuery::default(),
                &InvokeRequest { payload },
                Duration::ZERO,
                Idempotency::NonIdempotent,
            )
            .await?;
        Ok(response.id)
    }

    /// Start an invocation and block until it finishes.
    ///
    /// If the wait expires the server answers 408 and the invocation keeps running.
    pub async fn invoke_and_wait(
        &self,
        graph: &str,
        payload: Payload,
        timeout: Duration,
    ) -> CascadeResult<InvocationId> {
        let query = InvokeQuery {
            block_until_finish: true,
            timeout_secs: Some(whole_secs(timeout)),
        };
        let response: InvokeResponse = self
            .client
            .http
            .post_with_query(
                &Self::base(graph),
                &query,
                &InvokeRequest { payload },
                timeout,
                Idempotency::NonIdempotent,
            )
            .await?;
        Ok(response.id)
    }

    /// List invocations of a graph.
    pub async fn list(&self, graph: &str) -> CascadeResult<Vec<InvocationSummary>> {
        let response: InvocationPage = self.client.http.get(&Self::base(graph)).await?;
        Ok(response.invocations)
    }

    /// List one page of a graph's invocations, oldest first.
    ///
    /// Pass the returned `cursor` back to fetch the next page; it is `None` on the last one.
    pub async fn list_page(
        &self,
        graph: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> CascadeResult<InvocationPage> {
        let mut path = format!("{}?limit={}", Self::base(graph), limit);
        if let Some(cursor) = cursor {
            path.push_str(&format!("&cursor={}", cursor));
        }
        self.client.http.get(&path).await
    }

    /// Get the current status of an invocation.
    pub async fn get(&self, graph: &str, id: InvocationId) -> CascadeResult<InvocationSummary> {
        self.client
            .http
            .get(&format!("{}/{}", Self::base(graph), id))
            .await
    }

    /// Wait for an invocation to finish.
    pub async fn wait(&self, graph: &str, id: InvocationId, timeout: Duration) -> CascadeResult<InvocationSummary> {
        self.client
            .http
            .post_with_query(
                &format!("{}/{}/wait", Self::base(graph), id),
                &[("timeout_secs", whole_secs(timeout))],
                &serde_json::json!({}),
                timeout,
                Idempotency::Idempotent,
            )
            .await
    }

    /// Cancel an invocation's outstanding runs.
    pub async fn cancel(&self, graph: &str, id: InvocationId) -> CascadeResult<InvocationSummary> {
        self.client
            .http
            .post(&format!("{}/{}/cancel", Self::base(graph), id), &serde_json::json!({}))
            .await
    }

    /// Every node run of an invocation, in creation order.
    pub async fn tasks(&self, graph: &str, id: InvocationId) -> CascadeResult<Vec<NodeRun>> {
        let response: ListTasksResponse = self
            .client
            .http
            .get(&format!("{}/{}/tasks", Self::base(graph), id))
            .await?;
        Ok(response.tasks)
    }

    /// Lifecycle events of an invocation.
    pub async fn events(&self, graph: &str, id: InvocationId) -> CascadeResult<Vec<Event>> {
        let response: ListEventsResponse = self
            .client
            .http
            .get(&format!("{}/{}/events", Self::base(graph), id))
            .await?;
        Ok(response.events)
    }

    /// Outputs of a node with their records and any run errors.
    pub async fn outputs(&self, graph: &str, id: InvocationId, node: &str) -> CascadeResult<OutputsResponse> {
        self.client
            .http
            .get(&format!("{}/{}/outputs/{}", Self::base(graph), id, node))
            .await
    }
}

/// The server waits in whole seconds; round up so short waits never become zero
fn whole_secs(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

#[derive(Debug, Default, Serialize)]
struct InvokeQuery {
    block_until_finish: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct InvokeRequest {
    payload: Payload,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    id: InvocationId,
}

/// A page of invocation summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationPage {
    pub invocations: Vec<InvocationSummary>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListTasksResponse {
    tasks: Vec<NodeRun>,
}

#[derive(Debug, Deserialize)]
struct ListEventsResponse {
    events: Vec<Event>,
}

/// Payloads of a node in run order; `records[i]` describes `outputs[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputsResponse {
    pub outputs: Vec<Payload>,
    pub records: Vec<OutputRecord>,
    #[serde(default)]
    pub errors: Vec<RunError>,
}

/// Error left by a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub index: u64,
    pub error: String,
}
