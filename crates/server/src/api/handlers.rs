use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use cascade_core::{
    events::Event,
    function::CatalogFunction,
    GraphDefinition, InvocationId, InvocationSummary, NodeOutput, NodeRun, OutputRecord, Payload,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn parse_invocation_id(id: &str) -> ApiResult<InvocationId> {
    id.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid invocation ID: {}", id)))
}

/// Cursor pagination for listings; the cursor is the key of the last item returned
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

fn paginate<T>(
    items: Vec<T>,
    params: &ListParams,
    key: impl Fn(&T) -> String,
) -> ApiResult<(Vec<T>, Option<String>)> {
    if params.limit == Some(0) {
        return Err(ApiError::bad_request("limit must be at least 1"));
    }

    let start = match &params.cursor {
        Some(cursor) => {
            items
                .iter()
                .position(|item| &key(item) == cursor)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown cursor: {}", cursor)))?
                + 1
        }
        None => 0,
    };

    let total = items.len();
    let page: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();
    let next = if start + page.len() < total {
        page.last().map(&key)
    } else {
        None
    };
    Ok((page, next))
}

/// List functions available to serialized graph definitions
pub async fn list_functions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ListFunctionsResponse>> {
    Ok(Json(ListFunctionsResponse {
        functions: state.catalog.list(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFunctionsResponse {
    pub functions: Vec<CatalogFunction>,
}

/// Register a graph definition
pub async fn register_graph(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<GraphDefinition>,
) -> ApiResult<(StatusCode, Json<RegisterGraphResponse>)> {
    let graph = state.runtime.register_definition(&definition, &state.catalog)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterGraphResponse {
            name: graph.name().to_string(),
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterGraphResponse {
    pub name: String,
}

/// List all registered graphs
pub async fn list_graphs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListGraphsResponse>> {
    let (graphs, cursor) = paginate(state.runtime.list_graphs()?, &params, |graph| graph.name.clone())?;
    Ok(Json(ListGraphsResponse { graphs, cursor }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListGraphsResponse {
    pub graphs: Vec<GraphDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Get a specific graph definition
pub async fn get_graph(
    State(state): State<Arc<AppState>>,
    Path(graph): Path<String>,
) -> ApiResult<Json<GraphDefinition>> {
    Ok(Json(state.runtime.get_graph(&graph)?))
}

/// Deregister a graph; invocations already running are unaffected
pub async fn delete_graph(
    State(state): State<Arc<AppState>>,
    Path(graph): Path<String>,
) -> ApiResult<StatusCode> {
    state.runtime.deregister(&graph)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct InvokeParams {
    #[serde(default)]
    pub block_until_finish: bool,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub id: InvocationId,
}

/// Start an invocation, optionally waiting for it to finish
pub async fn invoke_graph(
    State(state): State<Arc<AppState>>,
    Path(graph): Path<String>,
    Query(params): Query<InvokeParams>,
    Json(req): Json<InvokeRequest>,
) -> ApiResult<Json<InvokeResponse>> {
    let id = if params.block_until_finish {
        state
            .runtime
            .invoke_and_wait(&graph, req.payload, params.timeout_secs.map(Duration::from_secs))
            .await?
    } else {
        state.runtime.invoke(&graph, req.payload).await?
    };

    Ok(Json(InvokeResponse { id }))
}

/// List invocations of a graph
pub async fn list_invocations(
    State(state): State<Arc<AppState>>,
    Path(graph): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListInvocationsResponse>> {
    let (invocations, cursor) = paginate(state.runtime.list_invocations(&graph)?, &params, |summary| {
        summary.id.to_string()
    })?;
    Ok(Json(ListInvocationsResponse { invocations, cursor }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListInvocationsResponse {
    pub invocations: Vec<InvocationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Get an invocation's status
pub async fn get_invocation(
    State(state): State<Arc<AppState>>,
    Path((graph, id)): Path<(String, String)>,
) -> ApiResult<Json<InvocationSummary>> {
    let id = parse_invocation_id(&id)?;
    Ok(Json(state.runtime.invocation(&graph, id)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitParams {
    pub timeout_secs: Option<u64>,
}

/// Block until an invocation is terminal
pub async fn wait_for_invocation(
    State(state): State<Arc<AppState>>,
    Path((graph, id)): Path<(String, String)>,
    Query(params): Query<WaitParams>,
) -> ApiResult<Json<InvocationSummary>> {
    let id = parse_invocation_id(&id)?;
    // Confirms the invocation belongs to this graph
    state.runtime.invocation(&graph, id)?;

    let timeout = params
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.runtime.config().block_timeout());
    Ok(Json(state.runtime.block_until_done(id, timeout).await?))
}

/// Cancel an invocation's outstanding runs
pub async fn cancel_invocation(
    State(state): State<Arc<AppState>>,
    Path((graph, id)): Path<(String, String)>,
) -> ApiResult<Json<InvocationSummary>> {
    let id = parse_invocation_id(&id)?;
    Ok(Json(state.runtime.cancel(&graph, id).await?))
}

/// List every node run of an invocation
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Path((graph, id)): Path<(String, String)>,
) -> ApiResult<Json<ListTasksResponse>> {
    let id = parse_invocation_id(&id)?;
    let tasks = state.runtime.node_runs(&graph, id)?;
    Ok(Json(ListTasksResponse { tasks }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<NodeRun>,
}

/// Get the event log of an invocation
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Path((graph, id)): Path<(String, String)>,
) -> ApiResult<Json<ListEventsResponse>> {
    let id = parse_invocation_id(&id)?;
    let events = state.runtime.events(&graph, id).await?;
    Ok(Json(ListEventsResponse { events }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListEventsResponse {
    pub events: Vec<Event>,
}

/// Get the outputs of one node
pub async fn get_outputs(
    State(state): State<Arc<AppState>>,
    Path((graph, id, node)): Path<(String, String, String)>,
) -> ApiResult<Json<OutputsResponse>> {
    let id = parse_invocation_id(&id)?;
    let results = state.runtime.results(&graph, id, &node).await?;

    let mut response = OutputsResponse::default();
    for stored in results {
        match stored.output {
            NodeOutput::Payload(payload) => {
                response.outputs.push(payload);
                response.records.push(stored.record);
            }
            NodeOutput::Error(error) => response.errors.push(RunError {
                index: stored.record.index,
                error,
            }),
        }
    }

    Ok(Json(response))
}

/// Payloads of a node in run order; `records[i]` describes `outputs[i]`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OutputsResponse {
    pub outputs: Vec<Payload>,
    pub records: Vec<OutputRecord>,
    pub errors: Vec<RunError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunError {
    pub index: u64,
    pub error: String,
}
