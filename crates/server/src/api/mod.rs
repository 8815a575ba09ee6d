use crate::config::{AppState, ServerConfig};
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cascade_core::{GraphError, InvocationId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config)?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router
pub(crate) fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/functions", get(handlers::list_functions))
        .route(
            "/api/graphs",
            get(handlers::list_graphs).post(handlers::register_graph),
        )
        .route(
            "/api/graphs/{graph}",
            get(handlers::get_graph).delete(handlers::delete_graph),
        )
        .route(
            "/api/graphs/{graph}/invocations",
            get(handlers::list_invocations).post(handlers::invoke_graph),
        )
        .route(
            "/api/graphs/{graph}/invocations/{id}",
            get(handlers::get_invocation),
        )
        .route(
            "/api/graphs/{graph}/invocations/{id}/wait",
            post(handlers::wait_for_invocation),
        )
        .route(
            "/api/graphs/{graph}/invocations/{id}/cancel",
            post(handlers::cancel_invocation),
        )
        .route(
            "/api/graphs/{graph}/invocations/{id}/tasks",
            get(handlers::list_tasks),
        )
        .route(
            "/api/graphs/{graph}/invocations/{id}/events",
            get(handlers::list_events),
        )
        .route(
            "/api/graphs/{graph}/invocations/{id}/outputs/{node}",
            get(handlers::get_outputs),
        )
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cascade",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Invocation that is still running after a timed-out wait
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            invocation_id: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::new(error)
        }
    }
}

/// Error type for API handlers, carrying the status it maps to
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
    invocation: Option<InvocationId>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(message.into()),
            invocation: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_msg = self.error.to_string();
        let details = self
            .error
            .chain()
            .skip(1)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");

        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        }

        let mut response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };
        response.invocation_id = self.invocation;

        (self.status, Json(response)).into_response()
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        let status = match &err {
            GraphError::NotFound { .. } => StatusCode::NOT_FOUND,
            GraphError::DuplicateName(_) => StatusCode::CONFLICT,
            GraphError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            e if e.is_construction() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let invocation = match &err {
            GraphError::Timeout { invocation, .. } => Some(*invocation),
            _ => None,
        };
        Self {
            status,
            error: err.into(),
            invocation,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err,
            invocation: None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
