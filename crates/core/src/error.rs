use crate::types::InvocationId;
use std::time::Duration;

/// Result type for graph construction, registration and invocation
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors surfaced by the graph engine
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Bad graph shape: unreachable node, missing start, unknown endpoint
    #[error("Invalid graph: {0}")]
    Construction(String),

    /// Edge or invocation input incompatible with the declared type
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Graph {0} is already registered")]
    DuplicateName(String),

    #[error("Edge {from} -> {to} already exists")]
    DuplicateEdge { from: String, to: String },

    #[error("Edge {from} -> {to} would create a cycle")]
    CycleDetected { from: String, to: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Timed out after {waited:?} waiting for invocation {invocation}")]
    Timeout {
        invocation: InvocationId,
        waited: Duration,
    },

    /// A node's logic failed; recorded on the run, never aborts the invocation
    #[error("Node {node} failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// Engine invariant violated; halts the affected invocation only
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraphError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Errors caused by the shape or typing of a graph definition
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::Construction(_)
                | Self::TypeMismatch(_)
                | Self::DuplicateEdge { .. }
                | Self::CycleDetected { .. }
        )
    }
}
