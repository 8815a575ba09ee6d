use crate::types::{InvocationId, InvocationStatus, NodeRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event in an invocation's lifecycle log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: InvocationId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(invocation_id: InvocationId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events recorded for an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Invocation lifecycle events
    InvocationStarted {
        graph: String,
    },
    InvocationCompleted {
        status: InvocationStatus,
        duration_ms: u64,
    },
    InvocationCancelled {
        cancelled_runs: usize,
    },

    // Run lifecycle events
    RunScheduled {
        run: NodeRunId,
        parent: Option<NodeRunId>,
    },
    RunStarted {
        run: NodeRunId,
        attempt: u32,
    },
    RunSucceeded {
        run: NodeRunId,
        duration_ms: u64,
        spawned: usize,
    },
    RunFailed {
        run: NodeRunId,
        error: String,
        attempt: u32,
        will_retry: bool,
    },
    RunCancelled {
        run: NodeRunId,
    },
    RouteSelected {
        run: NodeRunId,
        targets: Vec<String>,
    },
}

/// Event log writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Get all events for an invocation, oldest first
    async fn invocation_events(&self, invocation_id: InvocationId) -> anyhow::Result<Vec<Event>>;
}
