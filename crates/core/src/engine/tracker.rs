use crate::error::{GraphError, GraphResult};
use crate::types::{
    InvocationId, InvocationStatus, InvocationSummary, NodeRun, NodeRunId, Payload, RunStatus,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// How a run finished
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
}

/// A downstream run requested by a completing run
#[derive(Debug, Clone)]
pub struct PendingRun {
    pub node: String,
    pub input: Payload,
    pub element: Option<usize>,
}

/// Result of recording a completion
#[derive(Debug)]
pub struct Completion {
    /// False when the run had been cancelled; its result is discarded
    pub accepted: bool,
    /// Newly created runs, already counted as outstanding
    pub spawned: Vec<NodeRun>,
    /// True if this completion made the invocation terminal
    pub became_terminal: bool,
}

#[derive(Default)]
struct InvocationState {
    // Creation order
    runs: Vec<NodeRun>,
    positions: HashMap<NodeRunId, usize>,
    next_index: HashMap<String, u64>,
    outstanding: HashSet<NodeRunId>,
    completed: u64,
    failed: u64,
    start_completed: bool,
    terminal: bool,
    cancelled: bool,
    violation: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl InvocationState {
    fn create_run(&mut self, node: &str, input: Payload, parent: Option<NodeRunId>, element: Option<usize>) -> NodeRun {
        let counter = self.next_index.entry(node.to_string()).or_default();
        let id = NodeRunId::new(node, *counter);
        *counter += 1;

        let run = NodeRun {
            id: id.clone(),
            parent,
            element,
            input,
            status: RunStatus::Pending,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        self.positions.insert(id.clone(), self.runs.len());
        self.outstanding.insert(id);
        self.runs.push(run.clone());
        run
    }

    fn run_mut(&mut self, id: &NodeRunId) -> Option<&mut NodeRun> {
        let position = *self.positions.get(id)?;
        self.runs.get_mut(position)
    }

    fn mark_terminal(&mut self) {
        self.terminal = true;
        self.completed_at = Some(Utc::now());
    }

    /// Cancel every outstanding run, returning their ids in creation order
    fn cancel_outstanding(&mut self) -> Vec<NodeRunId> {
        let now = Utc::now();
        let mut cancelled = Vec::new();
        for run in self.runs.iter_mut() {
            if self.outstanding.remove(&run.id) {
                run.status = RunStatus::Cancelled;
                run.completed_at = Some(now);
                cancelled.push(run.id.clone());
            }
        }
        cancelled
    }

    fn status(&self) -> InvocationStatus {
        if self.violation.is_some() {
            InvocationStatus::Failed
        } else if self.cancelled {
            InvocationStatus::Cancelled
        } else if !self.terminal {
            InvocationStatus::Running
        } else if self.failed > 0 {
            InvocationStatus::CompletedWithErrors
        } else {
            InvocationStatus::Completed
        }
    }
}

/// Per-invocation state machine.
///
/// Every mutation happens under one mutex owned by this invocation, so
/// concurrent completions never observe a half-applied update and separate
/// invocations never contend. The invocation is terminal once the outstanding
/// set is empty and the start node has completed.
pub struct InvocationTracker {
    id: InvocationId,
    graph: String,
    start_node: String,
    input: Payload,
    created_at: DateTime<Utc>,
    state: Mutex<InvocationState>,
    terminal_tx: watch::Sender<bool>,
}

impl InvocationTracker {
    pub fn new(id: InvocationId, graph: impl Into<String>, start_node: impl Into<String>, input: Payload) -> Self {
        let (terminal_tx, _) = watch::channel(false);
        Self {
            id,
            graph: graph.into(),
            start_node: start_node.into(),
            input,
            created_at: Utc::now(),
            state: Mutex::new(InvocationState::default()),
            terminal_tx,
        }
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    pub fn input(&self) -> &Payload {
        &self.input
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> GraphResult<MutexGuard<'_, InvocationState>> {
        self.state.lock().map_err(|_| {
            GraphError::Internal(format!("state of invocation {} is poisoned", self.id))
        })
    }

    /// Record an invariant violation and halt this invocation
    fn violate(&self, state: &mut InvocationState, message: String) -> GraphError {
        tracing::error!(invocation = %self.id, "{}", message);
        state.violation = Some(message.clone());
        state.cancel_outstanding();
        if !state.terminal {
            state.mark_terminal();
        }
        self.terminal_tx.send_replace(true);
        GraphError::Internal(message)
    }

    /// Create the start run (index 0) carrying the invocation input
    pub fn seed(&self) -> GraphResult<NodeRun> {
        let mut state = self.lock()?;
        if !state.runs.is_empty() {
            let message = format!("invocation {} was already seeded", self.id);
            return Err(self.violate(&mut state, message));
        }
        Ok(state.create_run(&self.start_node, self.input.clone(), None, None))
    }

    /// Move a run to `running` for a new attempt.
    ///
    /// Returns the attempt number, or `None` if the run was cancelled.
    pub fn start_attempt(&self, run_id: &NodeRunId) -> GraphResult<Option<u32>> {
        let mut state = self.lock()?;
        let Some(run) = state.run_mut(run_id) else {
            let message = format!("unknown run {} in invocation {}", run_id, self.id);
            return Err(self.violate(&mut state, message));
        };

        match run.status {
            RunStatus::Cancelled => Ok(None),
            RunStatus::Pending | RunStatus::Running => {
                run.status = RunStatus::Running;
                run.attempts += 1;
                if run.started_at.is_none() {
                    run.started_at = Some(Utc::now());
                }
                Ok(Some(run.attempts))
            }
            status => {
                let message = format!("run {} restarted after reaching {:?}", run_id, status);
                Err(self.violate(&mut state, message))
            }
        }
    }

    /// Whether a run was cancelled, checked before persisting its output
    pub fn is_run_cancelled(&self, run_id: &NodeRunId) -> GraphResult<bool> {
        let state = self.lock()?;
        Ok(state
            .positions
            .get(run_id)
            .is_some_and(|&position| state.runs[position].status == RunStatus::Cancelled))
    }

    /// Record a run's completion and create its downstream runs.
    ///
    /// Children join the outstanding set before the completing run leaves it,
    /// all inside one critical section, so the set cannot be observed empty
    /// while work remains.
    pub fn complete(
        &self,
        run_id: &NodeRunId,
        outcome: RunOutcome,
        children: Vec<PendingRun>,
    ) -> GraphResult<Completion> {
        let mut state = self.lock()?;

        let status = match state.run_mut(run_id) {
            Some(run) => run.status,
            None => {
                let message = format!("completion for unknown run {} in invocation {}", run_id, self.id);
                return Err(self.violate(&mut state, message));
            }
        };

        if status == RunStatus::Cancelled {
            return Ok(Completion {
                accepted: false,
                spawned: Vec::new(),
                became_terminal: false,
            });
        }
        if status != RunStatus::Running || !state.outstanding.contains(run_id) {
            let message = format!("run {} completed from unexpected state {:?}", run_id, status);
            return Err(self.violate(&mut state, message));
        }

        let spawned = match outcome {
            RunOutcome::Succeeded => children
                .into_iter()
                .map(|child| state.create_run(&child.node, child.input, Some(run_id.clone()), child.element))
                .collect(),
            RunOutcome::Failed(_) => Vec::new(),
        };

        if let Some(run) = state.run_mut(run_id) {
            run.completed_at = Some(Utc::now());
            match outcome {
                RunOutcome::Succeeded => run.status = RunStatus::Succeeded,
                RunOutcome::Failed(message) => {
                    run.status = RunStatus::Failed;
                    run.error = Some(message);
                }
            }
        }
        if state.run_mut(run_id).is_some_and(|run| run.status == RunStatus::Failed) {
            state.failed += 1;
        }

        state.outstanding.remove(run_id);
        state.completed += 1;
        if run_id.node == self.start_node {
            state.start_completed = true;
        }

        let became_terminal = state.outstanding.is_empty() && state.start_completed && !state.terminal;
        if became_terminal {
            state.mark_terminal();
        }
        drop(state);

        if became_terminal {
            self.terminal_tx.send_replace(true);
        }

        Ok(Completion {
            accepted: true,
            spawned,
            became_terminal,
        })
    }

    /// Cancel all outstanding runs and make the invocation terminal.
    ///
    /// Returns the cancelled run ids; empty if the invocation was already terminal.
    pub fn cancel(&self) -> GraphResult<Vec<NodeRunId>> {
        let mut state = self.lock()?;
        if state.terminal {
            return Ok(Vec::new());
        }

        let cancelled = state.cancel_outstanding();
        state.cancelled = true;
        state.mark_terminal();
        drop(state);

        self.terminal_tx.send_replace(true);
        Ok(cancelled)
    }

    /// Halt this invocation after a failure inside the engine itself
    pub fn halt(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.lock() {
            if state.violation.is_none() {
                let _ = self.violate(&mut state, reason.into());
            }
        } else {
            // Poisoned state still has to release waiters
            self.terminal_tx.send_replace(true);
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self.terminal_tx.borrow()
    }

    /// Wait until the invocation is terminal, without cancelling anything on timeout
    pub async fn wait(&self, timeout: Duration) -> GraphResult<InvocationSummary> {
        let mut terminal_rx = self.terminal_tx.subscribe();
        let waited = tokio::time::timeout(timeout, terminal_rx.wait_for(|terminal| *terminal))
            .await
            .map(|signal| signal.map(|_| ()));
        match waited {
            Ok(Ok(())) => self.summary(),
            Ok(Err(_)) => Err(GraphError::Internal(format!(
                "terminal signal for invocation {} closed",
                self.id
            ))),
            Err(_) => Err(GraphError::Timeout {
                invocation: self.id,
                waited: timeout,
            }),
        }
    }

    pub fn summary(&self) -> GraphResult<InvocationSummary> {
        let state = self.lock()?;
        Ok(InvocationSummary {
            id: self.id,
            graph: self.graph.clone(),
            status: state.status(),
            runs_created: state.runs.len() as u64,
            runs_completed: state.completed,
            runs_failed: state.failed,
            outstanding: state.outstanding.len(),
            created_at: self.created_at,
            completed_at: state.completed_at,
        })
    }

    /// Every run in creation order
    pub fn runs(&self) -> GraphResult<Vec<NodeRun>> {
        Ok(self.lock()?.runs.clone())
    }

    /// Status of each run of a node, keyed by index
    pub fn run_statuses(&self, node: &str) -> GraphResult<HashMap<u64, RunStatus>> {
        Ok(self
            .lock()?
            .runs
            .iter()
            .filter(|run| run.id.node == node)
            .map(|run| (run.id.index, run.status))
            .collect())
    }
}
