use super::tracker::{InvocationTracker, PendingRun, RunOutcome};
use crate::config::EngineConfig;
use crate::error::{GraphError, GraphResult};
use crate::events::{Event, EventLog, EventType};
use crate::function::{FunctionNode, NodeKind};
use crate::graph::Graph;
use crate::storage::OutputStore;
use crate::types::{EdgeRouting, NodeOutput, NodeRun, Payload};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Everything a run needs to know about the invocation it belongs to
pub struct InvocationContext {
    pub graph: Arc<Graph>,
    pub tracker: InvocationTracker,
}

struct Success {
    output: Payload,
    /// Successors chosen by a router; `None` for compute nodes
    targets: Option<Vec<String>>,
    duration: Duration,
}

/// Executes node runs on the tokio runtime.
///
/// Each run gets its own task. A shared semaphore bounds how many node
/// functions execute at once across all invocations.
pub struct Dispatcher {
    outputs: Arc<dyn OutputStore>,
    events: Arc<dyn EventLog>,
    permits: Arc<Semaphore>,
    default_node_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(outputs: Arc<dyn OutputStore>, events: Arc<dyn EventLog>, config: &EngineConfig) -> Self {
        Self {
            outputs,
            events,
            permits: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            default_node_timeout: config.node_timeout(),
        }
    }

    /// Hand a run to a worker task
    pub fn schedule(self: &Arc<Self>, ctx: &Arc<InvocationContext>, run: NodeRun) {
        let dispatcher = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            dispatcher
                .record(
                    &ctx,
                    EventType::RunScheduled {
                        run: run.id.clone(),
                        parent: run.parent.clone(),
                    },
                )
                .await;

            if let Err(e) = dispatcher.process(&ctx, &run).await {
                tracing::error!(
                    invocation = %ctx.tracker.id(),
                    run = %run.id,
                    "Halting invocation: {}",
                    e
                );
                ctx.tracker.halt(e.to_string());
                dispatcher.finish(&ctx).await;
            }
        });
    }

    async fn process(self: &Arc<Self>, ctx: &Arc<InvocationContext>, run: &NodeRun) -> GraphResult<()> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GraphError::Internal("run permits closed".to_string()))?;

        let node = ctx.graph.node(&run.id.node).ok_or_else(|| {
            GraphError::Internal(format!("run {} refers to a node missing from graph '{}'", run.id, ctx.graph.name()))
        })?;

        let Some(result) = self.attempt(ctx, node, run).await? else {
            tracing::debug!(run = %run.id, "Run cancelled before it started");
            return Ok(());
        };

        let (outcome, stored, children) = match result {
            Ok(success) => {
                if ctx.tracker.is_run_cancelled(&run.id)? {
                    tracing::debug!(run = %run.id, "Discarding output of cancelled run");
                    return Ok(());
                }

                let children = expand(&ctx.graph, &run.id.node, &success.output, success.targets.as_deref());
                let stored = self
                    .outputs
                    .put(ctx.tracker.id(), &run.id.node, run.id.index, NodeOutput::Payload(success.output))
                    .await;

                match stored {
                    Ok(_) => {
                        if let Some(targets) = success.targets {
                            self.record(ctx, EventType::RouteSelected { run: run.id.clone(), targets })
                                .await;
                        }
                        self.record(
                            ctx,
                            EventType::RunSucceeded {
                                run: run.id.clone(),
                                duration_ms: success.duration.as_millis() as u64,
                                spawned: children.len(),
                            },
                        )
                        .await;
                        (RunOutcome::Succeeded, true, children)
                    }
                    Err(e) => {
                        let message = format!("failed to store output: {:#}", e);
                        tracing::warn!(run = %run.id, "{}", message);
                        (RunOutcome::Failed(message), false, Vec::new())
                    }
                }
            }
            Err(message) => (RunOutcome::Failed(message), false, Vec::new()),
        };

        if let RunOutcome::Failed(message) = &outcome {
            if !stored {
                self.store_error(ctx, run, message).await;
            }
        }

        let completion = ctx.tracker.complete(&run.id, outcome, children)?;
        if !completion.accepted {
            return Ok(());
        }

        for child in completion.spawned {
            self.schedule(ctx, child);
        }

        if completion.became_terminal {
            self.finish(ctx).await;
        }

        Ok(())
    }

    /// Run the node function until it succeeds or its retries are exhausted.
    ///
    /// Returns `None` if the run was cancelled before an attempt could start.
    async fn attempt(
        &self,
        ctx: &InvocationContext,
        node: &FunctionNode,
        run: &NodeRun,
    ) -> GraphResult<Option<Result<Success, String>>> {
        loop {
            let Some(attempt) = ctx.tracker.start_attempt(&run.id)? else {
                return Ok(None);
            };

            tracing::info!(
                "Executing run {} (attempt {}) for invocation {}",
                run.id,
                attempt,
                ctx.tracker.id()
            );
            self.record(ctx, EventType::RunStarted { run: run.id.clone(), attempt }).await;

            let started = Instant::now();
            let result = match self.call(node, run.input.clone()).await {
                Ok(output) => check_output(&ctx.graph, node, &run.input, output),
                Err(e) => Err(e),
            };

            let message = match result {
                Ok((output, targets)) => {
                    return Ok(Some(Ok(Success {
                        output,
                        targets,
                        duration: started.elapsed(),
                    })));
                }
                Err(message) => message,
            };

            // Bad input will not get better on retry
            let retryable = node.input().accepts(&run.input);
            let will_retry = retryable && node.retry_policy().is_some_and(|policy| policy.should_retry(attempt));
            self.record(
                ctx,
                EventType::RunFailed {
                    run: run.id.clone(),
                    error: message.clone(),
                    attempt,
                    will_retry,
                },
            )
            .await;

            if !will_retry {
                let error = GraphError::NodeExecution {
                    node: run.id.node.clone(),
                    message,
                };
                tracing::warn!(run = %run.id, "{}", error);
                return Ok(Some(Err(error.to_string())));
            }

            if let Some(policy) = node.retry_policy() {
                let backoff = policy.backoff_for(attempt);
                tracing::info!("Retrying run {} after {:?} (attempt {})", run.id, backoff, attempt + 1);
                tokio::time::sleep(backoff).await;
            }
        }
    }

    /// Invoke the node function in its own task so a panic fails only this run
    async fn call(&self, node: &FunctionNode, input: Payload) -> Result<Payload, String> {
        if !node.input().accepts(&input) {
            return Err(format!("input does not match declared type {}", node.input()));
        }

        let function = node.function().clone();
        let handle = tokio::spawn(async move { function.call(input).await });
        let abort = handle.abort_handle();

        let joined = match node.timeout().or(self.default_node_timeout) {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(format!("timed out after {:?}", limit));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(e) if e.is_panic() => Err("function panicked".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn store_error(&self, ctx: &InvocationContext, run: &NodeRun, message: &str) {
        let result = self
            .outputs
            .put(ctx.tracker.id(), &run.id.node, run.id.index, NodeOutput::Error(message.to_string()))
            .await;
        if let Err(e) = result {
            tracing::warn!(run = %run.id, "Failed to store error record: {:#}", e);
        }
    }

    /// Log the invocation's terminal status
    pub async fn finish(&self, ctx: &InvocationContext) {
        let Ok(summary) = ctx.tracker.summary() else {
            return;
        };
        let duration_ms = summary
            .completed_at
            .map(|completed| (completed - summary.created_at).num_milliseconds().max(0) as u64)
            .unwrap_or_default();

        tracing::info!(
            "Invocation {} of graph '{}' finished: {:?} ({} runs, {} failed)",
            summary.id,
            summary.graph,
            summary.status,
            summary.runs_created,
            summary.runs_failed
        );
        self.record(
            ctx,
            EventType::InvocationCompleted {
                status: summary.status,
                duration_ms,
            },
        )
        .await;
    }

    /// Append to the event log; a log failure never affects execution
    pub async fn record(&self, ctx: &InvocationContext, event_type: EventType) {
        if let Err(e) = self.events.append(Event::new(ctx.tracker.id(), event_type)).await {
            tracing::warn!(invocation = %ctx.tracker.id(), "Failed to append event: {:#}", e);
        }
    }
}

/// Validate a function's result against the node's contract.
///
/// Compute nodes must produce their declared output type. Routers must return
/// a list of successor names and forward their input unchanged.
fn check_output(
    graph: &Graph,
    node: &FunctionNode,
    input: &Payload,
    output: Payload,
) -> Result<(Payload, Option<Vec<String>>), String> {
    match node.kind() {
        NodeKind::Compute => {
            if node.output().accepts(&output) {
                Ok((output, None))
            } else {
                Err(format!("output does not match declared type {}", node.output()))
            }
        }
        NodeKind::Router => {
            let targets: Vec<String> = serde_json::from_value(output)
                .map_err(|_| "router must return a list of successor names".to_string())?;

            let successors = graph.successors(node.name());
            if let Some(unknown) = targets
                .iter()
                .find(|target| !successors.iter().any(|edge| &edge.to == *target))
            {
                return Err(format!("router selected '{}', which is not a successor", unknown));
            }

            Ok((input.clone(), Some(targets)))
        }
    }
}

/// Downstream runs for a successful output, in edge insertion order
fn expand(graph: &Graph, node: &str, output: &Payload, targets: Option<&[String]>) -> Vec<PendingRun> {
    let mut children = Vec::new();
    for edge in graph.successors(node) {
        if targets.is_some_and(|targets| !targets.contains(&edge.to)) {
            continue;
        }

        match edge.routing {
            EdgeRouting::PassThrough => children.push(PendingRun {
                node: edge.to.clone(),
                input: output.clone(),
                element: None,
            }),
            EdgeRouting::FanOut => {
                let items = output.as_array().map(Vec::as_slice).unwrap_or_default();
                children.extend(items.iter().enumerate().map(|(element, item)| PendingRun {
                    node: edge.to.clone(),
                    input: item.clone(),
                    element: Some(element),
                }));
            }
        }
    }
    children
}
