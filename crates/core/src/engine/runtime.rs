use super::dispatcher::{Dispatcher, InvocationContext};
use super::tracker::InvocationTracker;
use crate::config::EngineConfig;
use crate::error::{GraphError, GraphResult};
use crate::events::{Event, EventLog, EventType};
use crate::function::FunctionCatalog;
use crate::graph::{Graph, GraphDefinition};
use crate::registry::GraphRegistry;
use crate::storage::{MemoryEventLog, MemoryOutputStore, OutputStore};
use crate::types::{
    InvocationId, InvocationSummary, NodeOutput, NodeRun, Payload, RunStatus, StoredOutput,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Entry point to the engine: graph registry, invocations and output queries
pub struct Runtime {
    registry: GraphRegistry,
    dispatcher: Arc<Dispatcher>,
    outputs: Arc<dyn OutputStore>,
    events: Arc<dyn EventLog>,
    invocations: RwLock<HashMap<InvocationId, Arc<InvocationContext>>>,
    config: EngineConfig,
}

impl Runtime {
    pub fn new(outputs: Arc<dyn OutputStore>, events: Arc<dyn EventLog>, config: EngineConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(outputs.clone(), events.clone(), &config));
        Self {
            registry: GraphRegistry::new(),
            dispatcher,
            outputs,
            events,
            invocations: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Runtime with in-memory outputs and events
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryOutputStore::new()), Arc::new(MemoryEventLog::new()), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register(&self, graph: Graph) -> GraphResult<Arc<Graph>> {
        self.registry.register(graph)
    }

    /// Build a serialized definition against a function catalog, then register it
    pub fn register_definition(
        &self,
        definition: &GraphDefinition,
        catalog: &FunctionCatalog,
    ) -> GraphResult<Arc<Graph>> {
        self.registry.register(definition.build(catalog)?)
    }

    pub fn deregister(&self, name: &str) -> GraphResult<()> {
        self.registry.deregister(name).map(|_| ())
    }

    pub fn graph(&self, name: &str) -> GraphResult<Arc<Graph>> {
        self.registry.get(name)
    }

    pub fn get_graph(&self, name: &str) -> GraphResult<GraphDefinition> {
        Ok(self.registry.get(name)?.definition())
    }

    pub fn list_graphs(&self) -> GraphResult<Vec<GraphDefinition>> {
        Ok(self.registry.list()?.iter().map(|graph| graph.definition()).collect())
    }

    /// Start an invocation and return its id without waiting.
    ///
    /// Nothing is created for an unknown graph or a payload the start node
    /// does not accept.
    pub async fn invoke(&self, graph_name: &str, payload: Payload) -> GraphResult<InvocationId> {
        let graph = self.registry.get(graph_name)?;
        let start = graph.start_node();
        if !start.input().accepts(&payload) {
            return Err(GraphError::TypeMismatch(format!(
                "start node {} expects {}",
                start.name(),
                start.input()
            )));
        }

        let id = InvocationId::new();
        let tracker = InvocationTracker::new(id, graph.name(), start.name(), payload);
        let start_run = tracker.seed()?;
        let ctx = Arc::new(InvocationContext { graph, tracker });

        self.invocations
            .write()
            .map_err(|_| GraphError::Internal("invocation table lock poisoned".to_string()))?
            .insert(id, ctx.clone());

        self.dispatcher
            .record(&ctx, EventType::InvocationStarted { graph: graph_name.to_string() })
            .await;
        tracing::info!("Started invocation {} of graph '{}'", id, graph_name);

        self.dispatcher.schedule(&ctx, start_run);
        Ok(id)
    }

    /// Start an invocation and block until it is terminal.
    ///
    /// On timeout the invocation keeps running; the error carries its id.
    pub async fn invoke_and_wait(
        &self,
        graph_name: &str,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> GraphResult<InvocationId> {
        let id = self.invoke(graph_name, payload).await?;
        self.block_until_done(id, timeout.unwrap_or_else(|| self.config.block_timeout()))
            .await?;
        Ok(id)
    }

    /// Wait for an invocation to reach its terminal state
    pub async fn block_until_done(&self, id: InvocationId, timeout: Duration) -> GraphResult<InvocationSummary> {
        let ctx = self.context(id)?;
        ctx.tracker.wait(timeout).await
    }

    fn context(&self, id: InvocationId) -> GraphResult<Arc<InvocationContext>> {
        self.invocations
            .read()
            .map_err(|_| GraphError::Internal("invocation table lock poisoned".to_string()))?
            .get(&id)
            .cloned()
            .ok_or_else(|| GraphError::not_found("invocation", id.to_string()))
    }

    /// Look up an invocation, requiring it to belong to the named graph
    fn context_for(&self, graph_name: &str, id: InvocationId) -> GraphResult<Arc<InvocationContext>> {
        let ctx = self.context(id)?;
        if ctx.tracker.graph() != graph_name {
            return Err(GraphError::not_found("invocation", format!("{}/{}", graph_name, id)));
        }
        Ok(ctx)
    }

    /// Successful payloads of a node, in run creation order.
    ///
    /// Only runs that have completed contribute, so repeated calls observe a
    /// growing sequence. Failed runs are excluded; see `results`.
    pub async fn outputs(&self, graph_name: &str, id: InvocationId, node: &str) -> GraphResult<Vec<Payload>> {
        Ok(self
            .results(graph_name, id, node)
            .await?
            .into_iter()
            .filter_map(|stored| match stored.output {
                NodeOutput::Payload(payload) => Some(payload),
                NodeOutput::Error(_) => None,
            })
            .collect())
    }

    /// Payloads and error records of a node's completed runs, in creation order
    pub async fn results(&self, graph_name: &str, id: InvocationId, node: &str) -> GraphResult<Vec<StoredOutput>> {
        let ctx = self.context_for(graph_name, id)?;
        if !ctx.graph.contains_node(node) {
            return Err(GraphError::not_found("node", node));
        }

        let statuses = ctx.tracker.run_statuses(node)?;
        let stored = self.outputs.get_all(id, node).await?;

        // Writes from cancelled runs are never visible
        Ok(stored
            .into_iter()
            .filter(|stored| {
                matches!(
                    (statuses.get(&stored.record.index), &stored.output),
                    (Some(RunStatus::Succeeded), NodeOutput::Payload(_))
                        | (Some(RunStatus::Failed), NodeOutput::Error(_))
                )
            })
            .collect())
    }

    pub fn invocation(&self, graph_name: &str, id: InvocationId) -> GraphResult<InvocationSummary> {
        self.context_for(graph_name, id)?.tracker.summary()
    }

    /// Invocations of a registered graph, oldest first (ties broken by id)
    pub fn list_invocations(&self, graph_name: &str) -> GraphResult<Vec<InvocationSummary>> {
        self.registry.get(graph_name)?;

        let contexts: Vec<Arc<InvocationContext>> = self
            .invocations
            .read()
            .map_err(|_| GraphError::Internal("invocation table lock poisoned".to_string()))?
            .values()
            .filter(|ctx| ctx.tracker.graph() == graph_name)
            .cloned()
            .collect();

        let mut summaries = contexts
            .iter()
            .map(|ctx| ctx.tracker.summary())
            .collect::<GraphResult<Vec<_>>>()?;
        summaries.sort_by_key(|summary| (summary.created_at, summary.id));
        Ok(summaries)
    }

    /// Every run of an invocation in creation order
    pub fn node_runs(&self, graph_name: &str, id: InvocationId) -> GraphResult<Vec<NodeRun>> {
        self.context_for(graph_name, id)?.tracker.runs()
    }

    pub async fn events(&self, graph_name: &str, id: InvocationId) -> GraphResult<Vec<Event>> {
        self.context_for(graph_name, id)?;
        Ok(self.events.invocation_events(id).await?)
    }

    /// Cancel outstanding runs. Runs already executing finish, but their
    /// results are discarded and they spawn nothing.
    pub async fn cancel(&self, graph_name: &str, id: InvocationId) -> GraphResult<InvocationSummary> {
        let ctx = self.context_for(graph_name, id)?;
        let cancelled = ctx.tracker.cancel()?;

        if !cancelled.is_empty() {
            tracing::info!("Cancelled invocation {} ({} runs)", id, cancelled.len());
            self.dispatcher
                .record(&ctx, EventType::InvocationCancelled { cancelled_runs: cancelled.len() })
                .await;
            for run in cancelled {
                self.dispatcher.record(&ctx, EventType::RunCancelled { run }).await;
            }
            self.dispatcher.finish(&ctx).await;
        }

        ctx.tracker.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{node_fn, FunctionNode, RetryPolicy};
    use crate::types::{InvocationStatus, TypeDescriptor};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    fn runtime() -> Runtime {
        Runtime::in_memory(EngineConfig::default())
    }

    fn extractor_graph() -> Graph {
        let extractor_a = FunctionNode::from_fn(
            "extractor_a",
            TypeDescriptor::String,
            TypeDescriptor::record("File"),
            |url| {
                anyhow::ensure!(url == json!("https://example.com"), "unexpected url {}", url);
                Ok(json!({ "data": "hello".repeat(100), "mime_type": "text/plain" }))
            },
        );
        let extractor_b = FunctionNode::from_fn(
            "extractor_b",
            TypeDescriptor::record("File"),
            TypeDescriptor::list(TypeDescriptor::record("FileChunk")),
            |file| {
                let data = file["data"].as_str().unwrap_or_default().to_string();
                Ok(json!([
                    { "data": data, "start": 0, "end": 5 },
                    { "data": data, "start": 5, "end": data.len() },
                ]))
            },
        );
        let extractor_c = FunctionNode::from_fn(
            "extractor_c",
            TypeDescriptor::record("FileChunk"),
            TypeDescriptor::record("SomeMetadata"),
            |chunk| Ok(json!({ "metadata": { "a": "b", "c": "d" }, "start": chunk["start"] })),
        );

        Graph::new("graph_a", "description of graph_a", extractor_a.clone())
            .with_edge(&extractor_a, &extractor_b)
            .unwrap()
            .with_edge(&extractor_b, &extractor_c)
            .unwrap()
    }

    #[tokio::test]
    async fn test_extractor_graph_fans_out_to_two_outputs() {
        let runtime = runtime();
        runtime.register(extractor_graph()).unwrap();

        let definition = runtime.get_graph("graph_a").unwrap();
        assert_eq!(definition.name, "graph_a");

        let id = runtime
            .invoke_and_wait("graph_a", json!("https://example.com"), Some(WAIT))
            .await
            .unwrap();

        let outputs = runtime.outputs("graph_a", id, "extractor_c").await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0]["start"], json!(0));
        assert_eq!(outputs[1]["start"], json!(5));
        assert_eq!(outputs[0]["metadata"]["a"], json!("b"));

        let summary = runtime.invocation("graph_a", id).unwrap();
        assert_eq!(summary.status, InvocationStatus::Completed);
        assert_eq!(summary.runs_created, 4);

        let runs = runtime.node_runs("graph_a", id).unwrap();
        assert!(runs.iter().all(|run| run.status == RunStatus::Succeeded));
        assert_eq!(runs[3].element, Some(1));
    }

    #[tokio::test]
    async fn test_empty_fan_out_terminates() {
        let runtime = runtime();
        let split = FunctionNode::from_fn(
            "split",
            TypeDescriptor::String,
            TypeDescriptor::list(TypeDescriptor::String),
            |input| {
                let words: Vec<&str> = input.as_str().unwrap_or_default().split_whitespace().collect();
                Ok(json!(words))
            },
        );
        let upper = FunctionNode::from_fn("upper", TypeDescriptor::String, TypeDescriptor::String, |word| {
            Ok(json!(word.as_str().unwrap_or_default().to_uppercase()))
        });
        runtime
            .register(Graph::new("words", "", split.clone()).with_edge(&split, &upper).unwrap())
            .unwrap();

        let id = runtime.invoke_and_wait("words", json!("   "), Some(WAIT)).await.unwrap();
        assert!(runtime.outputs("words", id, "upper").await.unwrap().is_empty());
        assert_eq!(runtime.invocation("words", id).unwrap().runs_created, 1);

        let id = runtime.invoke_and_wait("words", json!("a b"), Some(WAIT)).await.unwrap();
        assert_eq!(
            runtime.outputs("words", id, "upper").await.unwrap(),
            vec![json!("A"), json!("B")]
        );
    }

    #[tokio::test]
    async fn test_failed_run_does_not_block_siblings() {
        let runtime = runtime();
        let split = FunctionNode::from_fn(
            "split",
            TypeDescriptor::Any,
            TypeDescriptor::list(TypeDescriptor::Integer),
            |_| Ok(json!([1, 2, 3])),
        );
        let check = FunctionNode::from_fn("check", TypeDescriptor::Integer, TypeDescriptor::Integer, |n| {
            anyhow::ensure!(n != json!(2), "two is not allowed");
            Ok(n)
        });
        runtime
            .register(Graph::new("partial", "", split.clone()).with_edge(&split, &check).unwrap())
            .unwrap();

        let id = runtime.invoke_and_wait("partial", json!(null), Some(WAIT)).await.unwrap();

        assert_eq!(
            runtime.outputs("partial", id, "check").await.unwrap(),
            vec![json!(1), json!(3)]
        );
        let results = runtime.results("partial", id, "check").await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[1].output.is_error());

        let summary = runtime.invocation("partial", id).unwrap();
        assert_eq!(summary.status, InvocationStatus::CompletedWithErrors);
        assert_eq!(summary.runs_failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_function_fails_only_its_run() {
        let runtime = runtime();
        let start = FunctionNode::from_fn("start", TypeDescriptor::Any, TypeDescriptor::Any, |_| {
            panic!("bad node")
        });
        runtime.register(Graph::new("panics", "", start)).unwrap();

        let id = runtime.invoke_and_wait("panics", json!(1), Some(WAIT)).await.unwrap();
        let runs = runtime.node_runs("panics", id).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_deref().unwrap_or_default().contains("panicked"));
    }

    #[tokio::test]
    async fn test_block_timeout_leaves_invocation_running() {
        let runtime = runtime();
        let slow = FunctionNode::new(
            "slow",
            TypeDescriptor::Any,
            TypeDescriptor::Any,
            Arc::new(SlowNode(Duration::from_millis(200))),
        );
        runtime.register(Graph::new("slow", "", slow)).unwrap();

        let id = runtime.invoke("slow", json!("x")).await.unwrap();
        let err = runtime
            .block_until_done(id, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Timeout { invocation, .. } if invocation == id));
        assert_eq!(runtime.invocation("slow", id).unwrap().status, InvocationStatus::Running);

        let summary = runtime.block_until_done(id, WAIT).await.unwrap();
        assert_eq!(summary.status, InvocationStatus::Completed);
        assert_eq!(runtime.outputs("slow", id, "slow").await.unwrap(), vec![json!("x")]);
    }

    struct SlowNode(Duration);

    #[async_trait::async_trait]
    impl crate::function::NodeFunction for SlowNode {
        async fn call(&self, input: Payload) -> anyhow::Result<Payload> {
            tokio::time::sleep(self.0).await;
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_outputs_grow_monotonically() {
        let runtime = runtime();
        let split = FunctionNode::from_fn(
            "split",
            TypeDescriptor::Any,
            TypeDescriptor::list(TypeDescriptor::Integer),
            |_| Ok(json!([30, 60, 90])),
        );
        let sleep = FunctionNode::new(
            "sleep",
            TypeDescriptor::Integer,
            TypeDescriptor::Integer,
            Arc::new(SleepMillis),
        );
        runtime
            .register(Graph::new("staggered", "", split.clone()).with_edge(&split, &sleep).unwrap())
            .unwrap();

        let id = runtime.invoke("staggered", json!(null)).await.unwrap();
        let mut seen = 0;
        loop {
            let outputs = runtime.outputs("staggered", id, "sleep").await.unwrap();
            assert!(outputs.len() >= seen);
            seen = outputs.len();
            if runtime.invocation("staggered", id).unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runtime.outputs("staggered", id, "sleep").await.unwrap().len(), 3);
    }

    struct SleepMillis;

    #[async_trait::async_trait]
    impl crate::function::NodeFunction for SleepMillis {
        async fn call(&self, input: Payload) -> anyhow::Result<Payload> {
            tokio::time::sleep(Duration::from_millis(input.as_u64().unwrap_or_default())).await;
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_unknown_graph_creates_nothing() {
        let runtime = runtime();

        let err = runtime.invoke("missing", json!(1)).await.unwrap_err();
        assert!(matches!(err, GraphError::NotFound { kind: "graph", .. }));
        assert!(runtime.invocations.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_input_type_checked() {
        let runtime = runtime();
        runtime.register(extractor_graph()).unwrap();

        let err = runtime.invoke("graph_a", json!(42)).await.unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch(_)));
        assert!(runtime.list_invocations("graph_a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queries_are_scoped_to_graph() {
        let runtime = runtime();
        runtime.register(extractor_graph()).unwrap();
        let id = runtime
            .invoke_and_wait("graph_a", json!("https://example.com"), Some(WAIT))
            .await
            .unwrap();

        assert!(matches!(
            runtime.outputs("graph_b", id, "extractor_c").await,
            Err(GraphError::NotFound { kind: "invocation", .. })
        ));
        assert!(matches!(
            runtime.outputs("graph_a", id, "extractor_z").await,
            Err(GraphError::NotFound { kind: "node", .. })
        ));
        assert!(matches!(
            runtime.outputs("graph_a", InvocationId::new(), "extractor_c").await,
            Err(GraphError::NotFound { kind: "invocation", .. })
        ));
    }

    #[tokio::test]
    async fn test_router_selects_successors() {
        let runtime = runtime();
        let route = FunctionNode::router(
            "route",
            TypeDescriptor::Integer,
            node_fn(|n| {
                let target = if n.as_i64().unwrap_or_default() % 2 == 0 { "even" } else { "odd" };
                Ok(json!([target]))
            }),
        );
        let even = FunctionNode::from_fn("even", TypeDescriptor::Integer, TypeDescriptor::String, |n| {
            Ok(json!(format!("{} is even", n)))
        });
        let odd = FunctionNode::from_fn("odd", TypeDescriptor::Integer, TypeDescriptor::String, |n| {
            Ok(json!(format!("{} is odd", n)))
        });
        let graph = Graph::new("parity", "", route.clone())
            .with_edge(&route, &even)
            .unwrap()
            .with_edge(&route, &odd)
            .unwrap();
        runtime.register(graph).unwrap();

        let id = runtime.invoke_and_wait("parity", json!(4), Some(WAIT)).await.unwrap();
        assert_eq!(runtime.outputs("parity", id, "even").await.unwrap(), vec![json!("4 is even")]);
        assert!(runtime.outputs("parity", id, "odd").await.unwrap().is_empty());
        assert_eq!(runtime.outputs("parity", id, "route").await.unwrap(), vec![json!(4)]);

        let events = runtime.events("parity", id).await.unwrap();
        assert!(events
            .iter()
            .any(|event| matches!(&event.event_type, EventType::RouteSelected { targets, .. } if targets == &["even"])));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let runtime = runtime();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let flaky = FunctionNode::from_fn("flaky", TypeDescriptor::Any, TypeDescriptor::Any, move |input| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            anyhow::ensure!(call >= 3, "attempt {} failed", call);
            Ok(input)
        })
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            backoff_ms: 1,
        });
        runtime.register(Graph::new("flaky", "", flaky)).unwrap();

        let id = runtime.invoke_and_wait("flaky", json!("ok"), Some(WAIT)).await.unwrap();
        let runs = runtime.node_runs("flaky", id).unwrap();
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        assert_eq!(runs[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_node_timeout_fails_run() {
        let runtime = runtime();
        let slow = FunctionNode::new(
            "slow",
            TypeDescriptor::Any,
            TypeDescriptor::Any,
            Arc::new(SlowNode(Duration::from_secs(10))),
        )
        .with_timeout(Duration::from_millis(20));
        runtime.register(Graph::new("timeouts", "", slow)).unwrap();

        let id = runtime.invoke_and_wait("timeouts", json!(1), Some(WAIT)).await.unwrap();
        let results = runtime.results("timeouts", id, "slow").await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0].output, NodeOutput::Error(message) if message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_cancel_discards_outstanding_runs() {
        let runtime = runtime();
        let start = FunctionNode::new(
            "start",
            TypeDescriptor::Any,
            TypeDescriptor::Any,
            Arc::new(SlowNode(Duration::from_millis(300))),
        );
        let next = FunctionNode::from_fn("next", TypeDescriptor::Any, TypeDescriptor::Any, |input| Ok(input));
        runtime
            .register(Graph::new("cancel", "", start.clone()).with_edge(&start, &next).unwrap())
            .unwrap();

        let id = runtime.invoke("cancel", json!(1)).await.unwrap();
        let summary = runtime.cancel("cancel", id).await.unwrap();
        assert_eq!(summary.status, InvocationStatus::Cancelled);
        runtime.block_until_done(id, Duration::from_millis(1)).await.unwrap();

        // Let the in-flight run finish; its result must be dropped
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(runtime.outputs("cancel", id, "start").await.unwrap().is_empty());
        let runs = runtime.node_runs("cancel", id).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Cancelled);

        let events = runtime.events("cancel", id).await.unwrap();
        assert!(events
            .iter()
            .any(|event| matches!(&event.event_type, EventType::RunCancelled { run } if run == &runs[0].id)));
    }

    #[tokio::test]
    async fn test_convergent_edges_run_independently() {
        let runtime = runtime();
        let start = FunctionNode::from_fn("start", TypeDescriptor::Integer, TypeDescriptor::Integer, |n| Ok(n));
        let left = FunctionNode::from_fn("left", TypeDescriptor::Integer, TypeDescriptor::Integer, |n| {
            Ok(json!(n.as_i64().unwrap_or_default() + 1))
        });
        let right = FunctionNode::from_fn("right", TypeDescriptor::Integer, TypeDescriptor::Integer, |n| {
            Ok(json!(n.as_i64().unwrap_or_default() + 2))
        });
        let join = FunctionNode::from_fn("join", TypeDescriptor::Integer, TypeDescriptor::Integer, |n| Ok(n));
        let graph = Graph::new("diamond", "", start.clone())
            .with_edge(&start, &left)
            .unwrap()
            .with_edge(&start, &right)
            .unwrap()
            .with_edge(&left, &join)
            .unwrap()
            .with_edge(&right, &join)
            .unwrap();
        runtime.register(graph).unwrap();

        let id = runtime.invoke_and_wait("diamond", json!(10), Some(WAIT)).await.unwrap();
        let mut outputs = runtime.outputs("diamond", id, "join").await.unwrap();
        outputs.sort_by_key(|value| value.as_i64());
        assert_eq!(outputs, vec![json!(11), json!(12)]);
    }

    struct PeakTracker {
        active: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait::async_trait]
    impl crate::function::NodeFunction for PeakTracker {
        async fn call(&self, input: Payload) -> anyhow::Result<Payload> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_bounded() {
        let runtime = Runtime::in_memory(EngineConfig {
            max_concurrent_runs: 2,
            ..EngineConfig::default()
        });
        let tracker = Arc::new(PeakTracker {
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        });
        let split = FunctionNode::from_fn(
            "split",
            TypeDescriptor::Any,
            TypeDescriptor::list(TypeDescriptor::Integer),
            |_| Ok(json!([1, 2, 3, 4, 5, 6])),
        );
        let work = FunctionNode::new("work", TypeDescriptor::Integer, TypeDescriptor::Integer, tracker.clone());
        runtime
            .register(Graph::new("bounded", "", split.clone()).with_edge(&split, &work).unwrap())
            .unwrap();

        let id = runtime.invoke_and_wait("bounded", json!(null), Some(WAIT)).await.unwrap();
        assert_eq!(runtime.outputs("bounded", id, "work").await.unwrap().len(), 6);
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_deregister_keeps_running_invocations() {
        let runtime = runtime();
        let slow = FunctionNode::new(
            "slow",
            TypeDescriptor::Any,
            TypeDescriptor::Any,
            Arc::new(SlowNode(Duration::from_millis(50))),
        );
        runtime.register(Graph::new("short_lived", "", slow)).unwrap();

        let id = runtime.invoke("short_lived", json!("kept")).await.unwrap();
        runtime.deregister("short_lived").unwrap();
        assert!(runtime.get_graph("short_lived").is_err());

        runtime.block_until_done(id, WAIT).await.unwrap();
        assert_eq!(runtime.outputs("short_lived", id, "slow").await.unwrap(), vec![json!("kept")]);
    }

    #[tokio::test]
    async fn test_event_log_records_lifecycle() {
        let runtime = runtime();
        runtime.register(extractor_graph()).unwrap();
        let id = runtime
            .invoke_and_wait("graph_a", json!("https://example.com"), Some(WAIT))
            .await
            .unwrap();

        // The completion event is appended right after waiters are released
        tokio::time::sleep(Duration::from_millis(20)).await;
        let events = runtime.events("graph_a", id).await.unwrap();
        assert!(matches!(events[0].event_type, EventType::InvocationStarted { .. }));
        let scheduled = events
            .iter()
            .filter(|event| matches!(event.event_type, EventType::RunScheduled { .. }))
            .count();
        assert_eq!(scheduled, 4);
        assert!(events.iter().any(|event| matches!(
            event.event_type,
            EventType::InvocationCompleted { status: InvocationStatus::Completed, .. }
        )));
    }
}
