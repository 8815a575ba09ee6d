use crate::types::{Payload, TypeDescriptor};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callable logic behind a function node.
///
/// The engine treats it as opaque: a payload goes in, a payload comes out.
/// Collection-typed nodes return a JSON array; routers return the names of
/// the successors that should receive their input.
#[async_trait::async_trait]
pub trait NodeFunction: Send + Sync {
    async fn call(&self, input: Payload) -> Result<Payload>;
}

/// Adapter for plain synchronous closures
pub struct FnNode<F>(pub F);

#[async_trait::async_trait]
impl<F> NodeFunction for FnNode<F>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync,
{
    async fn call(&self, input: Payload) -> Result<Payload> {
        (self.0)(input)
    }
}

/// Wrap a synchronous closure as a shareable node function
pub fn node_fn<F>(f: F) -> Arc<dyn NodeFunction>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync + 'static,
{
    Arc::new(FnNode(f))
}

/// Kind of node in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Compute,
    /// Forwards its input to the successors it selects at runtime
    Router,
}

/// Retry policy for a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Exponential backoff after the given (1-based) failed attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A typed processing step. Immutable once added to a graph.
#[derive(Clone)]
pub struct FunctionNode {
    name: String,
    fn_name: String,
    description: String,
    input: TypeDescriptor,
    output: TypeDescriptor,
    kind: NodeKind,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    function: Arc<dyn NodeFunction>,
}

impl FunctionNode {
    pub fn new(
        name: impl Into<String>,
        input: TypeDescriptor,
        output: TypeDescriptor,
        function: Arc<dyn NodeFunction>,
    ) -> Self {
        let name = name.into();
        Self {
            fn_name: name.clone(),
            name,
            description: String::new(),
            input,
            output,
            kind: NodeKind::Compute,
            timeout: None,
            retry_policy: None,
            function,
        }
    }

    /// Build a compute node from a synchronous closure
    pub fn from_fn<F>(
        name: impl Into<String>,
        input: TypeDescriptor,
        output: TypeDescriptor,
        f: F,
    ) -> Self
    where
        F: Fn(Payload) -> Result<Payload> + Send + Sync + 'static,
    {
        Self::new(name, input, output, node_fn(f))
    }

    /// Build a router. Its output type is its input type since it forwards input unchanged.
    pub fn router(
        name: impl Into<String>,
        input: TypeDescriptor,
        function: Arc<dyn NodeFunction>,
    ) -> Self {
        let mut node = Self::new(name, input.clone(), input, function);
        node.kind = NodeKind::Router;
        node
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_fn_name(mut self, fn_name: impl Into<String>) -> Self {
        self.fn_name = fn_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fn_name(&self) -> &str {
        &self.fn_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input(&self) -> &TypeDescriptor {
        &self.input
    }

    pub fn output(&self) -> &TypeDescriptor {
        &self.output
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn function(&self) -> &Arc<dyn NodeFunction> {
        &self.function
    }

    /// Same declared shape, used when a node is referenced more than once while building
    pub(crate) fn same_signature(&self, other: &FunctionNode) -> bool {
        self.input == other.input && self.output == other.output && self.kind == other.kind
    }
}

impl fmt::Debug for FunctionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionNode")
            .field("name", &self.name)
            .field("fn_name", &self.fn_name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A function available to graphs defined by name rather than in code
#[derive(Clone)]
pub struct CatalogEntry {
    pub fn_name: String,
    pub description: String,
    pub function: Arc<dyn NodeFunction>,
}

/// Listing entry for a catalog function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFunction {
    pub fn_name: String,
    pub description: String,
}

/// Functions that serialized graph definitions can reference by `fn_name`
#[derive(Clone, Default)]
pub struct FunctionCatalog {
    functions: BTreeMap<String, CatalogEntry>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any previous function with the same name
    pub fn register(
        &mut self,
        fn_name: impl Into<String>,
        description: impl Into<String>,
        function: Arc<dyn NodeFunction>,
    ) {
        let fn_name = fn_name.into();
        self.functions.insert(
            fn_name.clone(),
            CatalogEntry {
                fn_name,
                description: description.into(),
                function,
            },
        );
    }

    /// Register a synchronous closure
    pub fn register_fn<F>(&mut self, fn_name: impl Into<String>, description: impl Into<String>, f: F)
    where
        F: Fn(Payload) -> Result<Payload> + Send + Sync + 'static,
    {
        self.register(fn_name, description, node_fn(f));
    }

    pub fn get(&self, fn_name: &str) -> Option<&CatalogEntry> {
        self.functions.get(fn_name)
    }

    pub fn list(&self) -> Vec<CatalogFunction> {
        self.functions
            .values()
            .map(|entry| CatalogFunction {
                fn_name: entry.fn_name.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_node_call() {
        let node = FunctionNode::from_fn(
            "double",
            TypeDescriptor::Integer,
            TypeDescriptor::Integer,
            |input| Ok(json!(input.as_i64().unwrap_or_default() * 2)),
        );

        let output = node.function().call(json!(21)).await.unwrap();
        assert_eq!(output, json!(42));
        assert_eq!(node.fn_name(), "double");
        assert_eq!(node.kind(), NodeKind::Compute);
    }

    #[test]
    fn test_router_output_mirrors_input() {
        let node = FunctionNode::router(
            "route",
            TypeDescriptor::record("File"),
            node_fn(|_| Ok(json!(["a"]))),
        );

        assert_eq!(node.kind(), NodeKind::Router);
        assert_eq!(node.output(), &TypeDescriptor::record("File"));
    }

    #[test]
    fn test_retry_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 100,
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_catalog_lookup() {
        let mut catalog = FunctionCatalog::new();
        catalog.register_fn("identity", "Returns its input", |input| Ok(input));

        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("identity").is_some());
        assert!(catalog.get("missing").is_none());
        assert_eq!(catalog.list()[0].description, "Returns its input");
    }
}
