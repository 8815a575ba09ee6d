use crate::error::{GraphError, GraphResult};
use crate::function::{FunctionCatalog, FunctionNode, NodeKind, RetryPolicy};
use crate::types::{EdgeRouting, TypeDescriptor};
use chrono::{DateTime, Utc};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// A validated, typed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub routing: EdgeRouting,
}

/// Named DAG of typed function nodes with one start node
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    description: String,
    start_node: String,
    nodes: HashMap<String, FunctionNode>,
    // Outgoing edges per source, in insertion order
    edges: HashMap<String, Vec<Edge>>,
    dag: DiGraph<String, EdgeRouting>,
    indices: HashMap<String, NodeIndex>,
    created_at: DateTime<Utc>,
}

impl Graph {
    /// Create a graph containing only its start node
    pub fn new(name: impl Into<String>, description: impl Into<String>, start_node: FunctionNode) -> Self {
        let mut graph = Self {
            name: name.into(),
            description: description.into(),
            start_node: start_node.name().to_string(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            dag: DiGraph::new(),
            indices: HashMap::new(),
            created_at: Utc::now(),
        };
        graph.insert_node(start_node);
        graph
    }

    fn insert_node(&mut self, node: FunctionNode) {
        let index = self.dag.add_node(node.name().to_string());
        self.indices.insert(node.name().to_string(), index);
        self.nodes.insert(node.name().to_string(), node);
    }

    /// Add a node that edges can reference by name
    pub fn add_node(&mut self, node: FunctionNode) -> GraphResult<()> {
        if self.nodes.contains_key(node.name()) {
            return Err(GraphError::Construction(format!(
                "node {} is already defined in graph {}",
                node.name(),
                self.name
            )));
        }
        self.insert_node(node);
        Ok(())
    }

    /// Add an edge between two existing nodes.
    ///
    /// Fails with `CycleDetected` if the target can already reach the source,
    /// `DuplicateEdge` if the pair already exists, and `TypeMismatch` if the
    /// target cannot accept the source's output (directly or element-wise).
    pub fn add_edge(&mut self, from: &str, to: &str) -> GraphResult<EdgeRouting> {
        let source = self.nodes.get(from).ok_or_else(|| {
            GraphError::Construction(format!("edge source {} is not a node of graph {}", from, self.name))
        })?;
        let target = self.nodes.get(to).ok_or_else(|| {
            GraphError::Construction(format!("edge target {} is not a node of graph {}", to, self.name))
        })?;

        let from_idx = self.indices[from];
        let to_idx = self.indices[to];
        if from_idx == to_idx || has_path_connecting(&self.dag, to_idx, from_idx, None) {
            return Err(GraphError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if self
            .edges
            .get(from)
            .is_some_and(|edges| edges.iter().any(|edge| edge.to == to))
        {
            return Err(GraphError::DuplicateEdge {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let routing = EdgeRouting::resolve(source.output(), target.input()).ok_or_else(|| {
            GraphError::TypeMismatch(format!(
                "{} produces {} but {} expects {}",
                from,
                source.output(),
                to,
                target.input()
            ))
        })?;

        self.dag.add_edge(from_idx, to_idx, routing);
        self.edges.entry(from.to_string()).or_default().push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            routing,
        });

        tracing::debug!(graph = %self.name, from, to, ?routing, "Added edge");
        Ok(routing)
    }

    /// Add an edge, adding either node first if the graph does not know it yet.
    ///
    /// Nodes added here are removed again when the edge is rejected.
    pub fn connect(&mut self, from: &FunctionNode, to: &FunctionNode) -> GraphResult<EdgeRouting> {
        for node in [from, to] {
            if let Some(existing) = self.nodes.get(node.name()) {
                if !existing.same_signature(node) {
                    return Err(GraphError::Construction(format!(
                        "node {} is already defined with a different signature",
                        node.name()
                    )));
                }
            }
        }

        let mut added = Vec::new();
        for node in [from, to] {
            if !self.nodes.contains_key(node.name()) {
                self.insert_node(node.clone());
                added.push(node.name().to_string());
            }
        }

        let routing = self.add_edge(from.name(), to.name());
        if routing.is_err() {
            // Newest first: petgraph only keeps indices stable when removing the last node
            for name in added.iter().rev() {
                self.remove_new_node(name);
            }
        }
        routing
    }

    fn remove_new_node(&mut self, name: &str) {
        if let Some(index) = self.indices.remove(name) {
            self.dag.remove_node(index);
        }
        self.nodes.remove(name);
    }

    /// Builder-style `connect`
    pub fn with_edge(mut self, from: &FunctionNode, to: &FunctionNode) -> GraphResult<Self> {
        self.connect(from, to)?;
        Ok(self)
    }

    /// Final structural check run before registration
    pub fn validate(&self) -> GraphResult<()> {
        let start = self.indices.get(&self.start_node).ok_or_else(|| {
            GraphError::Construction(format!("start node {} is missing", self.start_node))
        })?;

        if self
            .dag
            .neighbors_directed(*start, petgraph::Direction::Incoming)
            .next()
            .is_some()
        {
            return Err(GraphError::Construction(format!(
                "start node {} must not have incoming edges",
                self.start_node
            )));
        }

        let mut reachable = HashSet::new();
        let mut bfs = Bfs::new(&self.dag, *start);
        while let Some(index) = bfs.next(&self.dag) {
            reachable.insert(index);
        }

        let mut unreachable: Vec<&str> = self
            .indices
            .iter()
            .filter(|(_, index)| !reachable.contains(*index))
            .map(|(name, _)| name.as_str())
            .collect();
        if !unreachable.is_empty() {
            unreachable.sort_unstable();
            return Err(GraphError::Construction(format!(
                "nodes not reachable from start node {}: {}",
                self.start_node,
                unreachable.join(", ")
            )));
        }

        if toposort(&self.dag, None).is_err() {
            return Err(GraphError::Construction("graph contains a cycle".to_string()));
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn start_node(&self) -> &FunctionNode {
        &self.nodes[&self.start_node]
    }

    pub fn node(&self, name: &str) -> Option<&FunctionNode> {
        self.nodes.get(name)
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Outgoing edges of a node, in the order they were added
    pub fn successors(&self, name: &str) -> &[Edge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().flatten()
    }

    /// Node names with every node after its predecessors
    pub fn topological_order(&self) -> Vec<String> {
        toposort(&self.dag, None)
            .map(|order| order.into_iter().map(|index| self.dag[index].clone()).collect())
            .unwrap_or_default()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Serializable description of this graph
    pub fn definition(&self) -> GraphDefinition {
        let nodes = self
            .nodes
            .values()
            .map(|node| (node.name().to_string(), NodeDefinition::from(node)))
            .collect();
        let edges = self
            .edges
            .iter()
            .map(|(from, edges)| (from.clone(), edges.iter().map(|edge| edge.to.clone()).collect()))
            .collect();

        GraphDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            start_node: self.start_node.clone(),
            nodes,
            edges,
            created_at: self.created_at,
        }
    }
}

/// Serializable form of a function node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    pub fn_name: String,
    #[serde(default)]
    pub description: String,
    pub input: TypeDescriptor,
    pub output: TypeDescriptor,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl From<&FunctionNode> for NodeDefinition {
    fn from(node: &FunctionNode) -> Self {
        Self {
            name: node.name().to_string(),
            fn_name: node.fn_name().to_string(),
            description: node.description().to_string(),
            input: node.input().clone(),
            output: node.output().clone(),
            kind: node.kind(),
            timeout_secs: node.timeout().map(|timeout| timeout.as_secs()),
            retry_policy: node.retry_policy().cloned(),
        }
    }
}

impl NodeDefinition {
    fn build(&self, catalog: &FunctionCatalog) -> GraphResult<FunctionNode> {
        let entry = catalog
            .get(&self.fn_name)
            .ok_or_else(|| GraphError::not_found("function", &self.fn_name))?;

        let mut node = match self.kind {
            NodeKind::Compute => FunctionNode::new(
                &self.name,
                self.input.clone(),
                self.output.clone(),
                entry.function.clone(),
            ),
            NodeKind::Router => {
                if self.input != self.output {
                    return Err(GraphError::TypeMismatch(format!(
                        "router {} must declare the same input and output type",
                        self.name
                    )));
                }
                FunctionNode::router(&self.name, self.input.clone(), entry.function.clone())
            }
        }
        .with_fn_name(&self.fn_name)
        .with_description(&self.description);

        if let Some(secs) = self.timeout_secs {
            node = node.with_timeout(Duration::from_secs(secs));
        }
        if let Some(policy) = &self.retry_policy {
            node = node.with_retry_policy(policy.clone());
        }
        Ok(node)
    }
}

/// Serializable description of a graph, as registered and as returned by queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_node: String,
    pub nodes: BTreeMap<String, NodeDefinition>,
    #[serde(default)]
    pub edges: BTreeMap<String, Vec<String>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl GraphDefinition {
    /// Rebuild a graph, resolving each node's function from the catalog.
    ///
    /// Runs the same construction operations as code-built graphs, so the
    /// result is validated the same way.
    pub fn build(&self, catalog: &FunctionCatalog) -> GraphResult<Graph> {
        let start = self.nodes.get(&self.start_node).ok_or_else(|| {
            GraphError::Construction(format!(
                "start node {} is not among the nodes of graph {}",
                self.start_node, self.name
            ))
        })?;

        let mut graph = Graph::new(&self.name, &self.description, start.build(catalog)?);
        for (name, definition) in &self.nodes {
            if name != &definition.name {
                return Err(GraphError::Construction(format!(
                    "node key {} does not match node name {}",
                    name, definition.name
                )));
            }
            if name != &self.start_node {
                graph.add_node(definition.build(catalog)?)?;
            }
        }

        for (from, targets) in &self.edges {
            for to in targets {
                graph.add_edge(from, to)?;
            }
        }

        graph.validate()?;
        Ok(graph)
    }
}
