use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registered graphs, sealed behind `Arc` so invocations read them without locking
#[derive(Default)]
pub struct GraphRegistry {
    graphs: RwLock<HashMap<String, Arc<Graph>>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> GraphResult<RwLockReadGuard<'_, HashMap<String, Arc<Graph>>>> {
        self.graphs
            .read()
            .map_err(|_| GraphError::Internal("graph registry lock poisoned".to_string()))
    }

    fn write(&self) -> GraphResult<RwLockWriteGuard<'_, HashMap<String, Arc<Graph>>>> {
        self.graphs
            .write()
            .map_err(|_| GraphError::Internal("graph registry lock poisoned".to_string()))
    }

    /// Validate and register a graph. Names are never replaced; a second
    /// registration under the same name fails and leaves the first intact.
    pub fn register(&self, graph: Graph) -> GraphResult<Arc<Graph>> {
        graph.validate()?;

        let mut graphs = self.write()?;
        if graphs.contains_key(graph.name()) {
            return Err(GraphError::DuplicateName(graph.name().to_string()));
        }

        let graph = Arc::new(graph);
        graphs.insert(graph.name().to_string(), graph.clone());
        tracing::info!(graph = %graph.name(), nodes = graph.node_count(), "Registered graph");
        Ok(graph)
    }

    /// Remove a graph. Invocations already running keep their own handle to it.
    pub fn deregister(&self, name: &str) -> GraphResult<Arc<Graph>> {
        let graph = self
            .write()?
            .remove(name)
            .ok_or_else(|| GraphError::not_found("graph", name))?;
        tracing::info!(graph = %name, "Deregistered graph");
        Ok(graph)
    }

    pub fn get(&self, name: &str) -> GraphResult<Arc<Graph>> {
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::not_found("graph", name))
    }

    /// All registered graphs, sorted by name
    pub fn list(&self) -> GraphResult<Vec<Arc<Graph>>> {
        let mut graphs: Vec<Arc<Graph>> = self.read()?.values().cloned().collect();
        graphs.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(graphs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionNode;
    use crate::types::TypeDescriptor;

    fn graph(name: &str, description: &str) -> Graph {
        let start = FunctionNode::from_fn("start", TypeDescriptor::Any, TypeDescriptor::Any, |input| {
            Ok(input)
        });
        Graph::new(name, description, start)
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let registry = GraphRegistry::new();
        registry.register(graph("graph_a", "first")).unwrap();

        let err = registry.register(graph("graph_a", "second")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName(ref name) if name == "graph_a"));
        assert_eq!(registry.get("graph_a").unwrap().description(), "first");
    }

    #[test]
    fn test_invalid_graph_not_registered() {
        let registry = GraphRegistry::new();
        let mut invalid = graph("broken", "");
        invalid
            .add_node(FunctionNode::from_fn("orphan", TypeDescriptor::Any, TypeDescriptor::Any, |input| {
                Ok(input)
            }))
            .unwrap();

        assert!(registry.register(invalid).is_err());
        assert!(matches!(
            registry.get("broken").unwrap_err(),
            GraphError::NotFound { kind: "graph", .. }
        ));
    }

    #[test]
    fn test_deregister_and_list() {
        let registry = GraphRegistry::new();
        registry.register(graph("b", "")).unwrap();
        registry.register(graph("a", "")).unwrap();

        let names: Vec<String> = registry
            .list()
            .unwrap()
            .iter()
            .map(|g| g.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let held = registry.get("a").unwrap();
        registry.deregister("a").unwrap();
        assert!(registry.get("a").is_err());
        assert_eq!(held.name(), "a");
        assert!(registry.deregister("a").is_err());
    }
}
