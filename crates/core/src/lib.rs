// Core types and engine for Cascade typed function graphs

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod function;
pub mod graph;
pub mod registry;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use engine::Runtime;
pub use error::{GraphError, GraphResult};
pub use function::{node_fn, FunctionCatalog, FunctionNode, NodeFunction, NodeKind, RetryPolicy};
pub use graph::{Graph, GraphDefinition, NodeDefinition};
pub use registry::GraphRegistry;
pub use types::*;
