//! # Cascade SDK
//!
//! Rust client for the Cascade typed function graph engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cascade_sdk::{CascadeClient, CascadeResult};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> CascadeResult<()> {
//!     let client = CascadeClient::builder()
//!         .base_url("http://localhost:8900")
//!         .build()?;
//!
//!     let id = client
//!         .invocations()
//!         .invoke_and_wait("graph_a", serde_json::json!("https://example.com"), Duration::from_secs(30))
//!         .await?;
//!
//!     let outputs = client.invocations().outputs("graph_a", id, "extractor_c").await?;
//!     println!("{} outputs", outputs.outputs.len());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;

// Re-export main client
pub use client::{CascadeClient, CascadeClientBuilder};
pub use config::{ClientConfig, RetryConfig};
pub use error::{CascadeError, CascadeResult};

// Re-export core types for convenience
pub use cascade_core::{
    events::{Event, EventType},
    function::CatalogFunction,
    GraphDefinition, InvocationId, InvocationStatus, InvocationSummary, NodeDefinition, NodeKind,
    NodeRun, NodeRunId, OutputRecord, Payload, RetryPolicy, RunStatus, TypeDescriptor,
};
