use crate::types::{InvocationId, NodeOutput, OutputRecord, StoredOutput};
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Persistence for node outputs.
///
/// Keys are `(invocation, node, index)` and unique by construction; writing the
/// same key twice is an error. `get_all` returns outputs ordered by index,
/// which is the creation order of the node's runs.
#[async_trait::async_trait]
pub trait OutputStore: Send + Sync {
    /// Store the output (payload or error record) of one node run
    async fn put(
        &self,
        invocation_id: InvocationId,
        node: &str,
        index: u64,
        output: NodeOutput,
    ) -> Result<OutputRecord>;

    /// All outputs of a node for an invocation, ordered by index
    async fn get_all(&self, invocation_id: InvocationId, node: &str) -> Result<Vec<StoredOutput>>;
}

/// Output store kept in process memory
#[derive(Default)]
pub struct MemoryOutputStore {
    outputs: RwLock<HashMap<(InvocationId, String), BTreeMap<u64, StoredOutput>>>,
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl OutputStore for MemoryOutputStore {
    async fn put(
        &self,
        invocation_id: InvocationId,
        node: &str,
        index: u64,
        output: NodeOutput,
    ) -> Result<OutputRecord> {
        let stored = StoredOutput::new(invocation_id, node, index, output)
            .context("Failed to serialize output")?;
        let record = stored.record.clone();

        let mut outputs = self.outputs.write().await;
        let entries = outputs.entry((invocation_id, node.to_string())).or_default();
        if entries.contains_key(&index) {
            bail!("Output {} already stored", record.id);
        }
        entries.insert(index, stored);

        Ok(record)
    }

    async fn get_all(&self, invocation_id: InvocationId, node: &str) -> Result<Vec<StoredOutput>> {
        Ok(self
            .outputs
            .read()
            .await
            .get(&(invocation_id, node.to_string()))
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }
}
