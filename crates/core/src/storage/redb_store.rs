use super::output::OutputStore;
use crate::types::{InvocationId, NodeOutput, OutputRecord, StoredOutput};
use anyhow::{bail, Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const OUTPUTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("node_outputs");

/// Durable output store backed by redb.
///
/// Keys are `<invocation>/<node>/<index>` with the index zero-padded, so a
/// range scan over the `<invocation>/<node>/` prefix yields creation order.
#[derive(Clone)]
pub struct RedbOutputStore {
    db: Arc<Database>,
}

impl RedbOutputStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create output store directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _outputs_table = write_txn
                .open_table(OUTPUTS_TABLE)
                .context("Failed to open outputs table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn prefix(invocation_id: InvocationId, node: &str) -> String {
        format!("{}/{}/", invocation_id, node)
    }

    fn key(invocation_id: InvocationId, node: &str, index: u64) -> String {
        format!("{}{:020}", Self::prefix(invocation_id, node), index)
    }
}

#[async_trait::async_trait]
impl OutputStore for RedbOutputStore {
    async fn put(
        &self,
        invocation_id: InvocationId,
        node: &str,
        index: u64,
        output: NodeOutput,
    ) -> Result<OutputRecord> {
        let stored = StoredOutput::new(invocation_id, node, index, output)
            .context("Failed to serialize output")?;
        let value = serde_json::to_vec(&stored).context("Failed to serialize stored output")?;
        let key = Self::key(invocation_id, node, index);

        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(OUTPUTS_TABLE)
                .context("Failed to open table")?;

            let exists = table
                .get(key.as_str())
                .context("Failed to read output")?
                .is_some();
            if exists {
                bail!("Output {} already stored", stored.record.id);
            }

            table
                .insert(key.as_str(), value.as_slice())
                .context("Failed to insert output")?;
        }
        write_txn.commit().context("Failed to commit")?;

        Ok(stored.record)
    }

    async fn get_all(&self, invocation_id: InvocationId, node: &str) -> Result<Vec<StoredOutput>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(OUTPUTS_TABLE)
            .context("Failed to open table")?;

        let prefix = Self::prefix(invocation_id, node);
        let mut outputs = Vec::new();
        for item in table
            .range(prefix.as_str()..)
            .context("Failed to scan outputs")?
        {
            let (key, value) = item.context("Failed to read item")?;
            if !key.value().starts_with(prefix.as_str()) {
                break;
            }

            let stored: StoredOutput = serde_json::from_slice(value.value())
                .context("Failed to deserialize output")?;
            // Node names containing '/' can share a prefix with a longer name
            if stored.record.node == node {
                outputs.push(stored);
            }
        }

        Ok(outputs)
    }
}
