use crate::events::{Event, EventLog};
use crate::types::InvocationId;
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process event log keyed by invocation
#[derive(Default)]
pub struct MemoryEventLog {
    events: RwLock<HashMap<InvocationId, Vec<Event>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        self.events
            .write()
            .await
            .entry(event.invocation_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn invocation_events(&self, invocation_id: InvocationId) -> Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .await
            .get(&invocation_id)
            .cloned()
            .unwrap_or_default())
    }
}
