use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution settings for the graph engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on node runs executing at once, across all invocations
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Wait used when a blocking invoke does not give its own timeout
    #[serde(default = "default_block_timeout_secs")]
    pub default_block_timeout_secs: u64,

    /// Timeout applied to nodes that do not declare one
    #[serde(default)]
    pub default_node_timeout_secs: Option<u64>,
}

fn default_max_concurrent_runs() -> usize {
    64
}

fn default_block_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            default_block_timeout_secs: default_block_timeout_secs(),
            default_node_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_secs(self.default_block_timeout_secs)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.default_node_timeout_secs.map(Duration::from_secs)
    }
}
