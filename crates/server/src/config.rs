use anyhow::{Context, Result};
use cascade_core::engine::Runtime;
use cascade_core::storage::{MemoryEventLog, MemoryOutputStore, OutputStore, RedbOutputStore};
use cascade_core::{EngineConfig, FunctionCatalog};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where node outputs are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_output_db")]
    pub output_db: String,
}

fn default_output_db() -> String {
    "outputs.redb".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            output_db: default_output_db(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    /// Get the output database path
    pub fn output_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.output_db)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub catalog: Arc<FunctionCatalog>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let outputs: Arc<dyn OutputStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryOutputStore::new()),
            StorageBackend::Redb => Arc::new(
                RedbOutputStore::new(config.output_db_path())
                    .context("Failed to create output store")?,
            ),
        };
        tracing::info!("Output storage: {:?}", config.storage.backend);

        let runtime = Runtime::new(outputs, Arc::new(MemoryEventLog::new()), config.engine.clone());

        Ok(Self {
            runtime: Arc::new(runtime),
            catalog: Arc::new(crate::functions::builtin_catalog()),
        })
    }
}
