use crate::store::WorkflowStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use toolgraph_core::events::{BroadcastSink, FanoutSink, LoggingSink};
use toolgraph_core::tools::{OpenAiConfig, OpenAiGenerator, ToolRegistry};
use toolgraph_core::workflow::{EngineConfig, UnknownToolPolicy, WorkflowEngine};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: OpenAiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default)]
    pub unknown_tools: UnknownToolPolicy,

    /// Buffered lifecycle events per WebSocket subscriber
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    256
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            unknown_tools: UnknownToolPolicy::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_workflow_file")]
    pub workflow_file: String,
}

fn default_workflow_file() -> String {
    "workflows.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workflow_file: default_workflow_file(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &PathBuf, data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self {
                data_dir: data_dir.clone(),
                engine: Default::default(),
                storage: Default::default(),
                llm: Default::default(),
            }
        };

        config.data_dir = data_dir;
        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        // A zero-capacity broadcast channel cannot be created
        if self.engine.event_buffer == 0 {
            anyhow::bail!("engine.event_buffer must be at least 1");
        }
        if self.engine.tool_timeout_secs == 0 {
            anyhow::bail!("engine.tool_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Get the saved-workflows file path
    pub fn workflow_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.workflow_file)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tool_timeout: Duration::from_secs(self.engine.tool_timeout_secs),
            unknown_tools: self.engine.unknown_tools,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<WorkflowStore>,
    pub engine: Arc<WorkflowEngine>,
    /// Subscription point for WebSocket clients
    pub events: Arc<BroadcastSink>,
    /// Sink handed to every run: tracing plus the broadcast channel
    pub sink: Arc<FanoutSink>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let store = Arc::new(WorkflowStore::new(config.workflow_path()));

        let generator = Arc::new(
            OpenAiGenerator::new(config.llm.clone()).context("Failed to create LLM client")?,
        );
        let registry = Arc::new(ToolRegistry::with_builtins(generator)?);
        tracing::info!("Registered {} tools", registry.len());

        let engine = Arc::new(WorkflowEngine::with_config(
            registry,
            config.engine_config(),
        ));

        let events = Arc::new(BroadcastSink::new(config.engine.event_buffer));
        let sink = Arc::new(
            FanoutSink::new()
                .with(Arc::new(LoggingSink))
                .with(events.clone()),
        );

        Ok(Self {
            store,
            engine,
            events,
            sink,
        })
    }
}
