use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Saved workflow descriptions, keyed by workflow id
pub type WorkflowMap = BTreeMap<String, Value>;

/// Workflow descriptions persisted as one pretty-printed JSON object.
///
/// Every read goes to disk so edits made outside the server are picked up.
/// Writes are serialized through a lock to keep read-modify-write atomic
/// within this process.
pub struct WorkflowStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl WorkflowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// All saved workflows. A missing, empty or unreadable file counts as none saved.
    pub async fn load_all(&self) -> Result<WorkflowMap> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WorkflowMap::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read workflow file {}", self.path.display())
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(WorkflowMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(workflows) => Ok(workflows),
            Err(e) => {
                tracing::warn!(
                    "Ignoring corrupt workflow file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(WorkflowMap::new())
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.load_all().await?.remove(id))
    }

    pub async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.load_all().await?.into_keys().collect())
    }

    /// Insert or replace a workflow
    pub async fn save(&self, id: &str, description: Value) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut workflows = self.load_all().await?;
        workflows.insert(id.to_string(), description);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create workflow directory")?;
            }
        }

        // Readers never see a half-written file: write aside, then rename over
        let content = serde_json::to_string_pretty(&workflows)?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, content)
            .await
            .with_context(|| format!("Failed to write workflow file {}", staging.display()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("Failed to replace workflow file {}", self.path.display()))?;

        tracing::info!("Saved workflow {} to {}", id, self.path.display());
        Ok(())
    }
}
