use async_trait::async_trait;
use blockcore::{Flow, FlowError, LifecycleError};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Persistence boundary for flow definitions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Insert or overwrite a flow
    async fn save_flow(&self, flow: &Flow) -> Result<(), FlowError>;

    /// Fails with [`LifecycleError::NotFound`] for an unknown id
    async fn load_flow(&self, flow_id: &str) -> Result<Flow, FlowError>;

    async fn load_all_flows(&self) -> Result<Vec<Flow>, FlowError>;

    /// Fails with [`LifecycleError::NotFound`] for an unknown id
    async fn delete_flow(&self, flow_id: &str) -> Result<(), FlowError>;

    async fn flow_exists(&self, flow_id: &str) -> bool;
}

/// In-memory store for tests and embedding
#[derive(Default)]
pub struct MemoryFlowStore {
    flows: RwLock<HashMap<String, Flow>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn save_flow(&self, flow: &Flow) -> Result<(), FlowError> {
        self.flows.write().await.insert(flow.id.clone(), flow.clone());
        Ok(())
    }

    async fn load_flow(&self, flow_id: &str) -> Result<Flow, FlowError> {
        self.flows
            .read()
            .await
            .get(flow_id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(flow_id.to_string()).into())
    }

    async fn load_all_flows(&self) -> Result<Vec<Flow>, FlowError> {
        let mut flows: Vec<Flow> = self.flows.read().await.values().cloned().collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(flows)
    }

    async fn delete_flow(&self, flow_id: &str) -> Result<(), FlowError> {
        self.flows
            .write()
            .await
            .remove(flow_id)
            .map(|_| ())
            .ok_or_else(|| LifecycleError::NotFound(flow_id.to_string()).into())
    }

    async fn flow_exists(&self, flow_id: &str) -> bool {
        self.flows.read().await.contains_key(flow_id)
    }
}

/// Stores each flow as pretty-printed JSON at `<data_dir>/flows/<id>.json`
pub struct FileFlowStore {
    flows_dir: PathBuf,
    lock: RwLock<()>,
}

impl FileFlowStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            flows_dir: data_dir.as_ref().join("flows"),
            lock: RwLock::new(()),
        }
    }

    pub fn flows_dir(&self) -> &Path {
        &self.flows_dir
    }

    fn path_for(&self, flow_id: &str) -> Result<PathBuf, FlowError> {
        if flow_id.is_empty() || flow_id.contains(['/', '\\']) || flow_id.starts_with('.') {
            return Err(FlowError::Storage(format!("invalid flow id '{}'", flow_id)));
        }
        Ok(self.flows_dir.join(format!("{}.json", flow_id)))
    }

    async fn read_flow(path: &Path) -> Result<Flow, FlowError> {
        let data = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl FlowStore for FileFlowStore {
    async fn save_flow(&self, flow: &Flow) -> Result<(), FlowError> {
        let path = self.path_for(&flow.id)?;
        let data = serde_json::to_vec_pretty(flow)?;

        let _guard = self.lock.write().await;
        tokio::fs::create_dir_all(&self.flows_dir).await?;
        tokio::fs::write(&path, data).await?;

        tracing::debug!(flow_id = %flow.id, path = %path.display(), "Flow saved");
        Ok(())
    }

    async fn load_flow(&self, flow_id: &str) -> Result<Flow, FlowError> {
        let path = self.path_for(flow_id)?;
        let _guard = self.lock.read().await;
        match Self::read_flow(&path).await {
            Err(FlowError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(LifecycleError::NotFound(flow_id.to_string()).into())
            }
            other => other,
        }
    }

    async fn load_all_flows(&self) -> Result<Vec<Flow>, FlowError> {
        let _guard = self.lock.read().await;
        let mut entries = match tokio::fs::read_dir(&self.flows_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut flows = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_flow(&path).await {
                Ok(flow) => flows.push(flow),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable flow file"
                ),
            }
        }

        flows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(flows)
    }

    async fn delete_flow(&self, flow_id: &str) -> Result<(), FlowError> {
        let path = self.path_for(flow_id)?;
        let _guard = self.lock.write().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LifecycleError::NotFound(flow_id.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn flow_exists(&self, flow_id: &str) -> bool {
        match self.path_for(flow_id) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
