use crate::config::EngineConfig;
use crate::executor::FlowExecutor;
use crate::graph::NodeStats;
use crate::registry::BlockRegistry;
use crate::store::FlowStore;
use blockcore::{
    BlockInfo, EventBus, ExecutionEvent, Flow, FlowError, FlowId, LifecycleError, NodeId, Value,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Run state of a flow as reported to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatus {
    pub flow_id: FlowId,
    pub running: bool,
}

/// Entry point tying the registry, the executor and flow storage together
pub struct FlowEngine {
    registry: Arc<BlockRegistry>,
    executor: Arc<FlowExecutor>,
    store: Arc<dyn FlowStore>,
}

impl FlowEngine {
    pub fn new(registry: Arc<BlockRegistry>, store: Arc<dyn FlowStore>, config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = Arc::new(FlowExecutor::new(Arc::clone(&registry), events, config));
        Self {
            registry,
            executor,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<FlowExecutor> {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    /// Validate and persist a flow definition. A running instance keeps its
    /// old definition until it is restarted.
    pub async fn save_flow(&self, mut flow: Flow) -> Result<Flow, FlowError> {
        self.executor.validate(&flow)?;
        flow.updated_at = Utc::now();
        self.store.save_flow(&flow).await?;
        tracing::info!(flow_id = %flow.id, flow_name = %flow.name, "Flow saved");
        Ok(flow)
    }

    pub async fn load_flow(&self, flow_id: &str) -> Result<Flow, FlowError> {
        self.store.load_flow(flow_id).await
    }

    pub async fn list_flows(&self) -> Result<Vec<Flow>, FlowError> {
        self.store.load_all_flows().await
    }

    /// Stop and forget the runtime instance, then remove the stored definition
    pub async fn delete_flow(&self, flow_id: &str) -> Result<(), FlowError> {
        match self.executor.discard(flow_id).await {
            Ok(()) | Err(FlowError::Lifecycle(LifecycleError::NotFound(_))) => {}
            Err(e) => return Err(e),
        }
        self.store.delete_flow(flow_id).await?;
        tracing::info!(flow_id = %flow_id, "Flow deleted");
        Ok(())
    }

    /// Load a stored flow, prepare it and start it
    pub async fn start_flow(&self, flow_id: &str) -> Result<(), FlowError> {
        let flow = self.store.load_flow(flow_id).await?;
        self.executor.prepare_and_start(&flow).await
    }

    pub async fn stop_flow(&self, flow_id: &str) -> Result<(), FlowError> {
        self.executor.stop(flow_id).await
    }

    /// Fire the input nodes of a flow once, starting the flow first when it
    /// is not running. Returns how many input nodes were signalled.
    pub async fn trigger_flow(&self, flow_id: &str, payload: Option<Value>) -> Result<usize, FlowError> {
        let running = matches!(self.executor.status(flow_id).await, Ok(true));
        if !running {
            self.start_flow(flow_id).await?;
        }
        self.executor.trigger(flow_id, payload).await
    }

    /// Report whether a flow is running. A stored flow that was never
    /// started reports `running: false`.
    pub async fn flow_status(&self, flow_id: &str) -> Result<FlowStatus, FlowError> {
        let running = match self.executor.status(flow_id).await {
            Ok(running) => running,
            Err(FlowError::Lifecycle(LifecycleError::NotPrepared(_)))
                if self.store.flow_exists(flow_id).await =>
            {
                false
            }
            Err(FlowError::Lifecycle(LifecycleError::NotPrepared(_))) => {
                return Err(LifecycleError::NotFound(flow_id.to_string()).into())
            }
            Err(e) => return Err(e),
        };
        Ok(FlowStatus {
            flow_id: flow_id.to_string(),
            running,
        })
    }

    pub async fn node_stats(&self, flow_id: &str) -> Result<HashMap<NodeId, NodeStats>, FlowError> {
        self.executor.node_stats(flow_id).await
    }

    pub fn describe_blocks(&self) -> Vec<BlockInfo> {
        self.registry.describe()
    }

    pub fn describe_block(&self, block_type: &str) -> Result<BlockInfo, FlowError> {
        Ok(self.registry.describe_type(block_type)?)
    }

    /// Start every stored flow marked active. Flows that fail to start are
    /// logged and skipped; returns the ids that started.
    pub async fn load_and_start_flows(&self) -> Result<Vec<FlowId>, FlowError> {
        let flows = self.store.load_all_flows().await?;
        let mut started = Vec::new();

        for flow in flows.iter().filter(|f| f.active) {
            match self.executor.prepare_and_start(flow).await {
                Ok(()) => started.push(flow.id.clone()),
                Err(e) => {
                    tracing::error!(flow_id = %flow.id, error = %e, "Failed to start flow");
                }
            }
        }

        tracing::info!(
            stored = flows.len(),
            started = started.len(),
            "Loaded flows from storage"
        );
        Ok(started)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.executor.events().subscribe()
    }

    /// Stop every running flow
    pub async fn shutdown(&self) {
        tracing::info!("Engine shutting down");
        self.executor.shutdown().await;
    }
}
