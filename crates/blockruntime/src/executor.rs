use blockcore::property::resolve_properties;
use blockcore::{
    Block, BlockGroup, BlockInfo, DefinitionError, EventBus, ExecutionEvent, Flow, FlowError,
    FlowId, LifecycleError, NodeId, NodeSpec, PortRole, Value,
};
use chrono::Utc;
use futures::future::join_all;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::graph::{ActiveRun, NodeStats, RunState, RuntimeFlow, RuntimeNode};
use crate::registry::BlockRegistry;
use crate::router::Router;
use crate::worker::{NodeWorker, Trigger};

/// Turns flow definitions into running node workers and manages their
/// Stopped/Running lifecycle.
pub struct FlowExecutor {
    registry: Arc<BlockRegistry>,
    events: Arc<EventBus>,
    config: EngineConfig,
    flows: RwLock<HashMap<FlowId, Arc<RuntimeFlow>>>,
}

impl FlowExecutor {
    pub fn new(registry: Arc<BlockRegistry>, events: Arc<EventBus>, config: EngineConfig) -> Self {
        Self {
            registry,
            events,
            config,
            flows: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check a flow definition against the registry.
    ///
    /// Rejects empty flows, duplicate node ids, unregistered block types,
    /// dangling connections, out-of-range ports and node configurations the
    /// block's own `validate` refuses.
    pub fn validate(&self, flow: &Flow) -> Result<(), FlowError> {
        let infos = self.check_definition(flow)?;
        for node_spec in &flow.nodes {
            let block = self.instantiate(node_spec)?;
            check_configuration(node_spec, block.as_ref())?;
        }
        warn_unreachable(flow, &infos);
        Ok(())
    }

    /// Everything `validate` checks that does not need a block instance
    fn check_definition<'a>(&self, flow: &'a Flow) -> Result<HashMap<&'a str, BlockInfo>, FlowError> {
        if flow.nodes.is_empty() {
            return Err(DefinitionError::EmptyFlow.into());
        }

        flow.check_structure()?;

        let mut infos: HashMap<&str, BlockInfo> = HashMap::new();
        for node in &flow.nodes {
            let info = self.registry.describe_type(&node.block_type).map_err(|_| {
                DefinitionError::UnknownBlockType {
                    node: node.id.clone(),
                    block_type: node.block_type.clone(),
                }
            })?;
            info.check_shape()
                .map_err(|reason| DefinitionError::InconsistentBlock {
                    block_type: info.block_type.clone(),
                    reason,
                })?;
            infos.insert(node.id.as_str(), info);
        }

        for conn in &flow.connections {
            let source = &infos[conn.source.as_str()];
            if conn.source_port >= source.outputs {
                return Err(DefinitionError::InvalidPort {
                    role: PortRole::Source,
                    node: conn.source.clone(),
                    port: conn.source_port,
                    available: source.outputs,
                }
                .into());
            }

            let target = &infos[conn.target.as_str()];
            if conn.target_port >= target.inputs {
                return Err(DefinitionError::InvalidPort {
                    role: PortRole::Target,
                    node: conn.target.clone(),
                    port: conn.target_port,
                    available: target.inputs,
                }
                .into());
            }
        }

        Ok(infos)
    }

    fn instantiate(&self, node_spec: &NodeSpec) -> Result<Box<dyn Block>, DefinitionError> {
        self.registry
            .create_block(&node_spec.block_type)
            .map_err(|e| DefinitionError::Instantiation {
                node: node_spec.id.clone(),
                reason: e.to_string(),
            })
    }

    /// Validate a flow and build its runtime graph in the Stopped state.
    ///
    /// Re-preparing a stopped flow replaces it; re-preparing a running one
    /// fails before any block is created.
    pub async fn prepare(&self, flow: &Flow) -> Result<Arc<RuntimeFlow>, FlowError> {
        let infos = self
            .check_definition(flow)
            .inspect_err(|e| tracing::warn!(flow_id = %flow.id, error = %e, "Flow validation failed"))?;

        if let Some(existing) = self.runtime(&flow.id).await {
            if existing.is_running().await {
                return Err(LifecycleError::AlreadyRunning(flow.id.clone()).into());
            }
        }

        let mut nodes = Vec::with_capacity(flow.nodes.len());
        for node_spec in &flow.nodes {
            match self.build_node(flow, node_spec).await {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    tracing::warn!(
                        flow_id = %flow.id,
                        node_id = %node_spec.id,
                        error = %e,
                        "Flow preparation failed"
                    );
                    shutdown_blocks(&flow.id, &mut nodes).await;
                    return Err(e);
                }
            }
        }
        warn_unreachable(flow, &infos);

        let runtime = Arc::new(RuntimeFlow::new(
            flow.id.clone(),
            flow.name.clone(),
            flow.connections.clone(),
            nodes,
        ));

        if let Err(e) = self.install(Arc::clone(&runtime)).await {
            release_blocks(&runtime).await;
            return Err(e);
        }

        tracing::info!(
            flow_id = %flow.id,
            flow_name = %flow.name,
            nodes = flow.nodes.len(),
            "Flow prepared"
        );

        Ok(runtime)
    }

    /// Create, check and initialize the block behind one node
    async fn build_node(&self, flow: &Flow, node_spec: &NodeSpec) -> Result<RuntimeNode, FlowError> {
        let mut block = self.instantiate(node_spec)?;
        check_configuration(node_spec, block.as_ref())?;
        block
            .initialize()
            .await
            .map_err(|e| DefinitionError::Instantiation {
                node: node_spec.id.clone(),
                reason: e.to_string(),
            })?;

        let info = block.info();
        let properties = resolve_properties(&info.properties, &node_spec.properties);
        let outputs: Vec<NodeId> = flow.outgoing(&node_spec.id).map(|c| c.target.clone()).collect();

        tracing::debug!(
            flow_id = %flow.id,
            node_id = %node_spec.id,
            node_type = %node_spec.block_type,
            block_group = %info.group,
            connections = outputs.len(),
            "Created runtime node"
        );

        Ok(RuntimeNode::new(
            node_spec,
            info,
            block,
            properties,
            outputs,
            self.config.queue_capacity,
        ))
    }

    /// Put a freshly prepared flow in the map, replacing a stopped one.
    ///
    /// The map lock is never held across an await on a flow's run lock, so a
    /// flow that is slow to stop cannot stall lookups of other flows.
    async fn install(&self, runtime: Arc<RuntimeFlow>) -> Result<(), FlowError> {
        let flow_id = runtime.id().to_string();
        loop {
            let existing = self.runtime(&flow_id).await;
            if let Some(existing) = &existing {
                if existing.is_running().await {
                    return Err(LifecycleError::AlreadyRunning(flow_id).into());
                }
            }

            let mut flows = self.flows.write().await;
            let unchanged = match (&existing, flows.get(&flow_id)) {
                (None, None) => true,
                (Some(seen), Some(current)) => Arc::ptr_eq(seen, current),
                _ => false,
            };
            if !unchanged {
                continue;
            }
            if let Some(existing) = &existing {
                match existing.run.try_read() {
                    Ok(run) if run.active.is_some() => {
                        return Err(LifecycleError::AlreadyRunning(flow_id).into());
                    }
                    Ok(_) => {}
                    // started or stopping since the check above
                    Err(_) => continue,
                }
            }

            let previous = flows.insert(flow_id, runtime);
            drop(flows);
            if let Some(previous) = previous {
                release_blocks(&previous).await;
            }
            return Ok(());
        }
    }

    /// Prepare a flow and start it right away
    pub async fn prepare_and_start(&self, flow: &Flow) -> Result<(), FlowError> {
        self.prepare(flow).await?;
        self.start(&flow.id).await
    }

    async fn runtime(&self, flow_id: &str) -> Option<Arc<RuntimeFlow>> {
        self.flows.read().await.get(flow_id).cloned()
    }

    pub async fn runtime_flow(&self, flow_id: &str) -> Result<Arc<RuntimeFlow>, FlowError> {
        self.runtime(flow_id)
            .await
            .ok_or_else(|| LifecycleError::NotPrepared(flow_id.to_string()).into())
    }

    /// Schedule one worker per node. Returns without waiting for any output.
    pub async fn start(&self, flow_id: &str) -> Result<(), FlowError> {
        let flow = self.runtime_flow(flow_id).await?;
        let mut run = flow.run.write().await;

        if run.active.is_some() {
            return Err(LifecycleError::AlreadyRunning(flow_id.to_string()).into());
        }

        self.recover_nodes(flow_id, &mut run).await?;

        let shutdown = CancellationToken::new();
        let queues = run
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.sender.clone()))
            .collect();
        let router = Arc::new(Router::new(
            flow_id.to_string(),
            queues,
            self.config.overflow,
            Arc::clone(&self.events),
            shutdown.clone(),
        ));

        let mut workers = Vec::with_capacity(run.nodes.len());
        let mut triggers = Vec::new();
        for node in run.nodes.iter_mut() {
            let (Some(block), Some(inbox)) = (node.block.take(), node.inbox.take()) else {
                continue;
            };

            let (trigger_rx, interval) = if node.group() == BlockGroup::Input {
                let (tx, rx) = mpsc::channel(self.config.trigger_capacity.max(1));
                triggers.push((node.id.clone(), tx));
                let interval = block
                    .interval(&node.properties)
                    .unwrap_or_else(|| self.config.default_interval());
                (Some(rx), Some(interval).filter(|d| !d.is_zero()))
            } else {
                (None, None)
            };

            let worker = NodeWorker {
                flow_id: flow_id.to_string(),
                node_id: node.id.clone(),
                group: node.group(),
                block,
                properties: Arc::clone(&node.properties),
                inbox,
                triggers: trigger_rx,
                interval,
                outputs: Arc::clone(&node.outputs),
                router: Arc::clone(&router),
                shutdown: shutdown.clone(),
                state: Arc::clone(&node.state),
                counters: Arc::clone(&node.counters),
                events: Arc::clone(&self.events),
                timeout: self.config.execution_timeout(),
            };
            workers.push(tokio::spawn(worker.run()));
        }

        let node_count = workers.len();
        run.active = Some(ActiveRun {
            shutdown,
            workers,
            triggers,
        });

        self.events.emit(ExecutionEvent::FlowStarted {
            flow_id: flow_id.to_string(),
            nodes: node_count,
            timestamp: Utc::now(),
        });
        tracing::info!(
            flow_id = %flow_id,
            flow_name = %flow.name(),
            nodes = node_count,
            "Flow started"
        );

        Ok(())
    }

    /// Rebuild nodes whose previous worker never handed its parts back
    async fn recover_nodes(&self, flow_id: &str, run: &mut RunState) -> Result<(), FlowError> {
        for node in run.nodes.iter_mut() {
            if node.block.is_none() {
                let mut block = self.registry.create_block(node.block_type()).map_err(|e| {
                    DefinitionError::Instantiation {
                        node: node.id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                block
                    .initialize()
                    .await
                    .map_err(|e| DefinitionError::Instantiation {
                        node: node.id.clone(),
                        reason: e.to_string(),
                    })?;
                tracing::warn!(flow_id = %flow_id, node_id = %node.id, "Re-created block for node");
                node.block = Some(block);
            }
            if node.inbox.is_none() {
                node.reset_queue(self.config.queue_capacity);
            }
        }
        Ok(())
    }

    /// Signal every worker to stop and wait until all of them have exited.
    pub async fn stop(&self, flow_id: &str) -> Result<(), FlowError> {
        let flow = self
            .runtime(flow_id)
            .await
            .ok_or_else(|| LifecycleError::NotRunning(flow_id.to_string()))?;
        halt(&flow, &self.events).await
    }

    /// Whether the flow is currently running
    pub async fn status(&self, flow_id: &str) -> Result<bool, FlowError> {
        let flow = self.runtime_flow(flow_id).await?;
        Ok(flow.is_running().await)
    }

    /// Fire every input node of a running flow once, as if triggered by hand.
    ///
    /// Returns how many input nodes accepted the trigger.
    pub async fn trigger(&self, flow_id: &str, payload: Option<Value>) -> Result<usize, FlowError> {
        let flow = self
            .runtime(flow_id)
            .await
            .ok_or_else(|| LifecycleError::NotRunning(flow_id.to_string()))?;
        let run = flow.run.read().await;
        let active = run
            .active
            .as_ref()
            .ok_or_else(|| LifecycleError::NotRunning(flow_id.to_string()))?;

        let mut fired = 0;
        for (node_id, trigger) in &active.triggers {
            match trigger.try_send(Trigger {
                payload: payload.clone(),
            }) {
                Ok(()) => fired += 1,
                Err(_) => tracing::warn!(
                    flow_id = %flow_id,
                    node_id = %node_id,
                    "Trigger queue full, dropping manual trigger"
                ),
            }
        }

        tracing::debug!(flow_id = %flow_id, fired, "Flow triggered");
        Ok(fired)
    }

    /// Per-node counters of a prepared flow
    pub async fn node_stats(&self, flow_id: &str) -> Result<HashMap<NodeId, NodeStats>, FlowError> {
        Ok(self.runtime_flow(flow_id).await?.stats().await)
    }

    /// Ids of all prepared flows, sorted
    pub async fn flow_ids(&self) -> Vec<FlowId> {
        let mut ids: Vec<FlowId> = self.flows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop the flow if it runs, then drop its runtime graph
    pub async fn discard(&self, flow_id: &str) -> Result<(), FlowError> {
        let flow = self
            .flows
            .write()
            .await
            .remove(flow_id)
            .ok_or_else(|| LifecycleError::NotFound(flow_id.to_string()))?;

        if flow.is_running().await {
            halt(&flow, &self.events).await?;
        }
        release_blocks(&flow).await;

        tracing::info!(flow_id = %flow_id, "Flow discarded");
        Ok(())
    }

    /// Stop every running flow
    pub async fn shutdown(&self) {
        let flows: Vec<Arc<RuntimeFlow>> = self.flows.read().await.values().cloned().collect();
        for flow in flows {
            if flow.is_running().await {
                if let Err(e) = halt(&flow, &self.events).await {
                    tracing::warn!(flow_id = %flow.id(), error = %e, "Failed to stop flow");
                }
            }
        }
    }
}

async fn halt(flow: &RuntimeFlow, events: &EventBus) -> Result<(), FlowError> {
    let mut run = flow.run.write().await;
    let ActiveRun {
        shutdown,
        workers,
        triggers,
    } = run
        .active
        .take()
        .ok_or_else(|| LifecycleError::NotRunning(flow.id().to_string()))?;

    shutdown.cancel();
    drop(triggers);

    for joined in join_all(workers).await {
        match joined {
            Ok(parts) => {
                if let Some(node) = run.nodes.iter_mut().find(|n| n.id == parts.node_id) {
                    node.restore(parts);
                }
            }
            Err(e) => tracing::error!(flow_id = %flow.id(), error = %e, "Node worker aborted"),
        }
    }

    events.emit(ExecutionEvent::FlowStopped {
        flow_id: flow.id().to_string(),
        timestamp: Utc::now(),
    });
    tracing::info!(flow_id = %flow.id(), "Flow stopped");

    Ok(())
}

async fn release_blocks(flow: &RuntimeFlow) {
    let mut run = flow.run.write().await;
    shutdown_blocks(flow.id(), &mut run.nodes).await;
}

async fn shutdown_blocks(flow_id: &str, nodes: &mut [RuntimeNode]) {
    for node in nodes.iter_mut() {
        if let Some(block) = node.block.as_mut() {
            if let Err(e) = block.shutdown().await {
                tracing::warn!(
                    flow_id = %flow_id,
                    node_id = %node.id,
                    error = %e,
                    "Block shutdown failed"
                );
            }
        }
    }
}

fn check_configuration(node_spec: &NodeSpec, block: &dyn Block) -> Result<(), DefinitionError> {
    block
        .validate(&node_spec.properties)
        .map_err(|source| DefinitionError::Configuration {
            node: node_spec.id.clone(),
            source,
        })
}

/// Log nodes that no input node can ever reach
fn warn_unreachable(flow: &Flow, infos: &HashMap<&str, BlockInfo>) {
    let mut graph = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, NodeIndex> = flow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();
    for conn in &flow.connections {
        graph.add_edge(index[conn.source.as_str()], index[conn.target.as_str()], ());
    }

    let mut reached = vec![false; graph.node_count()];
    for node in &flow.nodes {
        if infos[node.id.as_str()].group != BlockGroup::Input {
            continue;
        }
        let mut dfs = Dfs::new(&graph, index[node.id.as_str()]);
        while let Some(nx) = dfs.next(&graph) {
            reached[nx.index()] = true;
        }
    }

    for node in &flow.nodes {
        if !reached[index[node.id.as_str()].index()] {
            tracing::warn!(
                flow_id = %flow.id,
                node_id = %node.id,
                "Node is not reachable from any input node"
            );
        }
    }
}
