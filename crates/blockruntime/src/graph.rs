use blockcore::{
    Block, BlockGroup, BlockInfo, Connection, FlowId, Message, NodeId, NodeSpec, NodeState,
    Properties,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::worker::{Trigger, WorkerParts};

/// Snapshot of a node's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Messages taken off the input queue
    pub received: u64,
    /// Calls to the block's `execute`
    pub executions: u64,
    /// Messages enqueued on downstream queues
    pub emitted: u64,
    /// Failed invocations
    pub failed: u64,
    /// Messages this node could not deliver downstream
    pub dropped: u64,
}

/// Live counters shared between a node's worker and its upstream routers
#[derive(Debug, Default)]
pub struct NodeCounters {
    received: AtomicU64,
    executions: AtomicU64,
    emitted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl NodeCounters {
    pub fn snapshot(&self) -> NodeStats {
        NodeStats {
            received: self.received.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self, ok: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// A node of a prepared flow: its block instance, input queue and the
/// downstream nodes its output is forwarded to.
pub struct RuntimeNode {
    pub id: NodeId,
    pub name: String,
    pub info: BlockInfo,
    /// Node properties with declared defaults filled in
    pub properties: Arc<Properties>,
    /// Downstream node ids, one per outgoing connection, in declaration order
    pub outputs: Arc<[NodeId]>,
    pub(crate) block: Option<Box<dyn Block>>,
    pub(crate) sender: mpsc::Sender<Message>,
    pub(crate) inbox: Option<mpsc::Receiver<Message>>,
    pub(crate) state: Arc<RwLock<NodeState>>,
    pub(crate) counters: Arc<NodeCounters>,
}

impl RuntimeNode {
    pub(crate) fn new(
        node_spec: &NodeSpec,
        info: BlockInfo,
        block: Box<dyn Block>,
        properties: Properties,
        outputs: Vec<NodeId>,
        capacity: usize,
    ) -> Self {
        let (sender, inbox) = mpsc::channel(capacity.max(1));
        Self {
            id: node_spec.id.clone(),
            name: node_spec.name.clone(),
            info,
            properties: Arc::new(properties),
            outputs: outputs.into(),
            block: Some(block),
            sender,
            inbox: Some(inbox),
            state: Arc::new(RwLock::new(NodeState::default())),
            counters: Arc::new(NodeCounters::default()),
        }
    }

    pub fn block_type(&self) -> &str {
        &self.info.block_type
    }

    pub fn group(&self) -> BlockGroup {
        self.info.group
    }

    pub fn stats(&self) -> NodeStats {
        self.counters.snapshot()
    }

    /// Replace the input queue with an empty one
    pub(crate) fn reset_queue(&mut self, capacity: usize) {
        let (sender, inbox) = mpsc::channel(capacity.max(1));
        self.sender = sender;
        self.inbox = Some(inbox);
    }

    /// Take back what a finished worker owned, discarding unconsumed messages
    pub(crate) fn restore(&mut self, parts: WorkerParts) {
        let WorkerParts {
            block, mut inbox, ..
        } = parts;
        let mut discarded = 0usize;
        while inbox.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(node_id = %self.id, discarded, "Discarded queued messages");
        }
        self.block = Some(block);
        self.inbox = Some(inbox);
    }
}

/// Everything owned by one Start..Stop cycle
pub(crate) struct ActiveRun {
    pub(crate) shutdown: CancellationToken,
    pub(crate) workers: Vec<JoinHandle<WorkerParts>>,
    pub(crate) triggers: Vec<(NodeId, mpsc::Sender<Trigger>)>,
}

pub(crate) struct RunState {
    pub(crate) nodes: Vec<RuntimeNode>,
    pub(crate) active: Option<ActiveRun>,
}

/// The live instance of a flow definition
pub struct RuntimeFlow {
    id: FlowId,
    name: String,
    connections: Vec<Connection>,
    pub(crate) run: RwLock<RunState>,
}

impl std::fmt::Debug for RuntimeFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeFlow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeFlow {
    pub(crate) fn new(
        id: FlowId,
        name: String,
        connections: Vec<Connection>,
        nodes: Vec<RuntimeNode>,
    ) -> Self {
        Self {
            id,
            name,
            connections,
            run: RwLock::new(RunState {
                nodes,
                active: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub async fn is_running(&self) -> bool {
        self.run.read().await.active.is_some()
    }

    pub async fn node_ids(&self) -> Vec<NodeId> {
        self.run.read().await.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub async fn node_count(&self) -> usize {
        self.run.read().await.nodes.len()
    }

    pub async fn stats(&self) -> HashMap<NodeId, NodeStats> {
        self.run
            .read()
            .await
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.stats()))
            .collect()
    }
}
