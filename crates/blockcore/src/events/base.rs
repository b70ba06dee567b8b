use crate::{FlowId, NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Events emitted while flows run; the feed a debug/WebSocket relay forwards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    FlowStarted {
        flow_id: FlowId,
        nodes: usize,
        timestamp: DateTime<Utc>,
    },
    FlowStopped {
        flow_id: FlowId,
        timestamp: DateTime<Utc>,
    },
    NodeExecuted {
        flow_id: FlowId,
        node_id: NodeId,
        outputs: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        flow_id: FlowId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    MessageDropped {
        flow_id: FlowId,
        source: NodeId,
        target: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeLog {
        flow_id: FlowId,
        node_id: NodeId,
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        fields: HashMap<String, Value>,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn flow_id(&self) -> &str {
        match self {
            ExecutionEvent::FlowStarted { flow_id, .. }
            | ExecutionEvent::FlowStopped { flow_id, .. }
            | ExecutionEvent::NodeExecuted { flow_id, .. }
            | ExecutionEvent::NodeFailed { flow_id, .. }
            | ExecutionEvent::MessageDropped { flow_id, .. }
            | ExecutionEvent::NodeLog { flow_id, .. } => flow_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger handed to blocks through their execution context.
///
/// Every entry goes to `tracing` with the flow and node attached, and is
/// published on the event bus as [`ExecutionEvent::NodeLog`].
#[derive(Clone)]
pub struct BlockLogger {
    flow_id: FlowId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl BlockLogger {
    pub fn new(
        flow_id: impl Into<FlowId>,
        node_id: impl Into<NodeId>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            node_id: node_id.into(),
            sender,
        }
    }

    /// Logger with a private channel nobody listens to
    pub fn detached(flow_id: impl Into<FlowId>, node_id: impl Into<NodeId>) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(flow_id, node_id, sender)
    }

    pub fn log<'a>(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        fields: impl IntoIterator<Item = (&'a str, Value)>,
    ) {
        let message = message.into();
        let fields: HashMap<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        match level {
            LogLevel::Debug => tracing::debug!(
                flow_id = %self.flow_id, node_id = %self.node_id, ?fields, "{}", message
            ),
            LogLevel::Info => tracing::info!(
                flow_id = %self.flow_id, node_id = %self.node_id, ?fields, "{}", message
            ),
            LogLevel::Warn => tracing::warn!(
                flow_id = %self.flow_id, node_id = %self.node_id, ?fields, "{}", message
            ),
            LogLevel::Error => tracing::error!(
                flow_id = %self.flow_id, node_id = %self.node_id, ?fields, "{}", message
            ),
        }

        let _ = self.sender.send(ExecutionEvent::NodeLog {
            flow_id: self.flow_id.clone(),
            node_id: self.node_id.clone(),
            level,
            message,
            fields,
            timestamp: Utc::now(),
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, [])
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, [])
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, [])
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, [])
    }
}

/// Engine-wide event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; silently dropped when nobody is subscribed
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn logger(&self, flow_id: impl Into<FlowId>, node_id: impl Into<NodeId>) -> BlockLogger {
        BlockLogger::new(flow_id, node_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
