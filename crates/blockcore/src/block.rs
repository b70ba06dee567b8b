use crate::property::{validate_properties, Properties, PropertyDefinition};
use crate::{BlockError, BlockLogger, ConfigError, FlowId, Message, NodeId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Functional group of a block; selects the scheduling strategy of its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockGroup {
    /// No inputs; produces messages on a timer or manual trigger
    Input,
    /// Consumes one message per invocation, produces zero or more
    Propagation,
    /// Consumes messages, produces nothing
    Action,
}

impl std::fmt::Display for BlockGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockGroup::Input => write!(f, "input"),
            BlockGroup::Propagation => write!(f, "propagation"),
            BlockGroup::Action => write!(f, "action"),
        }
    }
}

/// Static description of a block type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(rename = "block_group")]
    pub group: BlockGroup,
    pub inputs: usize,
    pub outputs: usize,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl BlockInfo {
    /// Start a description with the port counts implied by `group`:
    /// input blocks get 0 inputs / 1 output, propagation 1 / 1, action 1 / 0.
    pub fn new(block_type: impl Into<String>, name: impl Into<String>, group: BlockGroup) -> Self {
        let (inputs, outputs) = match group {
            BlockGroup::Input => (0, 1),
            BlockGroup::Propagation => (1, 1),
            BlockGroup::Action => (1, 0),
        };
        Self {
            block_type: block_type.into(),
            name: name.into(),
            description: String::new(),
            category: "general".to_string(),
            group,
            inputs,
            outputs,
            properties: Vec::new(),
            version: "1.0.0".to_string(),
            author: None,
            icon: None,
            color: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_ports(mut self, inputs: usize, outputs: usize) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>, color: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self.color = Some(color.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Check that the port counts agree with the functional group.
    pub fn check_shape(&self) -> Result<(), String> {
        match self.group {
            BlockGroup::Input if self.inputs != 0 => {
                Err(format!("input blocks take no inputs, declares {}", self.inputs))
            }
            BlockGroup::Action if self.outputs != 0 => {
                Err(format!("action blocks have no outputs, declares {}", self.outputs))
            }
            BlockGroup::Propagation if self.inputs == 0 => {
                Err("propagation blocks need at least one input".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Core trait that every block implements.
///
/// Each runtime node owns its own instance, so `execute` takes `&mut self`
/// and implementations may keep plain per-instance state.
#[async_trait]
pub trait Block: Send + Sync {
    /// Static description: type key, ports, group and property declarations.
    fn info(&self) -> BlockInfo;

    /// Process one invocation.
    ///
    /// Propagation and action blocks always receive `ctx.message`; input
    /// blocks never do. Long waits must watch `ctx.cancellation`.
    async fn execute(
        &mut self,
        ctx: BlockContext,
        properties: &Properties,
    ) -> Result<Vec<Message>, BlockError>;

    /// Check a configuration before any execution.
    fn validate(&self, properties: &Properties) -> Result<(), ConfigError> {
        validate_properties(&self.info().properties, properties)
    }

    /// Firing period of an input block, read from its resolved `interval`
    /// property in milliseconds. `Some(Duration::ZERO)` means manual
    /// triggers only; `None` leaves the choice to the executor.
    fn interval(&self, properties: &Properties) -> Option<Duration> {
        properties
            .get("interval")
            .and_then(Value::to_number)
            .map(|ms| Duration::from_millis(ms.max(0.0) as u64))
    }

    /// Optional: acquire resources when the flow is prepared
    async fn initialize(&mut self) -> Result<(), BlockError> {
        Ok(())
    }

    /// Optional: release resources when the flow is discarded
    async fn shutdown(&mut self) -> Result<(), BlockError> {
        Ok(())
    }
}

/// Execution context passed to each block invocation
#[derive(Clone)]
pub struct BlockContext {
    pub node_id: NodeId,

    pub flow_id: FlowId,

    /// Input message; always `None` for input blocks
    pub message: Option<Message>,

    /// Logger bound to this node
    pub logger: BlockLogger,

    /// Fires when the owning flow is stopping
    pub cancellation: CancellationToken,

    /// Survives across invocations of the same node while the flow is prepared
    pub state: Arc<RwLock<NodeState>>,
}

impl BlockContext {
    pub fn new(node_id: impl Into<NodeId>, flow_id: impl Into<FlowId>, logger: BlockLogger) -> Self {
        Self {
            node_id: node_id.into(),
            flow_id: flow_id.into(),
            message: None,
            logger,
            cancellation: CancellationToken::new(),
            state: Arc::new(RwLock::new(NodeState::default())),
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    /// Get the input message or fail with [`BlockError::MissingInput`]
    pub fn require_message(&self) -> Result<&Message, BlockError> {
        self.message.as_ref().ok_or(BlockError::MissingInput)
    }

    pub async fn get_state(&self, key: &str) -> Option<Value> {
        self.state.read().await.data.get(key).cloned()
    }

    pub async fn set_state(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.write().await.data.insert(key.into(), value.into());
    }
}

/// Per-node key/value store
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub data: HashMap<String, Value>,
}

/// Read a numeric property, naming it in the error
pub fn number_property(properties: &Properties, name: &str) -> Result<f64, ConfigError> {
    let value = properties
        .get(name)
        .ok_or_else(|| ConfigError::MissingProperty(name.to_string()))?;
    value.to_number().ok_or_else(|| ConfigError::InvalidType {
        property: name.to_string(),
        expected: "number".to_string(),
        actual: value.type_name().to_string(),
    })
}

/// Read an optional string property
pub fn string_property<'a>(properties: &'a Properties, name: &str) -> Option<&'a str> {
    properties.get(name).and_then(Value::as_str)
}
