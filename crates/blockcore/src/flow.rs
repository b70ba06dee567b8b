use crate::property::Properties;
use crate::{DefinitionError, PortRole, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type FlowId = String;
pub type NodeId = String;

/// Complete flow definition, as exchanged with storage and the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub active: bool,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            properties: HashMap::new(),
            created_at: now,
            updated_at: now,
            version: "1.0.0".to_string(),
            active: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<FlowId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        self.updated_at = Utc::now();
        id
    }

    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_port: usize,
        target: impl Into<NodeId>,
        target_port: usize,
    ) {
        self.connections.push(Connection {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            source_port,
            target: target.into(),
            target_port,
            label: None,
        });
        self.updated_at = Utc::now();
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Remove a node together with every connection touching it
    pub fn remove_node(&mut self, id: &str) -> Option<NodeSpec> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(index);
        self.connections.retain(|c| c.source != id && c.target != id);
        self.updated_at = Utc::now();
        Some(node)
    }

    /// Connections leaving `node`, in declaration order
    pub fn outgoing<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source == node)
    }

    /// Registry-independent checks: unique node ids and connections that
    /// only reference declared nodes.
    pub fn check_structure(&self) -> Result<(), DefinitionError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(DefinitionError::DuplicateNode(node.id.clone()));
            }
        }

        for conn in &self.connections {
            if !ids.contains(conn.source.as_str()) {
                return Err(DefinitionError::UnknownNode {
                    role: PortRole::Source,
                    node: conn.source.clone(),
                });
            }
            if !ids.contains(conn.target.as_str()) {
                return Err(DefinitionError::UnknownNode {
                    role: PortRole::Target,
                    node: conn.target.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Node declaration in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub inputs: usize,
    #[serde(default)]
    pub outputs: usize,
    /// Adjacency copy of the connection list kept for external callers
    #[serde(default)]
    pub wires: Vec<Vec<NodeId>>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, block_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: block_type.into(),
            name: String::new(),
            x: 0.0,
            y: 0.0,
            properties: Properties::new(),
            inputs: 0,
            outputs: 0,
            wires: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_ports(mut self, inputs: usize, outputs: usize) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }
}

/// Connection between an output port and an input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub source: NodeId,
    #[serde(default)]
    pub source_port: usize,
    pub target: NodeId,
    #[serde(default)]
    pub target_port: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}
