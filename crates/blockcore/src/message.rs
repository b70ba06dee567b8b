use crate::{NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type MessageId = Uuid;

/// Data envelope passed along a wire between two nodes.
///
/// A message handed to a downstream node is always a [`Message::fork`] of the
/// one the upstream block produced, so no two nodes share an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<NodeId>,
    #[serde(default)]
    pub target: Option<NodeId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, Value>,
}

impl Message {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            topic: None,
            headers: HashMap::new(),
            timestamp: Utc::now(),
            source: None,
            target: None,
            context: HashMap::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_source(mut self, node_id: impl Into<NodeId>) -> Self {
        self.source = Some(node_id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Copy for delivery to another holder: fresh id and timestamp, copied
    /// headers and context, same payload value.
    pub fn fork(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: self.payload.clone(),
            topic: self.topic.clone(),
            headers: self.headers.clone(),
            timestamp: Utc::now(),
            source: self.source.clone(),
            target: self.target.clone(),
            context: self.context.clone(),
        }
    }

    /// Fork carrying a different payload, the usual shape of a
    /// propagation block's output.
    pub fn derive(&self, payload: impl Into<Value>) -> Self {
        let mut out = self.fork();
        out.payload = payload.into();
        out
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.insert(key.into(), value.into());
    }

    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }
}
