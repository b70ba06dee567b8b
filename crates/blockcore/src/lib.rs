//! Core abstractions for the block flow engine
//!
//! This crate provides the message envelope, the block capability trait,
//! property declarations, the flow definition document and the error
//! taxonomy. It knows nothing about scheduling.

mod block;
mod error;
pub mod events;
mod flow;
mod message;
pub mod property;
mod value;

pub use block::{
    number_property, string_property, Block, BlockContext, BlockGroup, BlockInfo, NodeState,
};
pub use error::{BlockError, ConfigError, DefinitionError, FlowError, LifecycleError, PortRole};
pub use events::*;
pub use flow::{Connection, Flow, FlowId, NodeId, NodeSpec};
pub use message::{Message, MessageId};
pub use property::{Properties, PropertyDefinition, PropertyType};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
