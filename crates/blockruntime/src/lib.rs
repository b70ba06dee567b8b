//! Flow execution runtime
//!
//! This crate turns flow definitions into running node graphs: the block
//! registry, the per-node workers and the routing between their queues,
//! flow storage and the engine facade on top.

mod config;
mod engine;
mod executor;
mod graph;
mod registry;
mod router;
mod store;
mod worker;

pub use config::{EngineConfig, OverflowPolicy};
pub use engine::{FlowEngine, FlowStatus};
pub use executor::FlowExecutor;
pub use graph::{NodeCounters, NodeStats, RuntimeFlow, RuntimeNode};
pub use registry::{BlockFactory, BlockRegistry, DefaultFactory};
pub use store::{FileFlowStore, FlowStore, MemoryFlowStore};
