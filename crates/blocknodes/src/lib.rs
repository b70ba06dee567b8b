//! Built-in block library
//!
//! Inject, arithmetic, delay and debug blocks, plus [`register_all`] to make
//! them available to a registry.

mod debug;
mod delay;
mod inject;
mod math;

pub use debug::DebugBlock;
pub use delay::DelayBlock;
pub use inject::InjectBlock;
pub use math::{MathBlock, MathBlockFactory, Operation};

use blockruntime::{BlockRegistry, DefaultFactory};
use std::sync::Arc;

/// Register all built-in blocks with a registry
pub fn register_all(registry: &BlockRegistry) {
    registry.register(Arc::new(DefaultFactory::<InjectBlock>::new()));
    registry.register(Arc::new(MathBlockFactory::new(Operation::Add)));
    registry.register(Arc::new(MathBlockFactory::new(Operation::Subtract)));
    registry.register(Arc::new(MathBlockFactory::new(Operation::Multiply)));
    registry.register(Arc::new(MathBlockFactory::new(Operation::Divide)));
    registry.register(Arc::new(DefaultFactory::<DelayBlock>::new()));
    registry.register(Arc::new(DefaultFactory::<DebugBlock>::new()));
}

/// A registry holding every built-in block
pub fn builtin_registry() -> BlockRegistry {
    let registry = BlockRegistry::new();
    register_all(&registry);
    registry
}
