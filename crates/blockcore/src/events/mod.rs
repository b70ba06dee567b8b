mod base;

pub use base::{BlockLogger, EventBus, ExecutionEvent, LogLevel};
