use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What a producer does when a downstream input queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the message for that target and record a warning
    #[default]
    Drop,
    /// Wait for capacity; give up (and count a drop) once the flow stops
    Block,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(OverflowPolicy::Drop),
            "block" => Ok(OverflowPolicy::Block),
            other => Err(format!("unknown overflow policy '{}'", other)),
        }
    }
}

/// Configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of every node's input queue
    pub queue_capacity: usize,
    /// Capacity of an input node's manual trigger queue
    pub trigger_capacity: usize,
    /// Firing period for input blocks that declare no interval
    pub default_interval_ms: u64,
    pub overflow: OverflowPolicy,
    /// Upper bound for a single block invocation
    pub execution_timeout_ms: Option<u64>,
    pub event_buffer_size: usize,
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            trigger_capacity: 16,
            default_interval_ms: 1000,
            overflow: OverflowPolicy::Drop,
            execution_timeout_ms: None,
            event_buffer_size: 1000,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads `BLOCKFLOW_QUEUE_CAPACITY`, `BLOCKFLOW_TRIGGER_CAPACITY`,
    /// `BLOCKFLOW_DEFAULT_INTERVAL_MS`, `BLOCKFLOW_OVERFLOW` (`drop` or
    /// `block`), `BLOCKFLOW_EXECUTION_TIMEOUT_MS`, `BLOCKFLOW_EVENT_BUFFER`
    /// and `BLOCKFLOW_DATA_DIR`. Missing or unparseable values keep their
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: env_or("BLOCKFLOW_QUEUE_CAPACITY", defaults.queue_capacity).max(1),
            trigger_capacity: env_or("BLOCKFLOW_TRIGGER_CAPACITY", defaults.trigger_capacity)
                .max(1),
            default_interval_ms: env_or(
                "BLOCKFLOW_DEFAULT_INTERVAL_MS",
                defaults.default_interval_ms,
            ),
            overflow: env_or("BLOCKFLOW_OVERFLOW", defaults.overflow),
            execution_timeout_ms: std::env::var("BLOCKFLOW_EXECUTION_TIMEOUT_MS")
                .ok()
                .and_then(|raw| parse_or_warn("BLOCKFLOW_EXECUTION_TIMEOUT_MS", &raw))
                .filter(|ms: &u64| *ms > 0),
            event_buffer_size: env_or("BLOCKFLOW_EVENT_BUFFER", defaults.event_buffer_size),
            data_dir: std::env::var("BLOCKFLOW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| parse_or_warn(key, &raw))
        .unwrap_or(default)
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
