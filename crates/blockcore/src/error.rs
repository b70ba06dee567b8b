use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while checking a block's property mapping.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required property '{0}'")]
    MissingProperty(String),

    #[error("Invalid type for property '{property}': expected {expected}, got {actual}")]
    InvalidType {
        property: String,
        expected: String,
        actual: String,
    },

    #[error("Property '{property}' value {value} is out of range ({bound})")]
    OutOfRange {
        property: String,
        value: f64,
        bound: String,
    },

    #[error("Property '{property}' does not match pattern '{pattern}'")]
    PatternMismatch { property: String, pattern: String },

    #[error("Property '{property}' must be one of [{allowed}]")]
    InvalidOption { property: String, allowed: String },

    #[error("Property '{property}' exceeds maximum length {max}")]
    InvalidLength { property: String, max: usize },

    #[error("Invalid property '{property}': {reason}")]
    Invalid { property: String, reason: String },
}

impl ConfigError {
    /// Name of the property the error refers to
    pub fn property(&self) -> &str {
        match self {
            ConfigError::MissingProperty(property) => property,
            ConfigError::InvalidType { property, .. }
            | ConfigError::OutOfRange { property, .. }
            | ConfigError::PatternMismatch { property, .. }
            | ConfigError::InvalidOption { property, .. }
            | ConfigError::InvalidLength { property, .. }
            | ConfigError::Invalid { property, .. } => property,
        }
    }
}

/// Errors raised by a single block invocation.
#[derive(Error, Debug, Clone)]
pub enum BlockError {
    #[error("Missing input message")]
    MissingInput,

    #[error("Invalid payload: expected {expected}, got {actual}")]
    InvalidPayload { expected: String, actual: String },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Block initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Block panicked: {0}")]
    Panicked(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum DefinitionError {
    #[error("Flow must contain at least one node")]
    EmptyFlow,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Unknown block type: {0}")]
    UnknownType(String),

    #[error("Unknown block type '{block_type}' in node '{node}'")]
    UnknownBlockType { node: String, block_type: String },

    #[error("Connection references non-existent {role} node '{node}'")]
    UnknownNode { role: PortRole, node: String },

    #[error("Connection references invalid {role} port {port} (node '{node}' has {available})")]
    InvalidPort {
        role: PortRole,
        node: String,
        port: usize,
        available: usize,
    },

    #[error("Block type '{block_type}' declares an inconsistent shape: {reason}")]
    InconsistentBlock { block_type: String, reason: String },

    #[error("Invalid configuration for node '{node}': {source}")]
    Configuration {
        node: String,
        #[source]
        source: ConfigError,
    },

    #[error("Failed to create block for node '{node}': {reason}")]
    Instantiation { node: String, reason: String },
}

/// Which end of a connection an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Source,
    Target,
}

impl std::fmt::Display for PortRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRole::Source => write!(f, "source"),
            PortRole::Target => write!(f, "target"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Flow '{0}' is not prepared for execution")]
    NotPrepared(String),

    #[error("Flow '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Flow '{0}' is not running")]
    NotRunning(String),

    #[error("Flow not found: {0}")]
    NotFound(String),
}
