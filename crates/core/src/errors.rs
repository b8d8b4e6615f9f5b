//! Error types and handling
//!
//! Each domain (command definitions, resolution, the container engine, the
//! container store, settings) has its own error enum. They are wrapped in the
//! top-level [`BerthError`] so library callers can use a single `Result`.

use thiserror::Error;

/// Command definition errors
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command definition parsing error
    #[error("Failed to parse command definition: {message}")]
    Parsing { message: String },

    /// Command definition failed validation
    #[error("Invalid command definition:\n{}",
        errors.iter().map(|e| format!("  {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation { errors: Vec<String> },

    /// Command definition file I/O error
    #[error("Failed to read command definition")]
    Io(#[from] std::io::Error),

    /// Command definition file not found
    #[error("Command definition not found: {path}")]
    NotFound { path: String },
}

/// Errors raised while resolving a command into a launchable specification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// The parent graph of the command's inputs contains a cycle
    #[error("Circular parent reference between inputs: {}", path.join(" -> "))]
    CircularParent { path: Vec<String> },

    /// An input names a parent that is not declared
    #[error("Input \"{input}\" declares parent \"{parent}\", but no input with that name exists")]
    ParentNotFound { input: String, parent: String },

    /// A required input could not be given a value
    #[error("No value could be resolved for required input \"{input}\"")]
    RequiredInput { input: String },

    /// Type-specific derivation failed for an input
    #[error("Could not resolve input \"{input}\": {message}")]
    Input { input: String, message: String },

    /// Host path resolution failed for a mount
    #[error("Could not resolve mount \"{mount}\": {message}")]
    Mount { mount: String, message: String },

    /// Several resources exist and none matches the mount's selector
    #[error("Mount \"{mount}\": source input \"{source_input}\" has several resources and none is labeled {}",
        selector.as_deref().map(|s| format!("\"{}\"", s)).unwrap_or_else(|| "(no resource selector given)".to_string()))]
    AmbiguousResource {
        mount: String,
        source_input: String,
        selector: Option<String>,
    },

    /// A path expression could not be parsed
    #[error("Invalid path expression \"{expression}\": {message}")]
    PathExpression { expression: String, message: String },

    /// A path expression used as a template substring matched several values
    #[error("Path expression \"{expression}\" matched {count} values; expected at most one")]
    MultiplePathResults { expression: String, count: usize },
}

/// Container engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// No container engine server has been configured
    #[error("No container engine server is configured")]
    NotConfigured,

    /// The configured engine could not be reached
    #[error("Container engine is unavailable: {message}")]
    Unavailable { message: String },

    /// Engine CLI command error
    #[error("Engine CLI error: {0}")]
    CLIError(String),

    /// Container not found on the engine
    #[error("Container not found: {id}")]
    ContainerNotFound { id: String },

    /// Service not found on the swarm
    #[error("Service not found: {id}")]
    ServiceNotFound { id: String },
}

impl EngineError {
    /// Whether this error means the engine could not be used at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EngineError::NotConfigured | EngineError::Unavailable { .. })
    }
}

/// Container store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Container record not found
    #[error("Container {id} not found")]
    NotFound { id: i64 },

    /// Store file I/O error
    #[error("Container store I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Store JSON error
    #[error("Container store JSON error")]
    Json(#[from] serde_json::Error),
}

/// Settings and server configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file parsing error
    #[error("Failed to parse settings file: {message}")]
    Parsing { message: String },

    /// Settings validation error
    #[error("Settings validation error: {message}")]
    Validation { message: String },

    /// Settings file I/O error
    #[error("Failed to read settings file")]
    Io(#[from] std::io::Error),

    /// Settings file not found
    #[error("Settings file not found: {path}")]
    NotFound { path: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum BerthError {
    /// Command definition errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Resolution errors
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Container engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Container store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Settings errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Launch errors that are not attributable to the engine
    #[error("Launch error: {message}")]
    Launch { message: String },

    /// Internal/generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Convenience type alias for Results with BerthError
pub type Result<T> = std::result::Result<T, BerthError>;
