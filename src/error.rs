//! Error types for the GMV operations agent.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Harvest error: {0}")]
    Harvest(#[from] HarvestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing API key: set {env_var}=... or add api_key to {file}")]
    MissingApiKey { env_var: String, file: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Model endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Model request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Model request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Model returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response from model: {reason}")]
    InvalidResponse { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Input errors: everything that fails closed before a tool runs.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Malformed arguments for {tool}: {reason}")]
    MalformedArguments { tool: String, reason: String },

    #[error("Invalid argument {field} for {tool}: {reason}")]
    InvalidArgument {
        tool: String,
        field: String,
        reason: String,
    },

    #[error("Unsafe argument {field} for {tool}: contains shell metacharacters: {value:?}")]
    UnsafeArgument {
        tool: String,
        field: String,
        value: String,
    },

    #[error("Argument {field} for {tool} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        tool: String,
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Process execution failures that are not an exit code.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Empty argument vector")]
    EmptyArgv,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Whether the program could not be found on PATH.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Audit log / artifact persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Policy engine, replay and decision log errors.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Malformed record at {path}:{line}: {reason}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Unknown risk level: {0}")]
    UnknownRiskLevel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Resource harvest errors.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("Failed to write overrides to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid log pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
