//! Configuration types.
//!
//! Everything is built once in `main` and passed by reference; nothing here is
//! global. Model endpoint settings live in `llm::settings`, the pipeline view in
//! `pipeline`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// System prompt sent at the start of every session.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the GMV operations assistant. \
You can only act through the provided tools and must never invent tool results. \
High-risk actions (submitting a real run, cancelling a job) require operator confirmation. \
Keep answers short and report what the tools actually returned.";

/// Chat session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum model round-trips per user turn.
    pub max_steps: usize,
    /// Execute high-risk actions without asking.
    pub auto_approve: bool,
    /// Whether an operator is present to answer confirmation prompts.
    pub interactive: bool,
    /// Describe approved process calls instead of spawning them.
    pub dry_run_tools: bool,
    /// Print assistant text and tool summaries to stdout.
    pub echo: bool,
    pub system_prompt: String,
}

impl SessionConfig {
    /// Set the step budget; anything below 1 is raised to 1.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            auto_approve: false,
            interactive: false,
            dry_run_tools: false,
            echo: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Process executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Program invoked for the pipeline's own subcommands.
    pub pipeline_program: String,
    /// Working directory for every spawned process and relative file reads.
    pub workdir: PathBuf,
    /// Per-process timeout.
    pub timeout: Duration,
    /// Line cap for anything shown to the model or operator.
    pub max_lines: usize,
    /// Byte cap for anything shown to the model or operator.
    pub max_bytes: usize,
    /// Where full, untruncated outputs are persisted.
    pub artifact_dir: PathBuf,
}

impl ExecutorConfig {
    pub fn new(workdir: PathBuf, artifact_dir: PathBuf) -> Self {
        Self {
            pipeline_program: "gmv".to_string(),
            workdir,
            timeout: Duration::from_secs(1800),
            max_lines: 200,
            max_bytes: 20_000,
            artifact_dir,
        }
    }

    /// Apply `GMV_PIPELINE_BIN` and `GMV_TOOL_TIMEOUT_S`.
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(bin) = std::env::var("GMV_PIPELINE_BIN") {
            let bin = bin.trim();
            if !bin.is_empty() {
                self.pipeline_program = bin.to_string();
            }
        }
        if let Ok(raw) = std::env::var("GMV_TOOL_TIMEOUT_S") {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "GMV_TOOL_TIMEOUT_S".to_string(),
                message: format!("expected a whole number of seconds, got {raw:?}"),
            })?;
            self.timeout = Duration::from_secs(secs.max(1));
        }
        Ok(self)
    }
}

/// Whether an environment flag is set to `1`.
pub fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v.trim() == "1").unwrap_or(false)
}
