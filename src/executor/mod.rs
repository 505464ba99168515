//! Process executor for approved tool calls.
//!
//! - `process`: argv-only spawning with a timeout
//! - `output`: tail-preferring line/byte caps
//! - `artifacts`: durable, uniquely named files holding full output
//!
//! The executor only ever sees `SanitizedArguments` that already passed the
//! confirmation gate. Full output is written to an artifact before any bounded
//! view of it is returned.

pub mod artifacts;
pub mod output;
pub mod process;

pub use artifacts::ArtifactStore;
pub use process::{ProcessOutput, run_argv};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ExecutorConfig;
use crate::error::{AuditError, ExecError, ToolError};
use crate::tools::sanitize::SanitizedArguments;
use crate::tools::ToolKind;

/// Default `sacct` columns when the caller names none.
pub const DEFAULT_SACCT_FIELDS: [&str; 7] = [
    "JobID", "State", "ExitCode", "ElapsedRaw", "MaxRSS", "ReqMem", "AllocCPUS",
];

/// Return code for calls refused or declined at the confirmation gate.
pub const RC_NOT_CONFIRMED: i32 = 3;
/// Return code for calls rejected before execution (unknown tool, bad arguments).
pub const RC_INPUT_ERROR: i32 = 2;
/// Return code reported for a process that hit its timeout.
pub const RC_TIMEOUT: i32 = 124;
/// Return code reported when the program could not be started.
pub const RC_SPAWN_FAILED: i32 = 127;

/// How a tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// The process (or in-process read) ran to completion; see `returncode`.
    Completed,
    Timeout,
    SpawnFailed,
    DryRun,
    /// The operator was asked and said no.
    Declined,
    /// High risk, no approval, and nobody to ask.
    NeedsConfirmation,
    InvalidArguments,
    UnknownTool,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::SpawnFailed => "spawn_failed",
            Self::DryRun => "dry_run",
            Self::Declined => "declined",
            Self::NeedsConfirmation => "needs_confirmation",
            Self::InvalidArguments => "invalid_arguments",
            Self::UnknownTool => "unknown_tool",
        }
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub returncode: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub artifact_paths: Vec<PathBuf>,
    /// Bounded text fed back into the conversation.
    pub content_for_llm: String,
}

impl ExecutionResult {
    /// The operator answered no.
    pub fn declined() -> Self {
        Self {
            status: ExecStatus::Declined,
            returncode: RC_NOT_CONFIRMED,
            stdout_tail: String::new(),
            stderr_tail: "operator declined the high-risk action".to_string(),
            artifact_paths: Vec::new(),
            content_for_llm: "USER_CANCELLED: high-risk action not executed.".to_string(),
        }
    }

    /// Refused in non-interactive mode; `preview` is the persisted preview file.
    pub fn needs_confirmation(preview: PathBuf) -> Self {
        Self {
            status: ExecStatus::NeedsConfirmation,
            returncode: RC_NOT_CONFIRMED,
            stdout_tail: String::new(),
            stderr_tail: "confirmation required for a high-risk action \
                          (run interactively or pass --auto-approve)"
                .to_string(),
            artifact_paths: vec![preview],
            content_for_llm: "NEEDS_CONFIRMATION: high-risk action blocked.".to_string(),
        }
    }

    /// Rejected before anything ran.
    pub fn input_error(err: &ToolError) -> Self {
        let status = match err {
            ToolError::UnknownTool { .. } => ExecStatus::UnknownTool,
            _ => ExecStatus::InvalidArguments,
        };
        Self {
            status,
            returncode: RC_INPUT_ERROR,
            stdout_tail: String::new(),
            stderr_tail: err.to_string(),
            artifact_paths: Vec::new(),
            content_for_llm: format!("ERROR: {err}"),
        }
    }

    /// Operator-facing summary block.
    pub fn render_summary(&self, tool: &str) -> String {
        let mut lines = vec![format!("[tool] {tool} rc={}", self.returncode)];
        if !self.stdout_tail.is_empty() {
            lines.push("[stdout_tail]".to_string());
            lines.push(self.stdout_tail.clone());
        }
        if !self.stderr_tail.is_empty() {
            lines.push("[stderr_tail]".to_string());
            lines.push(self.stderr_tail.clone());
        }
        if !self.artifact_paths.is_empty() {
            lines.push("[artifacts]".to_string());
            lines.extend(self.artifact_paths.iter().map(|p| p.display().to_string()));
        }
        format!("{}\n", lines.join("\n").trim())
    }
}

/// Runs approved tool calls.
pub struct ToolExecutor {
    config: ExecutorConfig,
    artifacts: ArtifactStore,
    dry_run: bool,
}

impl ToolExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let artifacts = ArtifactStore::new(config.artifact_dir.clone());
        Self {
            config,
            artifacts,
            dry_run: false,
        }
    }

    /// Describe process calls instead of spawning them. Sessions set this
    /// from [`SessionConfig::dry_run_tools`](crate::config::SessionConfig).
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Argument vector for process-backed tools; `None` for in-process reads.
    pub fn argv(&self, args: &SanitizedArguments) -> Option<Vec<String>> {
        let prog = self.config.pipeline_program.clone();
        let argv: Vec<String> = match args {
            SanitizedArguments::GmvValidate(a) => {
                let mut v = vec![prog, "validate".into(), "--config".into(), a.config_path.clone()];
                if a.strict {
                    v.push("--strict".into());
                }
                v
            }
            SanitizedArguments::GmvRun(a) => {
                let mut v = vec![
                    prog,
                    "run".into(),
                    "--config".into(),
                    a.config_path.clone(),
                    "--profile".into(),
                    a.profile.as_str().into(),
                    "--stage".into(),
                    a.stage.as_str().into(),
                ];
                if a.dry_run {
                    v.push("--dry-run".into());
                }
                if let Some(cores) = a.cores {
                    v.extend(["--cores".into(), cores.to_string()]);
                }
                v
            }
            SanitizedArguments::GmvReport(a) => {
                let mut v = vec![prog, "report".into(), "--config".into(), a.config_path.clone()];
                if let Some(run_id) = non_empty(a.run_id.as_deref()) {
                    v.extend(["--run-id".into(), run_id.into()]);
                }
                v
            }
            SanitizedArguments::GmvAgentHarvest(a) => {
                let mut v = vec![
                    prog,
                    "agent".into(),
                    "harvest".into(),
                    "--config".into(),
                    a.config_path.clone(),
                ];
                if let Some(run_id) = non_empty(a.run_id.as_deref()) {
                    v.extend(["--run-id".into(), run_id.into()]);
                }
                if let Some(log) = non_empty(a.snakemake_log.as_deref()) {
                    v.extend(["--snakemake-log".into(), log.into()]);
                }
                v
            }
            SanitizedArguments::SlurmSqueue(a) => {
                let mut v: Vec<String> = ["squeue", "-h", "-o", "%i|%T|%j|%u|%M|%D|%R"]
                    .into_iter()
                    .map(String::from)
                    .collect();
                for (flag, value) in [("-u", &a.user), ("-n", &a.name), ("-t", &a.states)] {
                    if let Some(value) = non_empty(value.as_deref()) {
                        v.extend([flag.into(), value.into()]);
                    }
                }
                v.extend(["--sort".into(), "i".into()]);
                v
            }
            SanitizedArguments::SlurmSacct(a) => {
                let fields = if a.fields.is_empty() {
                    DEFAULT_SACCT_FIELDS.join(",")
                } else {
                    a.fields.join(",")
                };
                ["sacct", "-X", "-P", "-n", "-j"]
                    .into_iter()
                    .map(String::from)
                    .chain([a.job_id.clone(), "-o".into(), fields])
                    .collect()
            }
            SanitizedArguments::SlurmScontrolShowJob(a) => {
                vec!["scontrol".into(), "show".into(), "job".into(), a.job_id.clone()]
            }
            SanitizedArguments::SlurmScancel(a) => vec!["scancel".into(), a.job_id.clone()],
            SanitizedArguments::TailFile(_) | SanitizedArguments::ShowLatestSnakemakeLog(_) => {
                return None;
            }
        };
        Some(argv)
    }

    /// Execute an approved call.
    ///
    /// Only artifact persistence failures are errors; everything else,
    /// including timeouts and spawn failures, is an `ExecutionResult`.
    pub async fn execute(&self, args: &SanitizedArguments) -> Result<ExecutionResult, AuditError> {
        let tool = args.kind().name();
        match args {
            SanitizedArguments::TailFile(a) => {
                let path = self.resolve_path(&a.path);
                self.read_tail(tool, &path, a.lines as usize, None).await
            }
            SanitizedArguments::ShowLatestSnakemakeLog(a) => {
                let log_root = self.config.workdir.join(".snakemake").join("log");
                match latest_snakemake_log(&log_root) {
                    Some(path) => {
                        let header = format!("==> {}", path.display());
                        self.read_tail(tool, &path, a.lines as usize, Some(header)).await
                    }
                    None => Ok(self.read_error(format!(
                        "ERROR: no snakemake logs found under {}",
                        log_root.display()
                    ))),
                }
            }
            _ => {
                let Some(argv) = self.argv(args) else {
                    return Ok(ExecutionResult::input_error(&ToolError::UnknownTool {
                        name: tool.to_string(),
                    }));
                };
                let line_limit = match args {
                    SanitizedArguments::SlurmSqueue(a) => Some(a.limit as usize),
                    _ => None,
                };
                self.run_process(args.kind(), argv, line_limit).await
            }
        }
    }

    async fn run_process(
        &self,
        kind: ToolKind,
        argv: Vec<String>,
        line_limit: Option<usize>,
    ) -> Result<ExecutionResult, AuditError> {
        let tool = kind.name();
        let cwd = &self.config.workdir;

        if self.dry_run {
            let out = format!("DRY_RUN_TOOL: would run argv={argv:?} cwd={}", cwd.display());
            let artifact = self.artifacts.write(tool, "dryrun.txt", &format!("{out}\n"))?;
            tracing::info!(tool, "Dry-run tool call, nothing spawned");
            return Ok(ExecutionResult {
                status: ExecStatus::DryRun,
                returncode: 0,
                stdout_tail: self.tail(&out),
                stderr_tail: String::new(),
                artifact_paths: vec![artifact],
                content_for_llm: out,
            });
        }

        tracing::info!(tool, program = %argv[0], "Running tool");
        match run_argv(&argv, cwd, &BTreeMap::new(), self.config.timeout).await {
            Ok(output) => {
                let content = format!(
                    "argv={argv:?}\n\n--- stdout ---\n{}\n\n--- stderr ---\n{}\n",
                    output.stdout, output.stderr
                );
                let artifact = self.artifacts.write(tool, "log.txt", &content)?;

                let stdout = match line_limit {
                    Some(limit) => output.stdout.lines().take(limit).collect::<Vec<_>>().join("\n"),
                    None => output.stdout,
                };
                let combined = if output.stderr.is_empty() {
                    stdout.clone()
                } else {
                    format!("{stdout}\n{}", output.stderr)
                };
                tracing::info!(tool, returncode = output.returncode, "Tool finished");
                Ok(ExecutionResult {
                    status: ExecStatus::Completed,
                    returncode: output.returncode,
                    stdout_tail: self.tail(&stdout),
                    stderr_tail: self.tail(&output.stderr),
                    artifact_paths: vec![artifact],
                    content_for_llm: self.tail(&combined),
                })
            }
            Err(ExecError::Timeout { after, .. }) => {
                let message = format!(
                    "TIMEOUT: {tool} did not finish within {}s and was killed; no result was produced.",
                    after.as_secs()
                );
                let artifact = self
                    .artifacts
                    .write(tool, "timeout.txt", &format!("argv={argv:?}\n\n{message}\n"))?;
                tracing::warn!(tool, timeout_s = after.as_secs(), "Tool timed out");
                Ok(ExecutionResult {
                    status: ExecStatus::Timeout,
                    returncode: RC_TIMEOUT,
                    stdout_tail: String::new(),
                    stderr_tail: message.clone(),
                    artifact_paths: vec![artifact],
                    content_for_llm: message,
                })
            }
            Err(err) => {
                let message = format!("ERROR: {err}");
                tracing::warn!(tool, error = %err, "Tool could not be started");
                Ok(ExecutionResult {
                    status: ExecStatus::SpawnFailed,
                    returncode: RC_SPAWN_FAILED,
                    stdout_tail: String::new(),
                    stderr_tail: message.clone(),
                    artifact_paths: Vec::new(),
                    content_for_llm: message,
                })
            }
        }
    }

    async fn read_tail(
        &self,
        tool: &str,
        path: &Path,
        lines: usize,
        header: Option<String>,
    ) -> Result<ExecutionResult, AuditError> {
        let body = match output::tail_file(path, lines).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.read_error(format!("ERROR: file not found: {}", path.display())));
            }
            Err(e) => {
                return Ok(self.read_error(format!(
                    "ERROR: cannot read file: {} ({e})",
                    path.display()
                )));
            }
        };
        let out = match header {
            Some(header) => format!("{header}\n{body}"),
            None => body,
        };
        let artifact = self.artifacts.write(tool, "tail.txt", &format!("{out}\n"))?;
        let view = self.tail(&out);
        Ok(ExecutionResult {
            status: ExecStatus::Completed,
            returncode: 0,
            stdout_tail: view.clone(),
            stderr_tail: String::new(),
            artifact_paths: vec![artifact],
            content_for_llm: view,
        })
    }

    fn read_error(&self, message: String) -> ExecutionResult {
        ExecutionResult {
            status: ExecStatus::Completed,
            returncode: 1,
            stdout_tail: String::new(),
            stderr_tail: message.clone(),
            artifact_paths: Vec::new(),
            content_for_llm: message,
        }
    }

    fn tail(&self, text: &str) -> String {
        output::tail_text(text, self.config.max_lines, self.config.max_bytes)
    }

    /// Expand `~/` and resolve relative paths against the working directory.
    fn resolve_path(&self, raw: &str) -> PathBuf {
        let expanded = match (raw.strip_prefix("~/"), std::env::var_os("HOME")) {
            (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
            _ => PathBuf::from(raw),
        };
        if expanded.is_absolute() {
            expanded
        } else {
            self.config.workdir.join(expanded)
        }
    }
}

/// Most recent `*.snakemake.log` under `log_root`, by file name.
pub fn latest_snakemake_log(log_root: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(log_root).ok()?;
    entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".snakemake.log"))
        })
        .max_by(|a, b| a.file_name().cmp(&b.file_name()))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
