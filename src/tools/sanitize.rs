//! Argument sanitization.
//!
//! Raw model arguments are decoded into one typed struct per tool, then every
//! string that can reach an argument vector is checked for shell
//! metacharacters and every bounded integer is range-checked. Violations are
//! rejected, never stripped or clamped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::tools::registry::ToolKind;

/// Characters that are never allowed in a value bound for a process argument.
pub const SHELL_METACHARACTERS: [char; 5] = [';', '|', '>', '<', '&'];

pub const CORES_RANGE: (i64, i64) = (1, 1024);
pub const SQUEUE_LIMIT_RANGE: (i64, i64) = (1, 500);
pub const LINES_RANGE: (i64, i64) = (1, 2000);
pub const DEFAULT_SQUEUE_LIMIT: i64 = 50;
pub const DEFAULT_LINES: i64 = 200;

fn default_limit() -> i64 {
    DEFAULT_SQUEUE_LIMIT
}

fn default_lines() -> i64 {
    DEFAULT_LINES
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Local,
    Slurm,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Slurm => "slurm",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upstream,
    Project,
    #[default]
    All,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Project => "project",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateArgs {
    pub config_path: String,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunArgs {
    pub config_path: String,
    pub profile: Profile,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub cores: Option<i64>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub needs_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportArgs {
    pub config_path: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestArgs {
    pub config_path: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub snakemake_log: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqueueArgs {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub states: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SacctArgs {
    pub job_id: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobArgs {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScancelArgs {
    pub job_id: String,
    #[serde(default = "default_true")]
    pub needs_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TailFileArgs {
    pub path: String,
    #[serde(default = "default_lines")]
    pub lines: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogTailArgs {
    #[serde(default = "default_lines")]
    pub lines: i64,
}

/// Validated, typed arguments for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum SanitizedArguments {
    GmvValidate(ValidateArgs),
    GmvRun(RunArgs),
    GmvReport(ReportArgs),
    GmvAgentHarvest(HarvestArgs),
    SlurmSqueue(SqueueArgs),
    SlurmSacct(SacctArgs),
    SlurmScontrolShowJob(JobArgs),
    SlurmScancel(ScancelArgs),
    TailFile(TailFileArgs),
    ShowLatestSnakemakeLog(LogTailArgs),
}

impl SanitizedArguments {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::GmvValidate(_) => ToolKind::GmvValidate,
            Self::GmvRun(_) => ToolKind::GmvRun,
            Self::GmvReport(_) => ToolKind::GmvReport,
            Self::GmvAgentHarvest(_) => ToolKind::GmvAgentHarvest,
            Self::SlurmSqueue(_) => ToolKind::SlurmSqueue,
            Self::SlurmSacct(_) => ToolKind::SlurmSacct,
            Self::SlurmScontrolShowJob(_) => ToolKind::SlurmScontrolShowJob,
            Self::SlurmScancel(_) => ToolKind::SlurmScancel,
            Self::TailFile(_) => ToolKind::TailFile,
            Self::ShowLatestSnakemakeLog(_) => ToolKind::ShowLatestSnakemakeLog,
        }
    }

    /// JSON view of the normalized arguments, defaults filled in.
    pub fn to_value(&self) -> Value {
        let value = match self {
            Self::GmvValidate(a) => serde_json::to_value(a),
            Self::GmvRun(a) => serde_json::to_value(a),
            Self::GmvReport(a) => serde_json::to_value(a),
            Self::GmvAgentHarvest(a) => serde_json::to_value(a),
            Self::SlurmSqueue(a) => serde_json::to_value(a),
            Self::SlurmSacct(a) => serde_json::to_value(a),
            Self::SlurmScontrolShowJob(a) => serde_json::to_value(a),
            Self::SlurmScancel(a) => serde_json::to_value(a),
            Self::TailFile(a) => serde_json::to_value(a),
            Self::ShowLatestSnakemakeLog(a) => serde_json::to_value(a),
        };
        value.unwrap_or(Value::Null)
    }
}

/// Sanitize raw arguments for `kind`.
pub fn sanitize(kind: ToolKind, args: &Map<String, Value>) -> Result<SanitizedArguments, ToolError> {
    let tool = kind.name();
    let checker = Checker { tool };
    let sanitized = match kind {
        ToolKind::GmvValidate => {
            let a: ValidateArgs = decode(tool, args)?;
            checker.path("config_path", &a.config_path)?;
            SanitizedArguments::GmvValidate(a)
        }
        ToolKind::GmvRun => {
            let a: RunArgs = decode(tool, args)?;
            checker.path("config_path", &a.config_path)?;
            if let Some(cores) = a.cores {
                checker.int("cores", cores, CORES_RANGE)?;
            }
            SanitizedArguments::GmvRun(a)
        }
        ToolKind::GmvReport => {
            let a: ReportArgs = decode(tool, args)?;
            checker.path("config_path", &a.config_path)?;
            checker.opt_token("run_id", a.run_id.as_deref())?;
            SanitizedArguments::GmvReport(a)
        }
        ToolKind::GmvAgentHarvest => {
            let a: HarvestArgs = decode(tool, args)?;
            checker.path("config_path", &a.config_path)?;
            checker.opt_token("run_id", a.run_id.as_deref())?;
            checker.opt_token("snakemake_log", a.snakemake_log.as_deref())?;
            SanitizedArguments::GmvAgentHarvest(a)
        }
        ToolKind::SlurmSqueue => {
            let a: SqueueArgs = decode(tool, args)?;
            checker.opt_token("user", a.user.as_deref())?;
            checker.opt_token("name", a.name.as_deref())?;
            checker.opt_token("states", a.states.as_deref())?;
            checker.int("limit", a.limit, SQUEUE_LIMIT_RANGE)?;
            SanitizedArguments::SlurmSqueue(a)
        }
        ToolKind::SlurmSacct => {
            let a: SacctArgs = decode(tool, args)?;
            checker.job_id(&a.job_id)?;
            for (i, field) in a.fields.iter().enumerate() {
                checker.token(&format!("fields[{i}]"), field)?;
                if field.contains(',') || field.trim().is_empty() {
                    return Err(checker.invalid(
                        &format!("fields[{i}]"),
                        "must be a single non-empty field name",
                    ));
                }
            }
            SanitizedArguments::SlurmSacct(a)
        }
        ToolKind::SlurmScontrolShowJob => {
            let a: JobArgs = decode(tool, args)?;
            checker.job_id(&a.job_id)?;
            SanitizedArguments::SlurmScontrolShowJob(a)
        }
        ToolKind::SlurmScancel => {
            let a: ScancelArgs = decode(tool, args)?;
            checker.job_id(&a.job_id)?;
            SanitizedArguments::SlurmScancel(a)
        }
        ToolKind::TailFile => {
            let a: TailFileArgs = decode(tool, args)?;
            checker.path("path", &a.path)?;
            checker.int("lines", a.lines, LINES_RANGE)?;
            SanitizedArguments::TailFile(a)
        }
        ToolKind::ShowLatestSnakemakeLog => {
            let a: LogTailArgs = decode(tool, args)?;
            checker.int("lines", a.lines, LINES_RANGE)?;
            SanitizedArguments::ShowLatestSnakemakeLog(a)
        }
    };
    Ok(sanitized)
}

fn decode<T: DeserializeOwned>(tool: &str, args: &Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args.clone())).map_err(|e| ToolError::InvalidArgument {
        tool: tool.to_string(),
        field: "arguments".to_string(),
        reason: e.to_string(),
    })
}

/// Whether `value` contains any rejected metacharacter.
pub fn has_shell_metacharacters(value: &str) -> bool {
    value.contains(SHELL_METACHARACTERS)
}

struct Checker<'a> {
    tool: &'a str,
}

impl Checker<'_> {
    fn invalid(&self, field: &str, reason: &str) -> ToolError {
        ToolError::InvalidArgument {
            tool: self.tool.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    fn token(&self, field: &str, value: &str) -> Result<(), ToolError> {
        if has_shell_metacharacters(value) {
            return Err(ToolError::UnsafeArgument {
                tool: self.tool.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        if value.contains('\0') {
            return Err(self.invalid(field, "contains a NUL byte"));
        }
        Ok(())
    }

    fn opt_token(&self, field: &str, value: Option<&str>) -> Result<(), ToolError> {
        match value {
            Some(v) => self.token(field, v),
            None => Ok(()),
        }
    }

    fn path(&self, field: &str, value: &str) -> Result<(), ToolError> {
        self.token(field, value)?;
        if value.trim().is_empty() {
            return Err(self.invalid(field, "must not be empty"));
        }
        Ok(())
    }

    /// Job ids are positional arguments, so they must not look like options.
    fn job_id(&self, value: &str) -> Result<(), ToolError> {
        self.token("job_id", value)?;
        if value.trim().is_empty() {
            return Err(self.invalid("job_id", "must not be empty"));
        }
        if value.starts_with('-') {
            return Err(self.invalid("job_id", "must not start with '-'"));
        }
        Ok(())
    }

    fn int(&self, field: &str, value: i64, (min, max): (i64, i64)) -> Result<(), ToolError> {
        if value < min || value > max {
            return Err(ToolError::OutOfRange {
                tool: self.tool.to_string(),
                field: field.to_string(),
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}
