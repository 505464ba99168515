//! Tool registry: the closed vocabulary the model may invoke.

use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::tools::risk::RiskLevel;
use crate::tools::sanitize::{self, SanitizedArguments};

/// Every tool the agent knows about. Adding a tool means adding a variant here,
/// which forces every exhaustive match (argv, risk, schema) to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolKind {
    GmvValidate,
    GmvRun,
    GmvReport,
    GmvAgentHarvest,
    SlurmSqueue,
    SlurmSacct,
    SlurmScontrolShowJob,
    SlurmScancel,
    TailFile,
    ShowLatestSnakemakeLog,
}

impl ToolKind {
    pub const ALL: [ToolKind; 10] = [
        ToolKind::GmvValidate,
        ToolKind::GmvRun,
        ToolKind::GmvReport,
        ToolKind::GmvAgentHarvest,
        ToolKind::SlurmSqueue,
        ToolKind::SlurmSacct,
        ToolKind::SlurmScontrolShowJob,
        ToolKind::SlurmScancel,
        ToolKind::TailFile,
        ToolKind::ShowLatestSnakemakeLog,
    ];

    /// Wire name used by the model.
    pub fn name(self) -> &'static str {
        match self {
            Self::GmvValidate => "gmv_validate",
            Self::GmvRun => "gmv_run",
            Self::GmvReport => "gmv_report",
            Self::GmvAgentHarvest => "gmv_agent_harvest",
            Self::SlurmSqueue => "slurm_squeue",
            Self::SlurmSacct => "slurm_sacct",
            Self::SlurmScontrolShowJob => "slurm_scontrol_show_job",
            Self::SlurmScancel => "slurm_scancel",
            Self::TailFile => "tail_file",
            Self::ShowLatestSnakemakeLog => "show_latest_snakemake_log",
        }
    }

    /// Resolve a wire name. Anything outside the catalogue is `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            Self::GmvValidate => {
                "Run `gmv validate` to check the pipeline config, containers, databases and environment."
            }
            Self::GmvRun => {
                "Run `gmv run` (supports dry-run, stage, profile and cores). \
                 Anything other than a dry-run is a high-risk action and needs confirmation."
            }
            Self::GmvReport => "Run `gmv report` to generate report artifacts.",
            Self::GmvAgentHarvest => {
                "Run `gmv agent harvest` (uses sacct when available) to suggest resources_overrides.yaml."
            }
            Self::SlurmSqueue => "Query the SLURM queue (squeue).",
            Self::SlurmSacct => "Query SLURM accounting records (sacct).",
            Self::SlurmScontrolShowJob => "Show SLURM job details (scontrol show job).",
            Self::SlurmScancel => "Cancel a SLURM job (scancel). Always high risk.",
            Self::TailFile => "Read the last N lines of a file (read-only).",
            Self::ShowLatestSnakemakeLog => {
                "Show the tail of the most recent snakemake log (read-only)."
            }
        }
    }

    fn parameters_schema(self) -> Value {
        use serde_json::json;
        match self {
            Self::GmvValidate => json!({
                "type": "object",
                "properties": {
                    "config_path": {"type": "string"},
                    "strict": {"type": "boolean", "default": false}
                },
                "required": ["config_path"],
                "additionalProperties": false
            }),
            Self::GmvRun => json!({
                "type": "object",
                "properties": {
                    "config_path": {"type": "string"},
                    "profile": {"type": "string", "enum": ["local", "slurm"]},
                    "stage": {"type": "string", "enum": ["upstream", "project", "all"], "default": "all"},
                    "cores": {
                        "type": ["integer", "null"],
                        "minimum": sanitize::CORES_RANGE.0,
                        "maximum": sanitize::CORES_RANGE.1,
                        "default": null
                    },
                    "dry_run": {"type": "boolean", "default": false},
                    "needs_confirmation": {"type": "boolean", "default": false}
                },
                "required": ["config_path", "profile"],
                "additionalProperties": false
            }),
            Self::GmvReport => json!({
                "type": "object",
                "properties": {
                    "config_path": {"type": "string"},
                    "run_id": {"type": ["string", "null"], "default": null}
                },
                "required": ["config_path"],
                "additionalProperties": false
            }),
            Self::GmvAgentHarvest => json!({
                "type": "object",
                "properties": {
                    "config_path": {"type": "string"},
                    "run_id": {"type": ["string", "null"], "default": null},
                    "snakemake_log": {"type": ["string", "null"], "default": null}
                },
                "required": ["config_path"],
                "additionalProperties": false
            }),
            Self::SlurmSqueue => json!({
                "type": "object",
                "properties": {
                    "user": {"type": ["string", "null"], "default": null},
                    "name": {"type": ["string", "null"], "default": null},
                    "states": {"type": ["string", "null"], "default": null},
                    "limit": {
                        "type": "integer",
                        "minimum": sanitize::SQUEUE_LIMIT_RANGE.0,
                        "maximum": sanitize::SQUEUE_LIMIT_RANGE.1,
                        "default": sanitize::DEFAULT_SQUEUE_LIMIT
                    }
                },
                "required": [],
                "additionalProperties": false
            }),
            Self::SlurmSacct => json!({
                "type": "object",
                "properties": {
                    "job_id": {"type": "string"},
                    "fields": {"type": "array", "items": {"type": "string"}, "default": []}
                },
                "required": ["job_id"],
                "additionalProperties": false
            }),
            Self::SlurmScontrolShowJob => json!({
                "type": "object",
                "properties": {"job_id": {"type": "string"}},
                "required": ["job_id"],
                "additionalProperties": false
            }),
            Self::SlurmScancel => json!({
                "type": "object",
                "properties": {
                    "job_id": {"type": "string"},
                    "needs_confirmation": {"type": "boolean", "default": true}
                },
                "required": ["job_id"],
                "additionalProperties": false
            }),
            Self::TailFile => json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "lines": {
                        "type": "integer",
                        "minimum": sanitize::LINES_RANGE.0,
                        "maximum": sanitize::LINES_RANGE.1,
                        "default": sanitize::DEFAULT_LINES
                    }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
            Self::ShowLatestSnakemakeLog => json!({
                "type": "object",
                "properties": {
                    "lines": {
                        "type": "integer",
                        "minimum": sanitize::LINES_RANGE.0,
                        "maximum": sanitize::LINES_RANGE.1,
                        "default": sanitize::DEFAULT_LINES
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable description of one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolSpec {
    fn new(kind: ToolKind) -> Self {
        Self {
            kind,
            name: kind.name(),
            description: kind.description(),
            parameters: kind.parameters_schema(),
        }
    }

    /// Validate raw arguments against this tool's schema.
    pub fn sanitize(&self, args: &Map<String, Value>) -> Result<SanitizedArguments, ToolError> {
        sanitize::sanitize(self.kind, args)
    }

    /// Classify a sanitized call. Pure.
    pub fn classify(&self, args: &SanitizedArguments) -> RiskLevel {
        RiskLevel::classify(args)
    }
}

/// Registry of available tools, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Create the registry with the full catalogue.
    pub fn new() -> Self {
        Self {
            specs: ToolKind::ALL.into_iter().map(ToolSpec::new).collect(),
        }
    }

    /// Look up a tool by wire name. Unknown names fail closed.
    pub fn lookup(&self, name: &str) -> Result<&ToolSpec, ToolError> {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        self.specs
            .iter()
            .find(|spec| spec.kind == kind)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    /// Look up and sanitize in one step.
    pub fn sanitize(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<SanitizedArguments, ToolError> {
        self.lookup(name)?.sanitize(args)
    }

    /// List all tool names.
    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|spec| spec.name).collect()
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.specs.len()
    }

    /// Tool definitions for LLM function calling, sorted by name.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .specs
            .iter()
            .map(|spec| ToolDefinition {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                parameters: spec.parameters.clone(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        let registry = ToolRegistry::new();
        assert_eq!(
            registry.lookup("gmv_run").unwrap().kind,
            ToolKind::GmvRun
        );
        assert!(matches!(
            registry.lookup("rm_rf"),
            Err(ToolError::UnknownTool { .. })
        ));
        assert!(registry.lookup("").is_err());
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_required_tools_present() {
        let registry = ToolRegistry::new();
        let names = registry.names();
        assert!(names.contains(&"gmv_validate"));
        assert!(names.contains(&"gmv_run"));
        assert!(names.contains(&"slurm_scancel"));
        assert_eq!(registry.count(), 10);
    }

    #[test]
    fn test_tool_definitions_sorted() {
        let defs = ToolRegistry::new().tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(defs[0].parameters["type"], "object");
    }

    #[test]
    fn test_schemas_disallow_extra_properties() {
        for def in ToolRegistry::new().tool_definitions() {
            assert_eq!(
                def.parameters["additionalProperties"],
                Value::Bool(false),
                "{} must reject unknown keys",
                def.name
            );
        }
    }
}
