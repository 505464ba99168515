//! Risk classification for tool calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::registry::ToolRegistry;
use crate::tools::sanitize::SanitizedArguments;

/// Risk of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    High,
}

impl RiskLevel {
    /// Classify a sanitized call. Risk depends on argument values, not just the tool.
    pub fn classify(args: &SanitizedArguments) -> Self {
        match args {
            SanitizedArguments::GmvRun(run) if run.dry_run => Self::Low,
            SanitizedArguments::GmvRun(_) => Self::High,
            SanitizedArguments::SlurmScancel(_) => Self::High,
            SanitizedArguments::GmvValidate(_)
            | SanitizedArguments::GmvReport(_)
            | SanitizedArguments::GmvAgentHarvest(_)
            | SanitizedArguments::SlurmSqueue(_)
            | SanitizedArguments::SlurmSacct(_)
            | SanitizedArguments::SlurmScontrolShowJob(_)
            | SanitizedArguments::TailFile(_)
            | SanitizedArguments::ShowLatestSnakemakeLog(_) => Self::Low,
        }
    }

    /// Classify straight from raw model output. Anything that cannot be looked
    /// up or sanitized is `High`.
    pub fn classify_raw(registry: &ToolRegistry, name: &str, raw: &Value) -> Self {
        let Some(map) = raw.as_object() else {
            return Self::High;
        };
        match registry.sanitize(name, map) {
            Ok(args) => Self::classify(&args),
            Err(_) => Self::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(name: &str, raw: Value) -> RiskLevel {
        RiskLevel::classify_raw(&ToolRegistry::new(), name, &raw)
    }

    #[test]
    fn test_run_risk_depends_on_dry_run() {
        let base = json!({"config_path": "c.yaml", "profile": "local"});
        assert_eq!(classify("gmv_run", base.clone()), RiskLevel::High);

        let mut dry = base.clone();
        dry["dry_run"] = json!(true);
        assert_eq!(classify("gmv_run", dry), RiskLevel::Low);

        let mut wet = base;
        wet["dry_run"] = json!(false);
        assert_eq!(classify("gmv_run", wet), RiskLevel::High);
    }

    #[test]
    fn test_scancel_always_high() {
        assert_eq!(classify("slurm_scancel", json!({"job_id": "123"})), RiskLevel::High);
        assert_eq!(
            classify(
                "slurm_scancel",
                json!({"job_id": "123", "needs_confirmation": false})
            ),
            RiskLevel::High
        );
    }

    #[test]
    fn test_read_only_tools_low() {
        assert_eq!(classify("slurm_squeue", json!({})), RiskLevel::Low);
        assert_eq!(classify("tail_file", json!({"path": "x.log"})), RiskLevel::Low);
        assert_eq!(
            classify("gmv_validate", json!({"config_path": "c.yaml"})),
            RiskLevel::Low
        );
    }

    #[test]
    fn test_fail_closed() {
        assert_eq!(classify("unknown_tool", json!({})), RiskLevel::High);
        assert_eq!(classify("slurm_squeue", json!("not an object")), RiskLevel::High);
        assert_eq!(
            classify("tail_file", json!({"path": "x.log", "lines": -1})),
            RiskLevel::High
        );
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"high\"");
        assert_eq!(RiskLevel::Low.to_string(), "low");
    }
}
