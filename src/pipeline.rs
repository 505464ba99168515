//! Minimal view of the pipeline YAML config.
//!
//! Only the keys the agent needs are read; everything else in the file is
//! ignored and full validation stays with the pipeline itself.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::{EngineConfig, PolicyRisk};

pub const DEFAULT_RUN_ID: &str = "default-run";
pub const DEFAULT_RESULTS_DIR: &str = "results";
pub const DEFAULT_FUDGE: f64 = 1.2;

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    execution: RawExecution,
    #[serde(default)]
    resources: RawResources,
    #[serde(default)]
    agent: RawAgent,
}

#[derive(Debug, Default, Deserialize)]
struct RawExecution {
    run_id: Option<String>,
    results_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResources {
    #[serde(default)]
    estimation: RawEstimation,
}

#[derive(Debug, Default, Deserialize)]
struct RawEstimation {
    fudge: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAgent {
    auto_apply_risk_levels: Option<Vec<String>>,
    retry_limit: Option<i64>,
    low_yield_threshold: Option<i64>,
}

/// Agent-relevant settings from a pipeline config.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config_path: PathBuf,
    pub run_id: String,
    /// Absolute, or relative to the working root it was resolved against.
    pub results_dir: PathBuf,
    pub fudge: f64,
    pub engine: EngineConfig,
}

impl PipelineContext {
    /// Read `path`, resolving a relative `results_dir` against `root`.
    pub fn load(path: &Path, root: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(path, &text, root)
    }

    pub fn parse(path: &Path, text: &str, root: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = if text.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        };

        let run_id = raw
            .execution
            .run_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RUN_ID.to_string());
        let results_dir = PathBuf::from(
            raw.execution
                .results_dir
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_RESULTS_DIR.to_string()),
        );
        let results_dir = if results_dir.is_absolute() {
            results_dir
        } else {
            root.join(results_dir)
        };

        let fudge = match raw.resources.estimation.fudge {
            Some(f) if f > 0.0 => f,
            _ => DEFAULT_FUDGE,
        };

        let defaults = EngineConfig::default();
        let auto_apply_risk_levels = match raw.agent.auto_apply_risk_levels {
            Some(levels) => levels
                .iter()
                .map(|l| l.parse::<PolicyRisk>())
                .collect::<Result<BTreeSet<_>, _>>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "agent.auto_apply_risk_levels".to_string(),
                    message: e.to_string(),
                })?,
            None => defaults.auto_apply_risk_levels,
        };

        Ok(Self {
            config_path: path.to_path_buf(),
            run_id,
            results_dir,
            fudge,
            engine: EngineConfig {
                auto_apply_risk_levels,
                retry_limit: raw.agent.retry_limit.unwrap_or(defaults.retry_limit),
                low_yield_threshold: raw
                    .agent
                    .low_yield_threshold
                    .unwrap_or(defaults.low_yield_threshold),
            },
        })
    }

    /// `<results_dir>/<run_id>/agent`
    pub fn agent_dir(&self) -> PathBuf {
        self.results_dir.join(&self.run_id).join("agent")
    }

    /// Default directory for chat audit logs.
    pub fn chat_log_dir(&self) -> PathBuf {
        self.agent_dir().join("chat")
    }

    /// Default decision log for live evaluations.
    pub fn decision_log_path(&self) -> PathBuf {
        self.agent_dir().join("decisions.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<PipelineContext, ConfigError> {
        PipelineContext::parse(Path::new("pipeline.yaml"), text, Path::new("/work"))
    }

    #[test]
    fn test_defaults_for_empty_config() {
        let ctx = parse("").unwrap();
        assert_eq!(ctx.run_id, "default-run");
        assert_eq!(ctx.results_dir, PathBuf::from("/work/results"));
        assert_eq!(ctx.fudge, 1.2);
        assert_eq!(ctx.engine, EngineConfig::default());
        assert_eq!(
            ctx.chat_log_dir(),
            PathBuf::from("/work/results/default-run/agent/chat")
        );
    }

    #[test]
    fn test_reads_known_sections_and_ignores_the_rest() {
        let ctx = parse(
            "execution:\n  run_id: r42\n  results_dir: /data/out\n  profile: slurm\n\
             resources:\n  estimation:\n    fudge: 1.5\n\
             agent:\n  enabled: true\n  auto_apply_risk_levels: [low, medium]\n  retry_limit: 4\n  low_yield_threshold: 10\n\
             tools:\n  megahit:\n    threads: 8\n",
        )
        .unwrap();
        assert_eq!(ctx.run_id, "r42");
        assert_eq!(ctx.results_dir, PathBuf::from("/data/out"));
        assert_eq!(ctx.fudge, 1.5);
        assert!(ctx.engine.auto_apply_risk_levels.contains(&PolicyRisk::Medium));
        assert_eq!(ctx.engine.retry_limit, 4);
        assert_eq!(ctx.engine.low_yield_threshold, 10);
        assert_eq!(
            ctx.decision_log_path(),
            PathBuf::from("/data/out/r42/agent/decisions.jsonl")
        );
    }

    #[test]
    fn test_bad_risk_level_and_bad_yaml() {
        assert!(matches!(
            parse("agent:\n  auto_apply_risk_levels: [sometimes]\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("execution: [unclosed"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
