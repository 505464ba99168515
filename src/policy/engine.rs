//! Risk-graded policy decisions for pipeline step outcomes.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::PolicyError;
use crate::policy::signal::Signal;

/// Timestamp used when a signal carries no `observed_at`.
pub const EPOCH_TIMESTAMP: &str = "1970-01-01T00:00:00+00:00";

/// Error types treated as resource exhaustion.
const RESOURCE_ERRORS: [&str; 3] = ["oom", "memory", "timeout"];

/// Proposed corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    IncreaseResources,
    Retry,
    RelaxQualityThreshold,
    RequestManualReview,
    Noop,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncreaseResources => "increase_resources",
            Self::Retry => "retry",
            Self::RelaxQualityThreshold => "relax_quality_threshold",
            Self::RequestManualReview => "request_manual_review",
            Self::Noop => "noop",
        }
    }
}

/// Risk of a policy action. Distinct from tool risk: it has a middle grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyRisk {
    Low,
    Medium,
    High,
}

impl PolicyRisk {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse a comma-separated list such as `low,medium`.
    pub fn parse_list(raw: &str) -> Result<BTreeSet<Self>, PolicyError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for PolicyRisk {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(PolicyError::UnknownRiskLevel(other.to_string())),
        }
    }
}

impl std::fmt::Display for PolicyRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub auto_apply_risk_levels: BTreeSet<PolicyRisk>,
    pub retry_limit: i64,
    pub low_yield_threshold: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_apply_risk_levels: BTreeSet::from([PolicyRisk::Low]),
            retry_limit: 2,
            low_yield_threshold: 5,
        }
    }
}

/// One evaluated decision. Field order is the on-disk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub step: String,
    pub signal: Signal,
    pub action: Action,
    pub delta_params: BTreeMap<String, Value>,
    pub risk_level: PolicyRisk,
    pub auto_applied: bool,
    pub timestamp: String,
}

impl PolicyDecision {
    /// Canonical single-line JSON form.
    pub fn to_json_line(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Pure, total mapping from `(step, signal)` to a decision.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    config: EngineConfig,
}

impl PolicyEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate one signal. First matching rule wins.
    pub fn evaluate(&self, step: &str, signal: &Signal) -> PolicyDecision {
        let status = signal.status();
        let error_type = signal.error_type();
        let attempt = signal.attempt();
        let failed = status == "failed";

        let (action, risk_level, delta) = if failed && RESOURCE_ERRORS.contains(&error_type.as_str())
        {
            (
                Action::IncreaseResources,
                PolicyRisk::Low,
                json!({"threads_scale": 1.5, "mem_scale": 1.5}),
            )
        } else if failed && attempt <= self.config.retry_limit {
            (Action::Retry, PolicyRisk::Low, json!({"retry": attempt}))
        } else if status == "low_yield" && signal.yield_count() < self.config.low_yield_threshold {
            (
                Action::RelaxQualityThreshold,
                PolicyRisk::High,
                json!({"checkv_quality": "allow_low", "busco_ratio_threshold": 0.1}),
            )
        } else if failed && attempt > self.config.retry_limit {
            (
                Action::RequestManualReview,
                PolicyRisk::Medium,
                json!({"reason": "retry_limit_exceeded"}),
            )
        } else {
            (Action::Noop, PolicyRisk::Low, json!({}))
        };

        let auto_applied = self.config.auto_apply_risk_levels.contains(&risk_level)
            && action != Action::RequestManualReview;

        let delta_params = match delta {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };

        PolicyDecision {
            step: step.to_string(),
            signal: signal.clone(),
            action,
            delta_params,
            risk_level,
            auto_applied,
            timestamp: signal
                .observed_at()
                .unwrap_or_else(|| EPOCH_TIMESTAMP.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PolicyEngine {
        PolicyEngine::default()
    }

    #[test]
    fn test_oom_increases_resources() {
        let d = engine().evaluate(
            "assembly",
            &Signal::new("failed").with("error_type", "oom").with_attempt(1),
        );
        assert_eq!(d.action, Action::IncreaseResources);
        assert_eq!(d.risk_level, PolicyRisk::Low);
        assert!(d.auto_applied);
        assert_eq!(d.delta_params["threads_scale"], json!(1.5));
        assert_eq!(d.delta_params["mem_scale"], json!(1.5));
    }

    #[test]
    fn test_resource_error_wins_even_past_retry_limit() {
        let d = engine().evaluate(
            "assembly",
            &Signal::new("failed").with("error_type", "timeout").with_attempt(9),
        );
        assert_eq!(d.action, Action::IncreaseResources);
    }

    #[test]
    fn test_retry_until_limit_then_manual_review() {
        let e = engine();
        let d = e.evaluate("qc", &Signal::new("failed").with_attempt(2));
        assert_eq!(d.action, Action::Retry);
        assert_eq!(d.delta_params["retry"], json!(2));

        let d = e.evaluate("qc", &Signal::new("failed").with_attempt(3));
        assert_eq!(d.action, Action::RequestManualReview);
        assert_eq!(d.risk_level, PolicyRisk::Medium);
        assert!(!d.auto_applied);
        assert_eq!(d.delta_params["reason"], json!("retry_limit_exceeded"));
    }

    #[test]
    fn test_low_yield_relaxes_with_high_risk() {
        let d = engine().evaluate("checkv", &Signal::new("low_yield").with("yield_count", 0));
        assert_eq!(d.action, Action::RelaxQualityThreshold);
        assert_eq!(d.risk_level, PolicyRisk::High);
        assert!(!d.auto_applied);

        let enough = engine().evaluate("checkv", &Signal::new("low_yield").with("yield_count", 5));
        assert_eq!(enough.action, Action::Noop);
    }

    #[test]
    fn test_manual_review_never_auto_applied() {
        let e = PolicyEngine::new(EngineConfig {
            auto_apply_risk_levels: BTreeSet::from([
                PolicyRisk::Low,
                PolicyRisk::Medium,
                PolicyRisk::High,
            ]),
            retry_limit: 0,
            low_yield_threshold: 5,
        });
        let d = e.evaluate("x", &Signal::new("failed").with_attempt(1));
        assert_eq!(d.action, Action::RequestManualReview);
        assert!(!d.auto_applied);

        let relax = e.evaluate("x", &Signal::new("low_yield"));
        assert!(relax.auto_applied);
    }

    #[test]
    fn test_unknown_and_empty_signals_are_noop() {
        let d = engine().evaluate("x", &Signal::default());
        assert_eq!(d.action, Action::Noop);
        assert_eq!(d.risk_level, PolicyRisk::Low);
        assert!(d.auto_applied);
        assert!(d.delta_params.is_empty());
        assert_eq!(d.timestamp, EPOCH_TIMESTAMP);
    }

    #[test]
    fn test_timestamp_from_observed_at() {
        let s = Signal::new("success").with("observed_at", "2024-05-01T10:00:00+00:00");
        assert_eq!(engine().evaluate("x", &s).timestamp, "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_serialized_field_order() {
        let d = engine().evaluate("qc", &Signal::new("failed").with_attempt(1));
        let line = d.to_json_line().unwrap();
        assert_eq!(
            line,
            r#"{"step":"qc","signal":{"attempt":1,"status":"failed"},"action":"retry","delta_params":{"retry":1},"risk_level":"low","auto_applied":true,"timestamp":"1970-01-01T00:00:00+00:00"}"#
        );
        let back: PolicyDecision = serde_json::from_str(&line).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_parse_risk_list() {
        let set = PolicyRisk::parse_list("low, medium").unwrap();
        assert!(set.contains(&PolicyRisk::Medium));
        assert!(!set.contains(&PolicyRisk::High));
        assert!(matches!(
            PolicyRisk::parse_list("low,extreme"),
            Err(PolicyError::UnknownRiskLevel(_))
        ));
    }
}
