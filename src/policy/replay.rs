//! Replay recorded signals through the policy engine.
//!
//! Input is line-delimited JSON. Each line is `{step, signal}`; recorded
//! decision lines carry both fields too and are accepted as-is.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::PolicyError;
use crate::policy::engine::{PolicyDecision, PolicyEngine};
use crate::policy::signal::Signal;

/// One `(step, signal)` pair from a signal log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalRecord {
    #[serde(default = "unknown_step")]
    pub step: String,
    #[serde(default)]
    pub signal: Signal,
}

fn unknown_step() -> String {
    "unknown".to_string()
}

/// Read a signal log. Blank lines are skipped; any other malformed line is an
/// error naming its 1-based line number.
pub fn read_signal_log(path: &Path) -> Result<Vec<SignalRecord>, PolicyError> {
    if !path.exists() {
        return Err(PolicyError::FileNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    parse_lines(path, &text)
}

pub(crate) fn parse_lines<T>(path: &Path, text: &str) -> Result<Vec<T>, PolicyError>
where
    T: serde::de::DeserializeOwned,
{
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = |reason: String| PolicyError::MalformedRecord {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        };
        let value: Value = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(malformed("expected a JSON object".to_string()));
        }
        out.push(serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?);
    }
    Ok(out)
}

/// Re-evaluate every record, in order.
pub fn replay(records: &[SignalRecord], engine: &PolicyEngine) -> Vec<PolicyDecision> {
    records
        .iter()
        .map(|r| engine.evaluate(&r.step, &r.signal))
        .collect()
}

/// Read and replay a signal log.
pub fn replay_file(path: &Path, engine: &PolicyEngine) -> Result<Vec<PolicyDecision>, PolicyError> {
    let records = read_signal_log(path)?;
    tracing::debug!(path = %path.display(), records = records.len(), "Replaying signal log");
    Ok(replay(&records, engine))
}

/// A field where a replayed decision differs from the recorded one.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    /// 0-based position in the decision sequence.
    pub index: usize,
    pub step: String,
    pub field: String,
    pub recorded: Value,
    pub replayed: Value,
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} step={} {}: recorded={} replayed={}",
            self.index, self.step, self.field, self.recorded, self.replayed
        )
    }
}

/// Compare replayed decisions against a recorded log, field by field.
pub fn compare(
    recorded: &[PolicyDecision],
    replayed: &[PolicyDecision],
) -> Result<Vec<Divergence>, PolicyError> {
    let mut out = Vec::new();
    let len = recorded.len().max(replayed.len());
    for index in 0..len {
        let old = recorded.get(index).map(serde_json::to_value).transpose()?;
        let new = replayed.get(index).map(serde_json::to_value).transpose()?;
        match (old, new) {
            (Some(Value::Object(old)), Some(Value::Object(new))) => {
                let step = new
                    .get("step")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                for (field, old_value) in &old {
                    let new_value = new.get(field).cloned().unwrap_or(Value::Null);
                    if *old_value != new_value {
                        out.push(Divergence {
                            index,
                            step: step.clone(),
                            field: field.clone(),
                            recorded: old_value.clone(),
                            replayed: new_value,
                        });
                    }
                }
            }
            (old, new) => {
                let step = [&old, &new]
                    .into_iter()
                    .flatten()
                    .find_map(|v| v.get("step").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_default();
                out.push(Divergence {
                    index,
                    step,
                    field: "decision".to_string(),
                    recorded: old.unwrap_or(Value::Null),
                    replayed: new.unwrap_or(Value::Null),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::engine::{Action, EngineConfig};

    fn write(dir: &Path, text: &str) -> std::path::PathBuf {
        let path = dir.join("signals.jsonl");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_replay_reads_pairs_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "{\"step\": \"assembly\", \"signal\": {\"status\": \"failed\", \"error_type\": \"oom\", \"attempt\": 1}}\n\n\
             {\"step\": \"checkv\", \"signal\": {\"status\": \"low_yield\", \"yield_count\": 0}}\n\
             {\"signal\": {}}\n",
        );
        let decisions = replay_file(&path, &PolicyEngine::default()).unwrap();
        let actions: Vec<Action> = decisions.iter().map(|d| d.action).collect();
        assert_eq!(
            actions,
            [Action::IncreaseResources, Action::RelaxQualityThreshold, Action::Noop]
        );
        assert_eq!(decisions[2].step, "unknown");
    }

    #[test]
    fn test_missing_file() {
        let err = replay_file(Path::new("/nonexistent/signals.jsonl"), &PolicyEngine::default())
            .unwrap_err();
        assert!(matches!(err, PolicyError::FileNotFound(_)));
    }

    #[test]
    fn test_malformed_line_names_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "{\"step\": \"a\"}\n\n[1, 2]\n");
        match read_signal_log(&path) {
            Err(PolicyError::MalformedRecord { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
        let path = write(dir.path(), "{\"step\": \"a\", \"signal\": 5}\n");
        assert!(matches!(
            read_signal_log(&path),
            Err(PolicyError::MalformedRecord { line: 1, .. })
        ));
    }

    #[test]
    fn test_replay_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "{\"step\": \"qc\", \"signal\": {\"status\": \"failed\", \"attempt\": 2, \"observed_at\": \"2024-01-01T00:00:00+00:00\"}}\n",
        );
        let engine = PolicyEngine::default();
        let render = |ds: Vec<PolicyDecision>| -> Vec<String> {
            ds.iter().map(|d| d.to_json_line().unwrap()).collect()
        };
        let a = render(replay_file(&path, &engine).unwrap());
        let b = render(replay_file(&path, &engine).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_compare_reports_changed_fields() {
        let records = vec![SignalRecord {
            step: "qc".into(),
            signal: Signal::new("failed").with_attempt(3),
        }];
        let recorded = replay(&records, &PolicyEngine::default());
        let relaxed = PolicyEngine::new(EngineConfig {
            retry_limit: 5,
            ..EngineConfig::default()
        });
        let replayed = replay(&records, &relaxed);

        let diffs = compare(&recorded, &replayed).unwrap();
        let fields: Vec<&str> = diffs.iter().map(|d| d.field.as_str()).collect();
        assert!(fields.contains(&"action"));
        assert!(fields.contains(&"risk_level"));
        assert!(fields.contains(&"auto_applied"));
        assert!(diffs[0].to_string().starts_with("#0 step=qc"));

        assert!(compare(&recorded, &recorded).unwrap().is_empty());
    }

    #[test]
    fn test_compare_reports_length_mismatch() {
        let records = vec![SignalRecord {
            step: "qc".into(),
            signal: Signal::default(),
        }];
        let decisions = replay(&records, &PolicyEngine::default());
        let diffs = compare(&decisions, &[]).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "decision");
        assert_eq!(diffs[0].replayed, Value::Null);
    }
}
