//! Append-only decision log, one `PolicyDecision` per line.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PolicyError;
use crate::policy::engine::PolicyDecision;
use crate::policy::replay::parse_lines;

#[derive(Debug, Clone)]
pub struct DecisionLog {
    path: PathBuf,
}

impl DecisionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, decision: &PolicyDecision) -> Result<(), PolicyError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = decision.to_json_line()?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// All recorded decisions, in order.
    pub fn read_all(&self) -> Result<Vec<PolicyDecision>, PolicyError> {
        if !self.path.exists() {
            return Err(PolicyError::FileNotFound(self.path.clone()));
        }
        let text = std::fs::read_to_string(&self.path)?;
        parse_lines(&self.path, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::engine::PolicyEngine;
    use crate::policy::replay::replay_file;
    use crate::policy::signal::Signal;

    #[test]
    fn test_append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::new(dir.path().join("agent").join("decisions.jsonl"));
        let engine = PolicyEngine::default();
        let d1 = engine.evaluate("qc", &Signal::new("failed"));
        let d2 = engine.evaluate("checkv", &Signal::new("low_yield"));
        log.append(&d1).unwrap();
        log.append(&d2).unwrap();

        assert_eq!(log.read_all().unwrap(), vec![d1, d2]);
    }

    #[test]
    fn test_decision_log_is_valid_replay_input() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::new(dir.path().join("decisions.jsonl"));
        let engine = PolicyEngine::default();
        let original = engine.evaluate(
            "assembly",
            &Signal::new("failed")
                .with("error_type", "memory")
                .with("observed_at", "2024-03-03T03:03:03+00:00"),
        );
        log.append(&original).unwrap();

        let replayed = replay_file(log.path(), &engine).unwrap();
        assert_eq!(replayed, vec![original]);
    }
}
