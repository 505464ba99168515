//! Confirmation gate for high-risk tool calls.
//!
//! The decision itself is a pure function of `(risk, auto_approve,
//! interactive)`. Asking the operator is behind the `Confirmer` trait so the
//! session can be driven by a script in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::agent::console::Console;
use crate::tools::RiskLevel;

/// What the gate allows for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Execute now.
    Proceed,
    /// Show the preview and block on an explicit yes/no.
    AskOperator,
    /// Nobody to ask: refuse with a "needs confirmation" status.
    Refuse,
}

/// Decide whether a call may run.
pub fn decide(risk: RiskLevel, auto_approve: bool, interactive: bool) -> GateDecision {
    match (risk, auto_approve, interactive) {
        (RiskLevel::Low, _, _) => GateDecision::Proceed,
        (RiskLevel::High, true, _) => GateDecision::Proceed,
        (RiskLevel::High, false, true) => GateDecision::AskOperator,
        (RiskLevel::High, false, false) => GateDecision::Refuse,
    }
}

/// Structured preview shown before a high-risk call, and persisted when it is refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationPreview {
    pub tool: String,
    pub risk: RiskLevel,
    pub arguments: Value,
}

impl ConfirmationPreview {
    pub fn new(tool: impl Into<String>, risk: RiskLevel, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            risk,
            arguments,
        }
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Something that can answer "run this high-risk call?".
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// `true` only on an explicit yes. Errors and end of input count as no.
    async fn confirm(&self, preview: &ConfirmationPreview) -> bool;
}

/// Whether an operator answer is an explicit yes.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Asks on the operator console.
pub struct ConsoleConfirmer {
    console: Arc<Console>,
}

impl ConsoleConfirmer {
    pub fn new(console: Arc<Console>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, preview: &ConfirmationPreview) -> bool {
        println!("High-risk action requires confirmation:");
        println!("{}", preview.to_pretty_json());
        match self.console.read_line("Proceed? [y/N] ").await {
            Ok(Some(answer)) => is_affirmative(&answer),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read confirmation; treating as refusal");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn test_decision_table() {
        use GateDecision::*;
        for auto in [false, true] {
            for interactive in [false, true] {
                assert_eq!(decide(RiskLevel::Low, auto, interactive), Proceed);
            }
        }
        assert_eq!(decide(RiskLevel::High, true, false), Proceed);
        assert_eq!(decide(RiskLevel::High, true, true), Proceed);
        assert_eq!(decide(RiskLevel::High, false, true), AskOperator);
        assert_eq!(decide(RiskLevel::High, false, false), Refuse);
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative(" YES \n"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("yep"));
    }

    #[test]
    fn test_preview_shape() {
        let preview = ConfirmationPreview::new(
            "slurm_scancel",
            RiskLevel::High,
            json!({"job_id": "7", "needs_confirmation": true}),
        );
        let v: Value = serde_json::from_str(&preview.to_pretty_json()).unwrap();
        assert_eq!(v["tool"], "slurm_scancel");
        assert_eq!(v["risk"], "high");
        assert_eq!(v["arguments"]["job_id"], "7");
    }

    async fn answer(input: &'static [u8]) -> bool {
        let console = Arc::new(Console::from_reader(BufReader::new(input)));
        let preview = ConfirmationPreview::new("gmv_run", RiskLevel::High, json!({}));
        ConsoleConfirmer::new(console).confirm(&preview).await
    }

    #[tokio::test]
    async fn test_console_confirmer() {
        assert!(answer(b"yes\n").await);
        assert!(!answer(b"n\n").await);
        assert!(!answer(b"").await);
    }
}
