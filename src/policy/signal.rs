//! Pipeline step outcome signals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome report for one pipeline step.
///
/// Stored exactly as recorded (keys sorted) so decisions echo it verbatim.
/// The typed accessors never fail: missing or malformed fields fall back to
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(BTreeMap<String, Value>);

impl Signal {
    pub fn new(status: &str) -> Self {
        Self::default().with("status", status).with("attempt", 1)
    }

    /// Set a field, builder style.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn with_attempt(self, attempt: i64) -> Self {
        self.with("attempt", attempt)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// `status`, default `unknown`.
    pub fn status(&self) -> String {
        self.text("status").unwrap_or_else(|| "unknown".to_string())
    }

    /// `error_type`, empty when absent.
    pub fn error_type(&self) -> String {
        self.text("error_type").unwrap_or_default()
    }

    /// `attempt`, default 1.
    pub fn attempt(&self) -> i64 {
        self.integer("attempt").unwrap_or(1)
    }

    /// `yield_count`, default 0.
    pub fn yield_count(&self) -> i64 {
        self.integer("yield_count").unwrap_or(0)
    }

    /// `observed_at`, if recorded.
    pub fn observed_at(&self) -> Option<String> {
        self.text("observed_at").filter(|s| !s.is_empty())
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn integer(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<BTreeMap<String, Value>> for Signal {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self(fields)
    }
}
