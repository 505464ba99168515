//! Append-only audit log.
//!
//! One JSON object per line: `timestamp`, `role`, and the role-specific
//! payload fields flattened alongside them. Entries are only ever appended.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AuditError;
use crate::llm::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub role: Role,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl AuditEntry {
    /// Stamp a new entry. A non-object payload is stored under `content`.
    pub fn new(role: Role, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("content".to_string(), other);
                map
            }
        };
        Self {
            timestamp: Utc::now().to_rfc3339(),
            role,
            payload,
        }
    }
}

/// Session-scoped audit file.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Log at an explicit path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// New log in `dir` named `chat.<UTC timestamp>.<short id>.jsonl`.
    pub fn create_in(dir: &Path) -> Result<Self, AuditError> {
        std::fs::create_dir_all(dir).map_err(|source| AuditError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
        let id = uuid::Uuid::new_v4().simple().to_string();
        let short = &id[..8];
        Ok(Self::new(dir.join(format!("chat.{ts}.{short}.jsonl"))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| AuditError::Write {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| AuditError::Write {
                path: self.path.clone(),
                source,
            })
    }

    /// Stamp and append.
    pub fn record(&self, role: Role, payload: Value) -> Result<(), AuditError> {
        self.append(&AuditEntry::new(role, payload))
    }

    /// Read every entry back, in order.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| AuditError::Read {
            path: self.path.clone(),
            source,
        })?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AuditError::from))
            .collect()
    }
}
