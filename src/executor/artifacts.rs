//! Durable artifact files for full tool output.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::error::AuditError;

/// Session-scoped directory of artifact files.
///
/// Names are `tool.<UTC timestamp>.<seq>.<tool>.<kind>`. Files are created
/// exclusively, so stores sharing a directory never overwrite each other;
/// a name that is already taken moves on to the next sequence number.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to a new artifact and return its path.
    pub fn write(&self, tool: &str, kind: &str, content: &str) -> Result<PathBuf, AuditError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| AuditError::Write {
            path: self.dir.clone(),
            source,
        })?;
        let (path, mut file) = loop {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let ts = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
            let path = self.dir.join(format!("tool.{ts}.{seq:04}.{tool}.{kind}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(path = %path.display(), "Artifact name taken, retrying");
                }
                Err(source) => return Err(AuditError::Write { path, source }),
            }
        };
        file.write_all(content.as_bytes())
            .map_err(|source| AuditError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}
