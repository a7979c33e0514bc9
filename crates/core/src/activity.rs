//! Append-only activity log.
//!
//! One JSON object per line, consumable by operational tooling. Records
//! every token refresh attempt and every fetch cycle outcome. The log is
//! never read back by the pipeline itself.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A single timestamped activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActivityEntry {
    TokenRefresh {
        at: DateTime<Utc>,
        outcome: String,
        detail: String,
        /// Access expiry after a successful refresh.
        access_expires_at: Option<DateTime<Utc>>,
    },
    CycleCompleted {
        at: DateTime<Utc>,
        succeeded: usize,
        failed: usize,
        contracts_fetched: usize,
        elapsed_ms: u64,
    },
    InstrumentFailure {
        at: DateTime<Utc>,
        symbol: String,
        reason: String,
    },
}

/// Handle to the append-only JSONL file. Cheap to clone; the file is
/// opened per append so external log rotation stays safe.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry as a single JSON line.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or written; the caller
    /// decides how loud that failure is.
    pub fn append(&self, entry: &ActivityEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening activity log {}", self.path.display()))?;

        let line = serde_json::to_string(entry).context("serializing activity entry")?;
        writeln!(file, "{line}")
            .with_context(|| format!("appending to activity log {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(dir.path().join("activity.jsonl"));

        log.append(&ActivityEntry::InstrumentFailure {
            at: Utc::now(),
            symbol: "SPY".to_string(),
            reason: "timeout".to_string(),
        })
        .unwrap();
        log.append(&ActivityEntry::CycleCompleted {
            at: Utc::now(),
            succeeded: 3,
            failed: 1,
            contracts_fetched: 1200,
            elapsed_ms: 2500,
        })
        .unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: ActivityEntry = serde_json::from_str(lines[0]).unwrap();
        assert!(matches!(first, ActivityEntry::InstrumentFailure { ref symbol, .. } if symbol == "SPY"));
        let second: ActivityEntry = serde_json::from_str(lines[1]).unwrap();
        assert!(matches!(second, ActivityEntry::CycleCompleted { succeeded: 3, failed: 1, .. }));
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(dir.path().join("logs/nested/activity.jsonl"));

        log.append(&ActivityEntry::TokenRefresh {
            at: Utc::now(),
            outcome: "ok".to_string(),
            detail: "refreshed".to_string(),
            access_expires_at: Some(Utc::now()),
        })
        .unwrap();

        assert!(log.path().exists());
    }
}
