//! Best-effort local record of files a batch failed to edit.
//!
//! Append-only JSON lines. Never read back by the pipeline; it only exists
//! so the user can redo failed files by hand.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const FAILURE_LOG_FILENAME: &str = "failures.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    pub recorded_at_unix: u64,
    pub file_title: String,
    pub message: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl FailureRecord {
    pub fn now(file_title: &str, message: &str, added: &[String], removed: &[String]) -> Self {
        Self {
            recorded_at_unix: unix_timestamp(),
            file_title: file_title.to_string(),
            message: message.to_string(),
            added: added.to_vec(),
            removed: removed.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(FAILURE_LOG_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record, logging instead of failing when the write fails.
    pub fn record(&self, record: &FailureRecord) {
        if let Err(error) = self.try_record(record) {
            warn!(
                path = %self.path.display(),
                file = %record.file_title,
                "could not write failure log: {error:#}"
            );
        }
    }

    fn try_record(&self, record: &FailureRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("failed to encode failure record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }

    /// Read all records; malformed lines are skipped.
    pub fn load(&self) -> Result<Vec<FailureRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Returns `true` when a log existed and was removed.
    pub fn clear(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("failed to remove {}", self.path.display()))?;
        Ok(true)
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
