//! Command schedules: one JSON object per line
//!
//! ```text
//! {"device_id": "dev1", "command": "open_chat", "wait_secs": 2}
//! {"number": 2, "command": "post_message hello"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use anyhow::{bail, Context, Result};
use relay_shared::AddCommand;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScheduleEntry {
    #[serde(default)]
    pub device_id: Option<String>,
    /// Connection ordinal of the target device
    #[serde(default)]
    pub number: Option<u64>,
    pub command: String,
    /// Pause after submitting this entry
    #[serde(default)]
    pub wait_secs: f64,
}

impl ScheduleEntry {
    pub fn to_submission(&self) -> AddCommand {
        AddCommand {
            device_id: self.device_id.clone(),
            number: self.number,
            command: Some(self.command.clone()),
        }
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs_f64(self.wait_secs.max(0.0))
    }
}

/// Parse a schedule from text
pub fn parse(raw: &str) -> Result<Vec<ScheduleEntry>> {
    let mut entries = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry: ScheduleEntry = serde_json::from_str(line)
            .with_context(|| format!("parsing schedule line {}", index + 1))?;
        if entry.device_id.is_none() && entry.number.is_none() {
            bail!("schedule line {} names no device_id or number", index + 1);
        }
        entries.push(entry);
    }

    Ok(entries)
}

/// Read and parse a schedule file
pub fn load(path: &Path) -> Result<Vec<ScheduleEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading schedule {}", path.display()))?;
    parse(&raw)
}
