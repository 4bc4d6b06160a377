//! Append-only command history.
//!
//! One JSONL line per processed query: what was asked, what was planned,
//! what happened. Never rewritten, never truncated by the core; a failed
//! append is logged and swallowed so history can never block a command.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ExecMode, GenerationId};

pub const HISTORY_FILE: &str = "history.jsonl";

/// One processed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: DateTime<Utc>,
    pub req_id: Uuid,
    pub query: String,
    /// Compact plan rendering, empty when no plan was built.
    pub plan_summary: String,
    pub mode: ExecMode,
    pub success: bool,
    pub simulated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_before: Option<GenerationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_after: Option<GenerationId>,
    pub duration_ms: u64,
    /// Classified category when the query failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
}

impl HistoryEntry {
    pub fn new(query: &str, mode: ExecMode) -> Self {
        Self {
            ts: Utc::now(),
            req_id: Uuid::new_v4(),
            query: query.to_string(),
            plan_summary: String::new(),
            mode,
            success: false,
            simulated: false,
            generation_before: None,
            generation_after: None,
            duration_ms: 0,
            error_category: None,
        }
    }
}

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn open(state_dir: &std::path::Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join(HISTORY_FILE),
        })
    }

    /// Append one entry.
    pub fn record(&self, entry: &HistoryEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{}", line)
    }

    /// All entries, oldest first. Unparseable lines are skipped.
    pub fn read_all(&self) -> Vec<HistoryEntry> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }

    /// Last `count` entries, oldest first.
    pub fn read_recent(&self, count: usize) -> Vec<HistoryEntry> {
        let all = self.read_all();
        let skip = all.len().saturating_sub(count);
        all.into_iter().skip(skip).collect()
    }
}
