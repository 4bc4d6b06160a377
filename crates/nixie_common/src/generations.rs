//! Generation history - append-only checkpoint log with a current pointer.
//!
//! Generations form a strictly linear sequence; there is no branching and
//! no truncation. Rolling back appends a new entry equivalent to the
//! target rather than deleting anything, so a rollback can itself be
//! rolled back and the full history stays auditable.
//!
//! Appends are serialized behind a single lock: concurrent snapshots would
//! corrupt the linear ordering invariant.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use crate::errors::PipelineError;
use crate::types::{Generation, GenerationId};

pub const GENERATIONS_FILE: &str = "generations.jsonl";

struct GenState {
    log: Vec<Generation>,
}

impl GenState {
    fn next_id(&self) -> GenerationId {
        self.log.last().map(|g| g.id + 1).unwrap_or(1)
    }
}

pub struct GenerationManager {
    state: Mutex<GenState>,
    path: PathBuf,
}

impl GenerationManager {
    /// Open (or create) the generation log under the given state
    /// directory. Unparseable lines are skipped rather than aborting:
    /// a partially written trailing line after a crash must not brick
    /// rollback.
    pub fn open(state_dir: &std::path::Path) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(GENERATIONS_FILE);

        let mut log = Vec::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Generation>(line) {
                    Ok(gen) => log.push(gen),
                    Err(e) => tracing::warn!("skipping bad generation line: {}", e),
                }
            }
        }

        Ok(Self {
            state: Mutex::new(GenState { log }),
            path,
        })
    }

    /// Record a checkpoint of the current state. Called by the executor
    /// immediately before any mutating operation, and again after a
    /// successful one. The entry is durable before this returns.
    pub fn snapshot(&self, description: &str, manager_ref: &str) -> Result<GenerationId, PipelineError> {
        let mut state = self.state.lock().expect("generation lock poisoned");
        let generation = Generation {
            id: state.next_id(),
            timestamp: Utc::now(),
            description: description.to_string(),
            parent_id: state.log.last().map(|g| g.id),
            manager_ref: manager_ref.to_string(),
        };
        self.append_line(&generation)?;
        info!(id = generation.id, description, "generation recorded");
        let id = generation.id;
        state.log.push(generation);
        Ok(id)
    }

    fn append_line(&self, generation: &Generation) -> Result<(), PipelineError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(generation)?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    /// The ordered history, oldest first.
    pub fn list(&self) -> Vec<Generation> {
        self.state.lock().expect("generation lock poisoned").log.clone()
    }

    pub fn get(&self, id: GenerationId) -> Option<Generation> {
        self.state
            .lock()
            .expect("generation lock poisoned")
            .log
            .iter()
            .find(|g| g.id == id)
            .cloned()
    }

    /// The current pointer: the newest entry. Rollback appends, so the
    /// newest entry is always the live state.
    pub fn current(&self) -> Option<Generation> {
        self.state
            .lock()
            .expect("generation lock poisoned")
            .log
            .last()
            .cloned()
    }

    /// Resolve a natural-language or numeric rollback target to a
    /// generation id.
    ///
    /// Accepted forms: a bare number, "generation N", "previous" / "last",
    /// and "yesterday" (the newest checkpoint at least a day old).
    pub fn resolve_target(&self, target: &str) -> Result<GenerationId, PipelineError> {
        let target = target.trim().to_lowercase();
        let state = self.state.lock().expect("generation lock poisoned");

        if let Some(num) = target
            .strip_prefix("generation")
            .map(str::trim)
            .or(Some(target.as_str()))
            .and_then(|s| s.parse::<GenerationId>().ok())
        {
            return if state.log.iter().any(|g| g.id == num) {
                Ok(num)
            } else {
                Err(PipelineError::GenerationNotFound(num))
            };
        }

        match target.as_str() {
            "previous" | "last" | "before" | "last generation" | "previous generation" => state
                .log
                .iter()
                .rev()
                .nth(1)
                .map(|g| g.id)
                .ok_or_else(|| PipelineError::NoMatchingGeneration(target.clone())),
            "yesterday" => {
                let cutoff = Utc::now() - ChronoDuration::days(1);
                state
                    .log
                    .iter()
                    .rev()
                    .find(|g| g.timestamp <= cutoff)
                    .map(|g| g.id)
                    .ok_or_else(|| PipelineError::NoMatchingGeneration(target.clone()))
            }
            _ => Err(PipelineError::NoMatchingGeneration(target)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, GenerationManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = GenerationManager::open(dir.path()).unwrap();
        (dir, mgr)
    }

    #[test]
    fn test_ids_are_monotonic_and_linked() {
        let (_dir, mgr) = manager();
        let a = mgr.snapshot("before install", "10").unwrap();
        let b = mgr.snapshot("after install", "11").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        let log = mgr.list();
        assert_eq!(log[0].parent_id, None);
        assert_eq!(log[1].parent_id, Some(a));
        assert_eq!(mgr.current().unwrap().id, b);
    }

    #[test]
    fn test_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mgr = GenerationManager::open(dir.path()).unwrap();
            mgr.snapshot("one", "1").unwrap();
            mgr.snapshot("two", "2").unwrap();
        }
        let mgr = GenerationManager::open(dir.path()).unwrap();
        assert_eq!(mgr.list().len(), 2);
        assert_eq!(mgr.snapshot("three", "3").unwrap(), 3);
    }

    #[test]
    fn test_partial_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mgr = GenerationManager::open(dir.path()).unwrap();
            mgr.snapshot("one", "1").unwrap();
        }
        let path = dir.path().join(GENERATIONS_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"id\":2,\"timest").unwrap();

        let mgr = GenerationManager::open(dir.path()).unwrap();
        assert_eq!(mgr.list().len(), 1);
    }

    #[test]
    fn test_resolve_numeric_targets() {
        let (_dir, mgr) = manager();
        mgr.snapshot("one", "1").unwrap();
        mgr.snapshot("two", "2").unwrap();

        assert_eq!(mgr.resolve_target("1").unwrap(), 1);
        assert_eq!(mgr.resolve_target("generation 2").unwrap(), 2);
        assert!(matches!(
            mgr.resolve_target("99"),
            Err(PipelineError::GenerationNotFound(99))
        ));
    }

    #[test]
    fn test_resolve_previous() {
        let (_dir, mgr) = manager();
        mgr.snapshot("one", "1").unwrap();
        mgr.snapshot("two", "2").unwrap();
        assert_eq!(mgr.resolve_target("previous").unwrap(), 1);
    }

    #[test]
    fn test_resolve_yesterday_with_no_old_generation() {
        let (_dir, mgr) = manager();
        mgr.snapshot("fresh", "1").unwrap();
        assert!(matches!(
            mgr.resolve_target("yesterday"),
            Err(PipelineError::NoMatchingGeneration(_))
        ));
    }

    #[test]
    fn test_resolve_gibberish_target() {
        let (_dir, mgr) = manager();
        assert!(matches!(
            mgr.resolve_target("the good old days"),
            Err(PipelineError::NoMatchingGeneration(_))
        ));
    }
}
