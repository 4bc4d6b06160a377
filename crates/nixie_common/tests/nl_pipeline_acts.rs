//! End-to-end acceptance scenarios for the natural-language pipeline,
//! run against an in-memory fake of the system manager.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nixie_common::backend::{ManagerError, ManagerOutput, SystemManager};
use nixie_common::config::NixieConfig;
use nixie_common::pipeline::Pipeline;
use nixie_common::types::{ErrorCategory, ExecMode, Operation, PackageMatch};

// =============================================================================
// Fake manager
// =============================================================================

#[derive(Default)]
struct FakeState {
    installed: BTreeSet<String>,
    /// The manager's own generation counter, bumped on every mutation.
    state_ref: u64,
    /// Installed-set snapshots keyed by state ref, for switch-generation.
    snapshots: HashMap<u64, BTreeSet<String>>,
    search_calls: usize,
    fail_next_run: Option<String>,
    timeout_next_run: bool,
}

struct FakeManager {
    state: Mutex<FakeState>,
}

impl FakeManager {
    fn new() -> Arc<Self> {
        let mut state = FakeState::default();
        state.snapshots.insert(0, BTreeSet::new());
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    fn installed(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().installed.clone()
    }

    fn search_calls(&self) -> usize {
        self.state.lock().unwrap().search_calls
    }

    fn fail_next_run(&self, stderr: &str) {
        self.state.lock().unwrap().fail_next_run = Some(stderr.to_string());
    }

    fn timeout_next_run(&self) {
        self.state.lock().unwrap().timeout_next_run = true;
    }
}

#[async_trait]
impl SystemManager for FakeManager {
    async fn search(&self, term: &str) -> Result<Vec<PackageMatch>, ManagerError> {
        let mut state = self.state.lock().unwrap();
        state.search_calls += 1;
        if term.contains("editor") {
            Ok(vec![
                PackageMatch::named("neovim"),
                PackageMatch::named("vscode"),
            ])
        } else {
            Ok(Vec::new())
        }
    }

    async fn run(&self, op: &Operation) -> Result<ManagerOutput, ManagerError> {
        let mut state = self.state.lock().unwrap();
        if state.timeout_next_run {
            state.timeout_next_run = false;
            return Err(ManagerError::Timeout(Duration::from_secs(120)));
        }
        if let Some(stderr) = state.fail_next_run.take() {
            return Ok(ManagerOutput {
                status: Some(1),
                stdout: String::new(),
                stderr,
            });
        }

        match op.action.as_str() {
            "install" => {
                state.installed.insert(op.target.clone());
            }
            "remove" => {
                state.installed.remove(&op.target);
            }
            "switch-generation" => {
                let target_ref: u64 = op
                    .underlying_command
                    .split_whitespace()
                    .last()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let restored = state.snapshots.get(&target_ref).cloned().unwrap_or_default();
                state.installed = restored;
            }
            // update / collect-garbage / diagnose probes: state unchanged
            _ => {
                return Ok(ManagerOutput {
                    status: Some(0),
                    stdout: format!("{} ok", op.action),
                    stderr: String::new(),
                });
            }
        }

        state.state_ref += 1;
        let snapshot = state.installed.clone();
        let state_ref = state.state_ref;
        state.snapshots.insert(state_ref, snapshot);
        Ok(ManagerOutput {
            status: Some(0),
            stdout: format!("{} {} done", op.action, op.target),
            stderr: String::new(),
        })
    }

    async fn current_state_ref(&self) -> Result<String, ManagerError> {
        Ok(self.state.lock().unwrap().state_ref.to_string())
    }
}

fn pipeline_with(manager: Arc<FakeManager>) -> (tempfile::TempDir, Pipeline) {
    let dir = tempfile::tempdir().unwrap();
    let config = NixieConfig {
        state_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let pipeline = Pipeline::new(&config, manager).unwrap();
    (dir, pipeline)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_i_need_firefox_dry_run() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let response = pipeline.execute_command("i need firefox", ExecMode::DryRun).await;
    assert!(response.success, "{:?}", response.output_text);
    assert!(response.output_text.contains("firefox"));
    assert!(!response.output_text.contains("need"));
    assert!(response.generation_before.is_none());
    assert!(response.generation_after.is_none());
    // Nothing was installed.
    assert!(manager.installed().is_empty());
}

#[tokio::test]
async fn test_dry_run_is_idempotent() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let first = pipeline.execute_command("remove htop", ExecMode::DryRun).await;
    let second = pipeline.execute_command("remove htop", ExecMode::DryRun).await;
    assert_eq!(first.output_text, second.output_text);
    assert!(manager.installed().is_empty());
    assert!(pipeline.generations().is_empty());
}

#[tokio::test]
async fn test_execute_install_records_linked_generations() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let response = pipeline.execute_command("install firefox", ExecMode::Execute).await;
    assert!(response.success, "{:?}", response.output_text);
    assert!(manager.installed().contains("firefox"));

    let before = response.generation_before.expect("before checkpoint");
    let after = response.generation_after.expect("after checkpoint");

    let generations = pipeline.generations();
    let after_gen = generations.iter().find(|g| g.id == after).unwrap();
    // The committed state is a direct child of the pre-operation state.
    assert_eq!(after_gen.parent_id, Some(before));
}

#[tokio::test]
async fn test_rollback_restores_previous_content() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    pipeline.execute_command("install firefox", ExecMode::Execute).await;
    let remove = pipeline.execute_command("remove firefox", ExecMode::Execute).await;
    assert!(remove.success);
    assert!(!manager.installed().contains("firefox"));

    // Roll back to the state before the removal.
    let target = remove.generation_before.unwrap();
    let count_before_rollback = pipeline.generations().len();
    let rollback = pipeline.rollback(target, ExecMode::Execute).await;
    assert!(rollback.success, "{:?}", rollback.output_text);
    assert!(manager.installed().contains("firefox"));

    // History grew; nothing was truncated.
    assert!(pipeline.generations().len() > count_before_rollback);
}

#[tokio::test]
async fn test_rollback_to_current_is_noop() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let install = pipeline.execute_command("install firefox", ExecMode::Execute).await;
    let current = install.generation_after.unwrap();
    let count = pipeline.generations().len();

    let response = pipeline.rollback(current, ExecMode::Execute).await;
    assert!(response.success);
    assert!(response.output_text.contains("nothing to do"));
    assert_eq!(pipeline.generations().len(), count);
}

#[tokio::test]
async fn test_rollback_to_missing_generation() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let response = pipeline.rollback(99, ExecMode::Execute).await;
    assert!(!response.success);
    let error = response.error.expect("classified error");
    assert_eq!(error.category, ErrorCategory::NotFound);
    assert!(!error.suggestions.is_empty());
}

#[tokio::test]
async fn test_rollback_to_yesterday_with_no_match() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    pipeline.execute_command("install firefox", ExecMode::Execute).await;
    let count = pipeline.generations().len();

    // All generations are seconds old; "yesterday" matches nothing.
    let response = pipeline
        .execute_command("roll back to yesterday", ExecMode::Execute)
        .await;
    assert!(!response.success);
    let error = response.error.expect("classified error");
    assert_eq!(error.category, ErrorCategory::NotFound);
    assert!(response.generation_after.is_none());
    assert_eq!(pipeline.generations().len(), count);
}

#[tokio::test]
async fn test_timeout_leaves_recoverable_checkpoint() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    pipeline.execute_command("install firefox", ExecMode::Execute).await;
    manager.timeout_next_run();

    let response = pipeline.execute_command("remove firefox", ExecMode::Execute).await;
    assert!(!response.success);
    let before = response.generation_before.expect("checkpoint taken before the call");
    assert!(response.generation_after.is_none());
    let error = response.error.expect("classified error");
    assert!(error.retryable);

    // The checkpoint allows recovery.
    let rollback = pipeline.rollback(before, ExecMode::Execute).await;
    assert!(rollback.success, "{:?}", rollback.output_text);
    assert!(manager.installed().contains("firefox"));
}

#[tokio::test]
async fn test_repeated_search_hits_cache() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let first = pipeline
        .execute_command("search for a markdown editor", ExecMode::Execute)
        .await;
    assert!(first.success);
    assert!(first.output_text.contains("neovim"));

    let second = pipeline
        .execute_command("search for a markdown editor", ExecMode::Execute)
        .await;
    assert!(second.success);
    assert_eq!(manager.search_calls(), 1);
}

#[tokio::test]
async fn test_manager_failure_is_classified() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    manager.fail_next_run("error: selector 'firefx' does not exist / not found");
    let response = pipeline.execute_command("install firefx", ExecMode::Execute).await;
    assert!(!response.success);
    let error = response.error.expect("classified error");
    assert_eq!(error.category, ErrorCategory::NotFound);
    assert!(error.suggestions.iter().any(|s| s.contains("firefox")), "{:?}", error.suggestions);
}

#[tokio::test]
async fn test_shell_metacharacters_rejected_before_any_plan() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let response = pipeline
        .execute_command("install firefox; rm -rf /", ExecMode::Execute)
        .await;
    assert!(!response.success);
    let error = response.error.expect("classified error");
    assert_eq!(error.category, ErrorCategory::SyntaxInvalid);
    // No snapshot was taken and nothing reached the manager.
    assert!(pipeline.generations().is_empty());
    assert!(manager.installed().is_empty());
}

#[tokio::test]
async fn test_unintelligible_query_gets_clarification() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let response = pipeline.execute_command("flurble the wombat", ExecMode::Execute).await;
    assert!(!response.success);
    // Clarification, not a classified failure.
    assert!(response.error.is_none());
    assert!(response.output_text.contains("rephras"));
}

#[tokio::test]
async fn test_garbage_collect_needs_override() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let refused = pipeline.execute_command("free up space", ExecMode::Execute).await;
    assert!(!refused.success);
    let error = refused.error.expect("classified error");
    assert_eq!(error.category, ErrorCategory::Conflict);
    assert!(error
        .suggestions
        .iter()
        .any(|s| s.contains("--allow-irreversible")));

    let allowed = pipeline
        .execute_command_opts("free up space", ExecMode::Execute, true)
        .await;
    assert!(allowed.success, "{:?}", allowed.output_text);
}

#[tokio::test]
async fn test_queries_are_recorded_in_history() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    pipeline.execute_command("install firefox", ExecMode::DryRun).await;
    pipeline.execute_command("install firefox", ExecMode::Execute).await;

    let history = pipeline.recent_history(10);
    assert_eq!(history.len(), 2);
    assert!(history[0].simulated);
    assert!(!history[1].simulated);
    assert!(history[1].generation_after.is_some());
    assert!(history.iter().all(|e| e.query == "install firefox"));
}

#[tokio::test]
async fn test_list_generations_after_changes() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    pipeline.execute_command("install firefox", ExecMode::Execute).await;
    let response = pipeline.execute_command("list generations", ExecMode::Execute).await;
    assert!(response.success);
    assert!(response.output_text.contains("(current)"));
    assert!(response.structured_data.is_some());
}

#[tokio::test]
async fn test_diagnose_is_safe_and_takes_no_snapshot() {
    let manager = FakeManager::new();
    let (_dir, pipeline) = pipeline_with(manager.clone());

    let response = pipeline.execute_command("check my system", ExecMode::Execute).await;
    assert!(response.success, "{:?}", response.output_text);
    assert!(response.generation_before.is_none());
    assert!(pipeline.generations().is_empty());
}
