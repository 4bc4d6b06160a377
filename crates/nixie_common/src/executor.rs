//! Command executor - dry-run/execute state machine over the manager.
//!
//! Per invocation: `Pending -> (DryRun: Simulated | Execute: Snapshotting
//! -> Running -> Committed | Failed)`. A checkpoint is recorded before the
//! first mutating call, so rollback stays possible even if the process
//! dies mid-operation. The executor never retries; a retry is a new `run`
//! driven by the caller after reviewing a recovery suggestion.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::backend::SystemManager;
use crate::errors::PipelineError;
use crate::generations::GenerationManager;
use crate::knowledge::describe_risk;
use crate::types::{ExecMode, ExecutionResult, GenerationId, Plan};

/// Phases of one `run` call. Logged, not returned: the caller only sees
/// the resulting `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecPhase {
    Pending,
    Simulated,
    Snapshotting,
    Running,
    Committed,
    Failed,
}

pub struct CommandExecutor {
    manager: Arc<dyn SystemManager>,
    generations: Arc<GenerationManager>,
}

impl CommandExecutor {
    pub fn new(manager: Arc<dyn SystemManager>, generations: Arc<GenerationManager>) -> Self {
        Self {
            manager,
            generations,
        }
    }

    /// Run a plan. `allow_irreversible` is the caller's explicit override
    /// for destructive plans no checkpoint can cover.
    pub async fn run(
        &self,
        plan: &Plan,
        mode: ExecMode,
        allow_irreversible: bool,
    ) -> Result<ExecutionResult, PipelineError> {
        let started = Instant::now();
        let mut phase = ExecPhase::Pending;
        debug!(plan = %plan.summary(), ?mode, ?phase, "executor start");

        if mode == ExecMode::DryRun {
            phase = ExecPhase::Simulated;
            debug!(?phase, "dry run, nothing executed");
            return Ok(ExecutionResult::simulated(
                render_preview(plan),
                started.elapsed(),
            ));
        }

        if plan.risk.is_mutating() && !plan.reversible && !allow_irreversible {
            return Err(PipelineError::IrreversibleRefused(plan.description.clone()));
        }

        // Snapshot before the first mutating call. Safe plans skip this.
        let mut generation_before: Option<GenerationId> = None;
        if plan.risk.is_mutating() {
            phase = ExecPhase::Snapshotting;
            debug!(?phase, "recording checkpoint");
            let state_ref = match self.manager.current_state_ref().await {
                Ok(r) => r,
                Err(e) => {
                    // Could not even read the current state; nothing was
                    // mutated, so fail without a checkpoint.
                    phase = ExecPhase::Failed;
                    debug!(?phase, error = %e, "pre-snapshot failure");
                    return Ok(failure(
                        String::new(),
                        e.to_string(),
                        None,
                        started,
                    ));
                }
            };
            generation_before = Some(
                self.generations
                    .snapshot(&format!("before: {}", plan.description), &state_ref)?,
            );
        }

        phase = ExecPhase::Running;
        let mut stdout = String::new();
        let mut stderr = String::new();
        for op in &plan.operations {
            debug!(?phase, action = %op.action, target = %op.target, "running operation");
            match self.manager.run(op).await {
                Ok(output) => {
                    push_block(&mut stdout, &output.stdout);
                    push_block(&mut stderr, &output.stderr);
                    if !output.success() {
                        phase = ExecPhase::Failed;
                        warn!(?phase, action = %op.action, status = ?output.status, "operation failed");
                        return Ok(failure(stdout, stderr, generation_before, started));
                    }
                }
                Err(e) => {
                    // Timeout or spawn failure. The checkpoint above makes
                    // manual recovery possible either way.
                    phase = ExecPhase::Failed;
                    warn!(?phase, action = %op.action, error = %e, "manager call failed");
                    push_block(&mut stderr, &e.to_string());
                    return Ok(failure(stdout, stderr, generation_before, started));
                }
            }
        }

        let mut generation_after = None;
        if plan.risk.is_mutating() {
            let state_ref = self
                .manager
                .current_state_ref()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            generation_after = Some(
                self.generations
                    .snapshot(&format!("after: {}", plan.description), &state_ref)?,
            );
        }

        phase = ExecPhase::Committed;
        debug!(?phase, ?generation_before, ?generation_after, "executor done");
        Ok(ExecutionResult {
            success: true,
            stdout,
            stderr,
            simulated: false,
            generation_before,
            generation_after,
            duration: started.elapsed(),
        })
    }
}

fn failure(
    stdout: String,
    stderr: String,
    generation_before: Option<GenerationId>,
    started: Instant,
) -> ExecutionResult {
    ExecutionResult {
        success: false,
        stdout,
        stderr,
        simulated: false,
        generation_before,
        // Left unset: the caller rolls back to `generation_before`.
        generation_after: None,
        duration: started.elapsed(),
    }
}

fn push_block(buf: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(block);
}

/// Human-readable rendering of what Execute mode would do. Deterministic
/// for a given plan, so repeated dry runs compare equal.
pub fn render_preview(plan: &Plan) -> String {
    let mut out = String::new();
    out.push_str("Dry run - no changes were made.\n");
    out.push_str(&format!("Plan: {}\n", plan.description));
    out.push_str(&format!(
        "Risk: {} - {}\n",
        plan.risk.as_str(),
        describe_risk(plan.risk, plan.reversible)
    ));
    out.push_str("Would run:\n");
    for op in &plan.operations {
        out.push_str(&format!("  $ {}\n", op.underlying_command));
    }
    out
}
