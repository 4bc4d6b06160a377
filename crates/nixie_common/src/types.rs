//! Shared value types for the nixie pipeline.
//!
//! Everything that crosses a component boundary lives here: recognized
//! intents, synthesized plans, execution results, generation checkpoints
//! and the outward `Response` shape consumed by front-ends.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonically increasing checkpoint identifier.
pub type GenerationId = u64;

// =============================================================================
// Intents
// =============================================================================

/// What the user asked for, as a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    InstallPackage,
    RemovePackage,
    SearchPackage,
    UpdateSystem,
    Rollback,
    ListGenerations,
    ListInstalled,
    GarbageCollect,
    Diagnose,
    Unknown,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::InstallPackage => "install_package",
            IntentKind::RemovePackage => "remove_package",
            IntentKind::SearchPackage => "search_package",
            IntentKind::UpdateSystem => "update_system",
            IntentKind::Rollback => "rollback",
            IntentKind::ListGenerations => "list_generations",
            IntentKind::ListInstalled => "list_installed",
            IntentKind::GarbageCollect => "garbage_collect",
            IntentKind::Diagnose => "diagnose",
            IntentKind::Unknown => "unknown",
        }
    }
}

/// A recognized intent. Immutable once produced by the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub raw_text: String,
    /// Extracted entities, e.g. `package -> firefox`, `target -> yesterday`.
    pub entities: BTreeMap<String, String>,
    /// In [0, 1]. Below the configured threshold the pipeline treats the
    /// intent as `Unknown` rather than guessing.
    pub confidence: f32,
}

impl Intent {
    /// The fallback intent: nothing matched, or the match produced no
    /// usable entity.
    pub fn unknown(raw_text: &str) -> Self {
        Self {
            kind: IntentKind::Unknown,
            raw_text: raw_text.to_string(),
            entities: BTreeMap::new(),
            confidence: 0.0,
        }
    }

    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }
}

// =============================================================================
// Plans
// =============================================================================

/// Risk tier of a plan, from harmless to state-destroying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only; no snapshot needed.
    Safe,
    /// Mutates state but a checkpoint makes it fully undoable.
    Reversible,
    /// Mutates state in ways that need explicit care.
    Destructive,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Reversible => "reversible",
            RiskLevel::Destructive => "destructive",
        }
    }

    /// Whether executing a plan at this tier changes system state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, RiskLevel::Safe)
    }
}

/// One concrete step against the underlying manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Verb, e.g. "install", "remove", "switch-generation".
    pub action: String,
    /// What the verb applies to: a package, "system", a generation ref.
    pub target: String,
    /// The exact command line handed to the manager boundary.
    pub underlying_command: String,
}

impl Operation {
    pub fn new(action: &str, target: &str, underlying_command: String) -> Self {
        Self {
            action: action.to_string(),
            target: target.to_string(),
            underlying_command,
        }
    }
}

/// An ordered set of operations derived from one intent. A plan is a pure
/// value: error recovery produces a corrected plan, never edits one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub risk: RiskLevel,
    /// True iff a generation checkpoint will cover this plan. Destructive
    /// plans with `reversible = false` require an explicit override to run.
    pub reversible: bool,
    pub description: String,
}

impl Plan {
    /// Short form for history entries and log lines.
    pub fn summary(&self) -> String {
        let ops: Vec<String> = self
            .operations
            .iter()
            .map(|op| format!("{} {}", op.action, op.target))
            .collect();
        format!("[{}] {}", self.risk.as_str(), ops.join("; "))
    }
}

// =============================================================================
// Execution
// =============================================================================

/// How a plan should be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Render what would happen; never touch the manager.
    DryRun,
    /// Actually perform the operations.
    Execute,
}

/// Outcome of one `run` call. Same shape for simulated and real runs so
/// callers can treat both uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Set on dry runs; the only field distinguishing them from real runs.
    pub simulated: bool,
    /// Checkpoint recorded before the first mutating operation.
    pub generation_before: Option<GenerationId>,
    /// Checkpoint recorded after all operations succeeded. Unset on failure
    /// so the caller can roll back to `generation_before`.
    pub generation_after: Option<GenerationId>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn simulated(stdout: String, duration: Duration) -> Self {
        Self {
            success: true,
            stdout,
            stderr: String::new(),
            simulated: true,
            generation_before: None,
            generation_after: None,
            duration,
        }
    }
}

/// Serialize `Duration` as integer milliseconds for the history log.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// =============================================================================
// Generations
// =============================================================================

/// An immutable checkpoint in the linear system history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub id: GenerationId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub parent_id: Option<GenerationId>,
    /// The underlying manager's own reference for this state, so a rollback
    /// can address it (e.g. a nix-env generation number).
    pub manager_ref: String,
}

// =============================================================================
// Search
// =============================================================================

/// One hit from a package search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMatch {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PackageMatch {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            description: None,
        }
    }
}

// =============================================================================
// Errors surfaced to the user
// =============================================================================

/// Failure classes the recovery layer can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    PermissionDenied,
    Network,
    SyntaxInvalid,
    Conflict,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::Network => "network",
            ErrorCategory::SyntaxInvalid => "syntax_invalid",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// Classified failure with actionable suggestions. Produced per failure,
/// persisted only through the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    pub suggestions: Vec<String>,
    pub retryable: bool,
}

// =============================================================================
// Outward contract
// =============================================================================

/// What every front-end receives from `execute_command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub output_text: String,
    /// Machine-readable payload where one exists (search hits, generation
    /// listings, plan previews).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<serde_json::Value>,
    pub generation_before: Option<GenerationId>,
    pub generation_after: Option<GenerationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl Response {
    pub fn failure(output_text: String, error: ErrorRecord) -> Self {
        Self {
            success: false,
            output_text,
            structured_data: None,
            generation_before: None,
            generation_after: None,
            error: Some(error),
        }
    }
}
