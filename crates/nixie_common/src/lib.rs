//! Nixie Common - the natural-language command pipeline.
//!
//! Free-form text in, safe and reversible system operations out. The
//! pipeline recognizes a typed intent, synthesizes a risk-tagged plan,
//! previews or executes it against the underlying manager, and records a
//! generation checkpoint before anything mutating so every change can be
//! rolled back.
//!
//! Front-ends (CLI, TUI, voice) consume [`Pipeline::execute_command`] and
//! render the [`types::Response`]; they never talk to the manager
//! directly.

pub mod backend;
pub mod config;
pub mod error_classifier;
pub mod errors;
pub mod executor;
pub mod generations;
pub mod history;
pub mod intent;
pub mod knowledge;
pub mod pipeline;
pub mod safety;
pub mod search_cache;
pub mod types;

pub use backend::{ManagerError, ManagerOutput, NixManager, SystemManager};
pub use config::NixieConfig;
pub use errors::PipelineError;
pub use pipeline::Pipeline;
pub use types::{
    ErrorCategory, ErrorRecord, ExecMode, ExecutionResult, Generation, GenerationId, Intent,
    IntentKind, Operation, PackageMatch, Plan, Response, RiskLevel,
};
