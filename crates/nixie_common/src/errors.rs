//! Error taxonomy for the pipeline.
//!
//! These are the failures the core itself produces. Failures coming back
//! from the underlying manager stay opaque text until the classifier turns
//! them into an `ErrorRecord`.

use std::time::Duration;

use thiserror::Error;

use crate::types::GenerationId;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or unsafe input, rejected before any plan is built.
    /// Never forwarded to the underlying manager.
    #[error("query rejected: {0}")]
    Validation(String),

    /// Confidence too low to act. Surfaced as a clarification request,
    /// not a failure.
    #[error("could not understand: {0}")]
    UnknownIntent(String),

    /// Rollback target does not exist in the generation log.
    #[error("generation {0} not found")]
    GenerationNotFound(GenerationId),

    /// A natural-language rollback target matched no generation.
    #[error("no generation matches '{0}'")]
    NoMatchingGeneration(String),

    /// A descriptive term could not be resolved to a concrete package
    /// through the alias tables or cached searches.
    #[error("no package known for '{0}'")]
    UnresolvedPackage(String),

    /// A destructive plan the manager cannot snapshot was asked to run
    /// without the explicit override.
    #[error("refusing irreversible plan without override: {0}")]
    IrreversibleRefused(String),

    /// The underlying manager did not answer within the deadline.
    #[error("manager call timed out after {0:?}")]
    Timeout(Duration),

    #[error("state file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether an immediate retry of the same call could plausibly succeed.
    pub fn retryable(&self) -> bool {
        matches!(self, PipelineError::Timeout(_))
    }
}
