//! The underlying system-manager boundary.
//!
//! Everything past this trait is external: the core hands over exact
//! command lines and free-text search terms, and gets back opaque
//! stdout/stderr/status to classify. Structured errors exist only for
//! conditions the core itself caused (spawn failure, timeout).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::types::{Operation, PackageMatch};

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// The call did not complete within the deadline. Retryable; any
    /// snapshot taken beforehand still allows rollback.
    #[error("manager call timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to invoke manager: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Raw outcome of one manager invocation. Deliberately unstructured: the
/// error classifier pattern-matches over this, the core never does.
#[derive(Debug, Clone, Default)]
pub struct ManagerOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ManagerOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stderr if present, else stdout. Failure text for classification.
    pub fn failure_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// What the core needs from a declarative system/package manager.
#[async_trait]
pub trait SystemManager: Send + Sync {
    /// Free-text package search. The expensive call the search cache wraps.
    async fn search(&self, term: &str) -> Result<Vec<PackageMatch>, ManagerError>;

    /// Run one concrete operation (install, remove, rebuild, switch).
    async fn run(&self, op: &Operation) -> Result<ManagerOutput, ManagerError>;

    /// The manager's own reference for the current system state, recorded
    /// into generation checkpoints so rollback can address it.
    async fn current_state_ref(&self) -> Result<String, ManagerError>;
}

// =============================================================================
// NixOS implementation
// =============================================================================

/// Talks to a Nix-style manager by spawning its CLI tools. Every call is
/// bounded by a timeout; there is no unbounded blocking on this path.
pub struct NixManager {
    timeout: Duration,
}

impl NixManager {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn invoke(&self, program: &str, args: &[&str]) -> Result<ManagerOutput, ManagerError> {
        debug!(program, ?args, "invoking manager");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| ManagerError::Timeout(self.timeout))??;

        Ok(ManagerOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Default for NixManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl SystemManager for NixManager {
    async fn search(&self, term: &str) -> Result<Vec<PackageMatch>, ManagerError> {
        let output = self.invoke("nix-env", &["-qaP", term]).await?;
        Ok(parse_search_output(&output.stdout))
    }

    async fn run(&self, op: &Operation) -> Result<ManagerOutput, ManagerError> {
        let mut parts = op.underlying_command.split_whitespace();
        let Some(program) = parts.next() else {
            return Ok(ManagerOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "empty command".to_string(),
            });
        };
        let args: Vec<&str> = parts.collect();
        self.invoke(program, &args).await
    }

    async fn current_state_ref(&self) -> Result<String, ManagerError> {
        let output = self.invoke("nix-env", &["--list-generations"]).await?;
        Ok(parse_current_generation(&output.stdout).unwrap_or_else(|| "0".to_string()))
    }
}

/// Parse `nix-env -qaP` output: one `attrpath  name-version` pair per line.
fn parse_search_output(stdout: &str) -> Vec<PackageMatch> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let attr = cols.next()?;
            let name_version = cols.next()?;
            let (name, version) = split_name_version(name_version);
            // Strip the channel prefix from the attribute path, keep the
            // trailing attribute as the canonical name when it differs.
            let canonical = attr.rsplit('.').next().unwrap_or(name).to_string();
            Some(PackageMatch {
                name: canonical,
                version,
                description: None,
            })
        })
        .collect()
}

/// Split a `name-1.2.3` store name into name and version. The version
/// starts at the first dash followed by a digit.
fn split_name_version(name_version: &str) -> (&str, Option<String>) {
    let bytes = name_version.as_bytes();
    for (i, window) in bytes.windows(2).enumerate() {
        if window[0] == b'-' && window[1].is_ascii_digit() {
            return (
                &name_version[..i],
                Some(name_version[i + 1..].to_string()),
            );
        }
    }
    (name_version, None)
}

/// Find the `(current)` line in `nix-env --list-generations` output and
/// return its generation number.
fn parse_current_generation(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find(|line| line.contains("(current)"))
        .and_then(|line| line.split_whitespace().next())
        .map(|n| n.to_string())
}
