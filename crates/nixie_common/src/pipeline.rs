//! The pipeline - one object wiring recognizer, knowledge, cache,
//! executor, generations, classifier and history behind the single
//! inbound contract:
//!
//! `execute_command(query, mode) -> Response`
//!
//! Queries are processed one at a time per instance: an ordering lock is
//! held across recognition, synthesis and execution so mutating
//! operations are strictly ordered against the generation history.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::backend::SystemManager;
use crate::config::NixieConfig;
use crate::error_classifier::ErrorClassifier;
use crate::errors::PipelineError;
use crate::executor::CommandExecutor;
use crate::generations::GenerationManager;
use crate::history::{HistoryEntry, HistoryLog};
use crate::intent::IntentRecognizer;
use crate::knowledge::KnowledgeEngine;
use crate::search_cache::SearchCache;
use crate::types::{
    ErrorCategory, ErrorRecord, ExecMode, ExecutionResult, Generation, GenerationId, Intent,
    IntentKind, Response,
};

pub struct Pipeline {
    recognizer: IntentRecognizer,
    cache: Arc<SearchCache>,
    knowledge: Arc<KnowledgeEngine>,
    generations: Arc<GenerationManager>,
    executor: CommandExecutor,
    classifier: ErrorClassifier,
    history: HistoryLog,
    manager: Arc<dyn SystemManager>,
    confidence_threshold: f32,
    /// Serializes whole-query processing; see module docs.
    order: tokio::sync::Mutex<()>,
}

impl Pipeline {
    pub fn new(config: &NixieConfig, manager: Arc<dyn SystemManager>) -> Result<Self> {
        let state_dir = config.resolve_state_dir()?;

        let cache = Arc::new(SearchCache::init(
            config.cache.capacity,
            std::time::Duration::from_secs(config.cache.ttl_secs),
            state_dir.join("search_cache.json"),
        ));
        let knowledge = Arc::new(KnowledgeEngine::new(
            cache.clone(),
            config.pipeline.confidence_threshold,
        ));
        let generations =
            Arc::new(GenerationManager::open(&state_dir).context("opening generation log")?);
        let executor = CommandExecutor::new(manager.clone(), generations.clone());
        let classifier = ErrorClassifier::new(knowledge.clone());
        let history = HistoryLog::open(&state_dir).context("opening history log")?;

        Ok(Self {
            recognizer: IntentRecognizer::new(),
            cache,
            knowledge,
            generations,
            executor,
            classifier,
            history,
            manager,
            confidence_threshold: config.pipeline.confidence_threshold,
            order: tokio::sync::Mutex::new(()),
        })
    }

    /// The knowledge engine, for registering capability handlers.
    pub fn knowledge(&self) -> &KnowledgeEngine {
        &self.knowledge
    }

    /// The inbound contract for every front-end.
    pub async fn execute_command(&self, query: &str, mode: ExecMode) -> Response {
        self.execute_command_opts(query, mode, false).await
    }

    /// Like `execute_command`, with the explicit override for destructive
    /// plans that no checkpoint can cover.
    pub async fn execute_command_opts(
        &self,
        query: &str,
        mode: ExecMode,
        allow_irreversible: bool,
    ) -> Response {
        let started = Instant::now();
        let _guard = self.order.lock().await;

        let mut entry = HistoryEntry::new(query, mode);
        let response = self
            .process(query, mode, allow_irreversible, &mut entry)
            .await;

        entry.success = response.success;
        entry.simulated = mode == ExecMode::DryRun;
        entry.generation_before = response.generation_before;
        entry.generation_after = response.generation_after;
        entry.duration_ms = started.elapsed().as_millis() as u64;
        entry.error_category = response
            .error
            .as_ref()
            .map(|e| e.category.as_str().to_string());
        if let Err(e) = self.history.record(&entry) {
            warn!("history append failed: {}", e);
        }

        response
    }

    async fn process(
        &self,
        query: &str,
        mode: ExecMode,
        allow_irreversible: bool,
        entry: &mut HistoryEntry,
    ) -> Response {
        if let Err(e) = crate::safety::validate_query(query) {
            return validation_failure(&e);
        }

        let intent = self.recognizer.recognize(query);
        debug!(kind = intent.kind.as_str(), confidence = intent.confidence, "recognized");

        if intent.kind == IntentKind::Unknown || intent.confidence < self.confidence_threshold {
            return clarification(&intent);
        }

        match intent.kind {
            IntentKind::Rollback => {
                self.rollback_from_intent(&intent, mode, allow_irreversible, entry)
                    .await
            }
            IntentKind::SearchPackage if mode == ExecMode::Execute => {
                self.run_search(&intent, entry).await
            }
            IntentKind::ListGenerations if mode == ExecMode::Execute => {
                entry.plan_summary = "[safe] list-generations system".to_string();
                Ok(self.render_generations())
            }
            _ => self.run_plan(&intent, mode, allow_irreversible, entry).await,
        }
        .unwrap_or_else(|e| self.error_response(e, &intent))
    }

    /// The common path: synthesize a plan, run it, classify any failure.
    async fn run_plan(
        &self,
        intent: &Intent,
        mode: ExecMode,
        allow_irreversible: bool,
        entry: &mut HistoryEntry,
    ) -> Result<Response, PipelineError> {
        let plan = self.knowledge.synthesize(intent)?;
        entry.plan_summary = plan.summary();

        let result = self.executor.run(&plan, mode, allow_irreversible).await?;
        Ok(self.response_from_result(intent, &plan.description, result))
    }

    fn response_from_result(
        &self,
        intent: &Intent,
        description: &str,
        result: ExecutionResult,
    ) -> Response {
        if result.success {
            let output_text = if result.simulated {
                result.stdout.clone()
            } else if result.stdout.trim().is_empty() {
                format!("Done: {}", description)
            } else {
                format!("Done: {}\n{}", description, result.stdout.trim_end())
            };
            if let Some(after) = result.generation_after {
                info!(generation = after, "committed");
            }
            Response {
                success: true,
                output_text,
                structured_data: None,
                generation_before: result.generation_before,
                generation_after: result.generation_after,
                error: None,
            }
        } else {
            let target = intent
                .entity("package")
                .or_else(|| intent.entity("query"))
                .map(str::to_string);
            let failure_text = if result.stderr.trim().is_empty() {
                result.stdout.clone()
            } else {
                result.stderr.clone()
            };
            let record = self.classifier.classify(&failure_text, target.as_deref());
            Response {
                success: false,
                output_text: format!(
                    "{} failed: {}",
                    description, record.message
                ),
                structured_data: None,
                generation_before: result.generation_before,
                generation_after: None,
                error: Some(record),
            }
        }
    }

    /// Searches terminate in the cache layer: within the TTL a repeated
    /// search never reaches the manager again.
    async fn run_search(
        &self,
        intent: &Intent,
        entry: &mut HistoryEntry,
    ) -> Result<Response, PipelineError> {
        let term = intent
            .entity("query")
            .ok_or_else(|| PipelineError::UnknownIntent(intent.raw_text.clone()))?
            .to_string();
        entry.plan_summary = format!("[safe] search {}", term);

        let manager = self.manager.clone();
        let lookup_term = term.clone();
        let matches = match self
            .cache
            .get_or_compute(&term, || async move { manager.search(&lookup_term).await })
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                let record = self.classifier.classify(&e.to_string(), Some(&term));
                return Ok(Response::failure(
                    format!("Search for '{}' failed: {}", term, record.message),
                    record,
                ));
            }
        };

        let mut output = if matches.is_empty() {
            format!("No packages matched '{}'.", term)
        } else {
            let mut lines = vec![format!("{} packages matched '{}':", matches.len(), term)];
            for m in matches.iter().take(15) {
                match &m.version {
                    Some(v) => lines.push(format!("  {} ({})", m.name, v)),
                    None => lines.push(format!("  {}", m.name)),
                }
            }
            lines.join("\n")
        };
        if matches.len() > 15 {
            output.push_str(&format!("\n  ... and {} more", matches.len() - 15));
        }

        Ok(Response {
            success: true,
            output_text: output,
            structured_data: serde_json::to_value(&matches).ok(),
            generation_before: None,
            generation_after: None,
            error: None,
        })
    }

    /// Rollback by natural-language target: resolve against the
    /// generation log, then run like any other destructive plan.
    async fn rollback_from_intent(
        &self,
        intent: &Intent,
        mode: ExecMode,
        allow_irreversible: bool,
        entry: &mut HistoryEntry,
    ) -> Result<Response, PipelineError> {
        let target = intent.entity("target").unwrap_or("previous");
        let id = self.generations.resolve_target(target)?;
        self.rollback_to(id, mode, allow_irreversible, intent, entry)
            .await
    }

    /// Rollback by id, also reachable directly from front-ends. Rolling
    /// back to the current generation is a no-op that still succeeds.
    pub async fn rollback(&self, id: GenerationId, mode: ExecMode) -> Response {
        let _guard = self.order.lock().await;
        let started = Instant::now();
        let intent = Intent::unknown(&format!("rollback to generation {}", id));
        let mut entry = HistoryEntry::new(&intent.raw_text, mode);

        let response = self
            .rollback_to(id, mode, false, &intent, &mut entry)
            .await
            .unwrap_or_else(|e| self.error_response(e, &intent));

        entry.success = response.success;
        entry.simulated = mode == ExecMode::DryRun;
        entry.generation_before = response.generation_before;
        entry.generation_after = response.generation_after;
        entry.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.history.record(&entry) {
            warn!("history append failed: {}", e);
        }
        response
    }

    async fn rollback_to(
        &self,
        id: GenerationId,
        mode: ExecMode,
        allow_irreversible: bool,
        intent: &Intent,
        entry: &mut HistoryEntry,
    ) -> Result<Response, PipelineError> {
        let target = self
            .generations
            .get(id)
            .ok_or(PipelineError::GenerationNotFound(id))?;

        // No-op only when the target is the newest entry AND the manager
        // still sits on that state; after a failed operation the newest
        // entry is an orphan "before" snapshot and must be re-asserted.
        if self
            .generations
            .current()
            .is_some_and(|current| current.id == id)
        {
            let live_ref = self.manager.current_state_ref().await.ok();
            if live_ref.as_deref() == Some(target.manager_ref.as_str()) {
                return Ok(Response {
                    success: true,
                    output_text: format!("Already at generation {} - nothing to do.", id),
                    structured_data: None,
                    generation_before: None,
                    generation_after: None,
                    error: None,
                });
            }
        }

        let plan = self.knowledge.rollback_plan(&target);
        entry.plan_summary = plan.summary();
        let result = self.executor.run(&plan, mode, allow_irreversible).await?;
        Ok(self.response_from_result(intent, &plan.description, result))
    }

    fn render_generations(&self) -> Response {
        let generations = self.generations.list();
        let output = if generations.is_empty() {
            "No generations recorded yet. They appear after the first change.".to_string()
        } else {
            let mut lines = vec!["System generations (oldest first):".to_string()];
            let current = generations.last().map(|g| g.id);
            for g in &generations {
                let marker = if Some(g.id) == current { " (current)" } else { "" };
                lines.push(format!(
                    "  {:>4}  {}  {}{}",
                    g.id,
                    g.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    g.description,
                    marker
                ));
            }
            lines.join("\n")
        };

        Response {
            success: true,
            output_text: output,
            structured_data: serde_json::to_value(&generations).ok(),
            generation_before: None,
            generation_after: None,
            error: None,
        }
    }

    /// Map core errors that stopped the pipeline before (or instead of)
    /// execution onto user-facing responses.
    fn error_response(&self, err: PipelineError, intent: &Intent) -> Response {
        match err {
            PipelineError::UnknownIntent(_) => clarification(intent),
            PipelineError::Validation(msg) => Response::failure(
                format!("Request refused: {}", msg),
                ErrorRecord {
                    category: ErrorCategory::SyntaxInvalid,
                    message: msg,
                    suggestions: vec![
                        "Rephrase the request without shell control characters".to_string(),
                    ],
                    retryable: false,
                },
            ),
            PipelineError::UnresolvedPackage(term) => {
                let mut suggestions = vec![format!("Search for it first: \"search {}\"", term)];
                let similar = self.knowledge.suggest_similar(&term, 3);
                if !similar.is_empty() {
                    suggestions.insert(0, format!("Did you mean: {}?", similar.join(", ")));
                }
                Response::failure(
                    format!("No package known for '{}'.", term),
                    ErrorRecord {
                        category: ErrorCategory::NotFound,
                        message: format!("no package known for '{}'", term),
                        suggestions,
                        retryable: false,
                    },
                )
            }
            PipelineError::GenerationNotFound(id) => Response::failure(
                format!("Generation {} does not exist.", id),
                ErrorRecord {
                    category: ErrorCategory::NotFound,
                    message: format!("generation {} not found", id),
                    suggestions: vec!["List generations to see valid targets".to_string()],
                    retryable: false,
                },
            ),
            PipelineError::NoMatchingGeneration(target) => Response::failure(
                format!("No generation matches '{}'.", target),
                ErrorRecord {
                    category: ErrorCategory::NotFound,
                    message: format!("no generation matches '{}'", target),
                    suggestions: vec![
                        "List generations to see what you can roll back to".to_string(),
                    ],
                    retryable: false,
                },
            ),
            PipelineError::IrreversibleRefused(description) => Response::failure(
                format!(
                    "Refusing to run irreversible operation without override: {}",
                    description
                ),
                ErrorRecord {
                    category: ErrorCategory::Conflict,
                    message: "operation cannot be covered by a checkpoint".to_string(),
                    suggestions: vec![
                        "Preview it first with a dry run".to_string(),
                        "Re-run with --allow-irreversible to proceed anyway".to_string(),
                    ],
                    retryable: false,
                },
            ),
            PipelineError::Timeout(d) => Response::failure(
                format!("The system manager did not answer within {:?}.", d),
                ErrorRecord {
                    category: ErrorCategory::Network,
                    message: format!("timed out after {:?}", d),
                    suggestions: vec!["Try again; the manager may be busy".to_string()],
                    retryable: true,
                },
            ),
            PipelineError::Io(e) => Response::failure(
                format!("State file error: {}", e),
                ErrorRecord {
                    category: ErrorCategory::Unknown,
                    message: e.to_string(),
                    suggestions: vec![
                        "Check that the state directory is writable".to_string(),
                    ],
                    retryable: false,
                },
            ),
            PipelineError::Corrupt(e) => Response::failure(
                format!("State file corrupt: {}", e),
                ErrorRecord {
                    category: ErrorCategory::Unknown,
                    message: e.to_string(),
                    suggestions: vec![
                        "Move the corrupt file aside and retry".to_string(),
                    ],
                    retryable: false,
                },
            ),
        }
    }

    /// Ordered generation history, for front-end listing.
    pub fn generations(&self) -> Vec<Generation> {
        self.generations.list()
    }

    /// Recent history entries, oldest first.
    pub fn recent_history(&self, count: usize) -> Vec<HistoryEntry> {
        self.history.read_recent(count)
    }

    /// Persist the search cache. Called on orderly shutdown.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }
}

fn validation_failure(err: &PipelineError) -> Response {
    Response::failure(
        format!("Request refused: {}", err),
        ErrorRecord {
            category: ErrorCategory::SyntaxInvalid,
            message: err.to_string(),
            suggestions: vec![
                "Rephrase the request without shell control characters".to_string(),
            ],
            retryable: false,
        },
    )
}

/// A low-confidence query gets a clarification, not a guess and not a
/// classified failure.
fn clarification(intent: &Intent) -> Response {
    Response {
        success: false,
        output_text: format!(
            "I didn't catch what you want me to do with \"{}\".\n\n\
             I handle system and package requests like:\n\
             \u{2022} \"install firefox\"\n\
             \u{2022} \"search for a markdown editor\"\n\
             \u{2022} \"update my system\"\n\
             \u{2022} \"roll back to yesterday\"\n\
             \u{2022} \"list generations\"\n\n\
             Try rephrasing your request.",
            intent.raw_text
        ),
        structured_data: None,
        generation_before: None,
        generation_after: None,
        error: None,
    }
}
