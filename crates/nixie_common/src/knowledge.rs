//! Knowledge engine - intent to plan synthesis with risk classification.
//!
//! The knowledge base is compiled into the binary: alias tables mapping
//! descriptive terms to ranked concrete packages, name remaps, and the
//! protected-package list. Risk tiers are policy constants, not guesses.
//! The search cache is consulted read-only to disambiguate package names
//! that the static tables do not cover.

use std::sync::Arc;

use tracing::debug;

use crate::errors::PipelineError;
use crate::search_cache::SearchCache;
use crate::types::{Intent, IntentKind, Operation, Plan, RiskLevel};

// =============================================================================
// Static knowledge base
// =============================================================================

/// Descriptive terms mapped to ranked concrete packages. First entry is
/// the default pick; the rest are surfaced as alternatives.
const CLASS_ALIASES: &[(&str, &[&str])] = &[
    ("text editor", &["neovim", "vscode", "emacs", "helix"]),
    ("editor", &["neovim", "vscode", "emacs", "helix"]),
    ("web browser", &["firefox", "chromium", "brave"]),
    ("browser", &["firefox", "chromium", "brave"]),
    ("music player", &["mpv", "vlc", "rhythmbox"]),
    ("video player", &["vlc", "mpv"]),
    ("terminal", &["alacritty", "kitty", "wezterm"]),
    ("mail client", &["thunderbird", "evolution"]),
    ("image editor", &["gimp", "krita", "inkscape"]),
    ("office suite", &["libreoffice", "onlyoffice-bin"]),
];

/// Exact-name remaps for common colloquial names.
const NAME_ALIASES: &[(&str, &str)] = &[
    ("code", "vscode"),
    ("vs code", "vscode"),
    ("chrome", "google-chrome"),
    ("nvim", "neovim"),
    ("node", "nodejs"),
    ("golang", "go"),
];

/// Packages whose removal would break the system. Refused outright,
/// before any plan exists.
const PROTECTED_PACKAGES: &[&str] = &[
    "nix",
    "systemd",
    "glibc",
    "bash",
    "coreutils",
    "linux",
    "grub",
];

/// Flattened pool of names the fuzzy suggester ranks against, alongside
/// whatever the cache has seen.
fn known_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CLASS_ALIASES
        .iter()
        .flat_map(|(_, candidates)| candidates.iter().copied())
        .collect();
    names.extend(NAME_ALIASES.iter().map(|(_, v)| *v));
    names.sort();
    names.dedup();
    names
}

// =============================================================================
// Risk policy
// =============================================================================

/// Risk tier and reversibility for each intent kind. Conservative by
/// policy: anything that can alter running services is destructive.
/// Garbage collection deletes old store paths, which is the one operation
/// a generation checkpoint cannot cover.
pub fn classify_risk(kind: IntentKind) -> (RiskLevel, bool) {
    match kind {
        IntentKind::SearchPackage
        | IntentKind::ListGenerations
        | IntentKind::ListInstalled
        | IntentKind::Diagnose => (RiskLevel::Safe, true),
        IntentKind::InstallPackage => (RiskLevel::Reversible, true),
        IntentKind::RemovePackage | IntentKind::UpdateSystem | IntentKind::Rollback => {
            (RiskLevel::Destructive, true)
        }
        IntentKind::GarbageCollect => (RiskLevel::Destructive, false),
        IntentKind::Unknown => (RiskLevel::Safe, true),
    }
}

/// Human-readable tier description for previews and confirmations.
pub fn describe_risk(risk: RiskLevel, reversible: bool) -> &'static str {
    match (risk, reversible) {
        (RiskLevel::Safe, _) => "Read-only; changes nothing.",
        (RiskLevel::Reversible, _) => {
            "Changes system state; a checkpoint is taken and it can be rolled back."
        }
        (RiskLevel::Destructive, true) => {
            "Destructive; a checkpoint is taken first so it can be rolled back."
        }
        (RiskLevel::Destructive, false) => {
            "Destructive and NOT coverable by a checkpoint; requires an explicit override."
        }
    }
}

// =============================================================================
// Capability handlers
// =============================================================================

/// Plugin-style extension seam. Handlers are consulted in registration
/// order before the built-in synthesis; the first one that claims an
/// intent wins.
pub trait CapabilityHandler: Send + Sync {
    fn name(&self) -> &str;
    fn can_handle(&self, intent: &Intent) -> bool;
    fn process(&self, intent: &Intent) -> Result<Plan, PipelineError>;
}

// =============================================================================
// Engine
// =============================================================================

pub struct KnowledgeEngine {
    cache: Arc<SearchCache>,
    confidence_threshold: f32,
    handlers: std::sync::RwLock<Vec<Box<dyn CapabilityHandler>>>,
}

impl KnowledgeEngine {
    pub fn new(cache: Arc<SearchCache>, confidence_threshold: f32) -> Self {
        Self {
            cache,
            confidence_threshold,
            handlers: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Register an extension handler. Order of registration is the order
    /// of consultation.
    pub fn register(&self, handler: Box<dyn CapabilityHandler>) {
        debug!(handler = handler.name(), "capability handler registered");
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .push(handler);
    }

    /// Derive a plan from a recognized intent. Fails for `Unknown` intents
    /// and for confidence below the threshold; the pipeline turns that
    /// into a clarification request.
    pub fn synthesize(&self, intent: &Intent) -> Result<Plan, PipelineError> {
        if intent.kind == IntentKind::Unknown || intent.confidence < self.confidence_threshold {
            return Err(PipelineError::UnknownIntent(intent.raw_text.clone()));
        }

        let handlers = self.handlers.read().expect("handler lock poisoned");
        for handler in handlers.iter() {
            if handler.can_handle(intent) {
                debug!(handler = handler.name(), "intent claimed by handler");
                return handler.process(intent);
            }
        }
        drop(handlers);

        self.synthesize_builtin(intent)
    }

    fn synthesize_builtin(&self, intent: &Intent) -> Result<Plan, PipelineError> {
        let (risk, reversible) = classify_risk(intent.kind);

        let plan = match intent.kind {
            IntentKind::InstallPackage => {
                let term = required_entity(intent, "package")?;
                let (package, alternatives) = self.resolve_package(term)?;
                let mut description = format!("Install {}", package);
                if !alternatives.is_empty() {
                    description.push_str(&format!(" (alternatives: {})", alternatives.join(", ")));
                }
                Plan {
                    operations: vec![Operation::new(
                        "install",
                        &package,
                        format!("nix-env -iA nixos.{}", package),
                    )],
                    risk,
                    reversible,
                    description,
                }
            }
            IntentKind::RemovePackage => {
                let term = required_entity(intent, "package")?;
                let (package, _) = self.resolve_package(term)?;
                if PROTECTED_PACKAGES.contains(&package.as_str()) {
                    return Err(PipelineError::Validation(format!(
                        "removing '{}' would break the system",
                        package
                    )));
                }
                Plan {
                    operations: vec![Operation::new(
                        "remove",
                        &package,
                        format!("nix-env -e {}", package),
                    )],
                    risk,
                    reversible,
                    description: format!("Remove {}", package),
                }
            }
            IntentKind::SearchPackage => {
                let term = required_entity(intent, "query")?;
                Plan {
                    operations: vec![Operation::new(
                        "search",
                        term,
                        format!("nix-env -qaP '{}'", term),
                    )],
                    risk,
                    reversible,
                    description: format!("Search packages matching '{}'", term),
                }
            }
            IntentKind::UpdateSystem => Plan {
                operations: vec![Operation::new(
                    "update",
                    "system",
                    "nixos-rebuild switch --upgrade".to_string(),
                )],
                risk,
                reversible,
                description: "Update the system to the latest channel state".to_string(),
            },
            IntentKind::ListGenerations => Plan {
                operations: vec![Operation::new(
                    "list-generations",
                    "system",
                    "nix-env --list-generations".to_string(),
                )],
                risk,
                reversible,
                description: "List system generations".to_string(),
            },
            IntentKind::ListInstalled => Plan {
                operations: vec![Operation::new(
                    "list-installed",
                    "system",
                    "nix-env -q".to_string(),
                )],
                risk,
                reversible,
                description: "List installed packages".to_string(),
            },
            IntentKind::GarbageCollect => Plan {
                operations: vec![Operation::new(
                    "collect-garbage",
                    "nix-store",
                    "nix-collect-garbage -d".to_string(),
                )],
                risk,
                reversible,
                description: "Delete old generations and unreferenced store paths".to_string(),
            },
            IntentKind::Diagnose => Plan {
                operations: vec![
                    Operation::new("check-units", "systemd", "systemctl --failed".to_string()),
                    Operation::new("check-disk", "/nix/store", "df -h /nix/store".to_string()),
                ],
                risk,
                reversible,
                description: "Check failed services and store disk usage".to_string(),
            },
            IntentKind::Rollback | IntentKind::Unknown => {
                // Rollback plans are synthesized against a resolved
                // generation via `rollback_plan`; a bare Rollback intent
                // reaching here is a pipeline wiring bug.
                return Err(PipelineError::UnknownIntent(intent.raw_text.clone()));
            }
        };

        Ok(plan)
    }

    /// Plan a rollback to an already-resolved generation. Destructive but
    /// always reversible: the switch appends a new checkpoint instead of
    /// truncating history.
    pub fn rollback_plan(&self, target: &crate::types::Generation) -> Plan {
        Plan {
            operations: vec![Operation::new(
                "switch-generation",
                &target.id.to_string(),
                format!("nix-env --switch-generation {}", target.manager_ref),
            )],
            risk: RiskLevel::Destructive,
            reversible: true,
            description: format!(
                "Roll back to generation {} ({})",
                target.id, target.description
            ),
        }
    }

    /// Resolve a user-supplied package term to one concrete name plus the
    /// alternatives that were not picked.
    fn resolve_package(&self, term: &str) -> Result<(String, Vec<String>), PipelineError> {
        let term = term.trim().to_lowercase();

        for (alias, canonical) in NAME_ALIASES {
            if term == *alias {
                return Ok((canonical.to_string(), Vec::new()));
            }
        }

        for (class, candidates) in CLASS_ALIASES {
            if term == *class {
                let picked = candidates[0].to_string();
                let rest = candidates[1..].iter().map(|c| c.to_string()).collect();
                return Ok((picked, rest));
            }
        }

        if crate::safety::is_safe_package_name(&term) {
            return Ok((term, Vec::new()));
        }

        // Multi-word term with no alias entry: fall back to whatever a
        // previous search cached for it. Only names that pass the command
        // token check may end up on a manager command line.
        if let Some(hits) = self.cache.peek(&term) {
            let mut safe = hits
                .iter()
                .filter(|m| crate::safety::is_safe_package_name(&m.name))
                .map(|m| m.name.clone());
            if let Some(first) = safe.next() {
                return Ok((first, safe.take(3).collect()));
            }
        }

        Err(PipelineError::UnresolvedPackage(term))
    }

    /// Fuzzy candidates for a name the manager rejected, ranked by
    /// Jaro-Winkler similarity over the static tables and cached search
    /// results.
    pub fn suggest_similar(&self, name: &str, limit: usize) -> Vec<String> {
        let name = name.to_lowercase();
        let mut pool: Vec<String> = known_names().iter().map(|s| s.to_string()).collect();
        pool.extend(self.cache.known_package_names());
        pool.sort();
        pool.dedup();

        let mut scored: Vec<(f64, String)> = pool
            .into_iter()
            .filter_map(|candidate| {
                let score = strsim::jaro_winkler(&name, &candidate.to_lowercase());
                if score >= 0.78 && candidate != name {
                    Some((score, candidate))
                } else {
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, c)| c).collect()
    }
}

fn required_entity<'a>(intent: &'a Intent, key: &str) -> Result<&'a str, PipelineError> {
    intent
        .entity(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PipelineError::UnknownIntent(intent.raw_text.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn engine() -> KnowledgeEngine {
        let cache = Arc::new(SearchCache::new(16, Duration::from_secs(300)));
        KnowledgeEngine::new(cache, 0.5)
    }

    fn intent(kind: IntentKind, entities: &[(&str, &str)], confidence: f32) -> Intent {
        Intent {
            kind,
            raw_text: "test".to_string(),
            entities: entities
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            confidence,
        }
    }

    #[test]
    fn test_install_plan_is_reversible() {
        let plan = engine()
            .synthesize(&intent(
                IntentKind::InstallPackage,
                &[("package", "firefox")],
                0.9,
            ))
            .unwrap();
        assert_eq!(plan.risk, RiskLevel::Reversible);
        assert!(plan.reversible);
        assert_eq!(plan.operations[0].underlying_command, "nix-env -iA nixos.firefox");
    }

    #[test]
    fn test_class_alias_resolution() {
        let plan = engine()
            .synthesize(&intent(
                IntentKind::InstallPackage,
                &[("package", "text editor")],
                0.9,
            ))
            .unwrap();
        assert_eq!(plan.operations[0].target, "neovim");
        assert!(plan.description.contains("alternatives"));
        assert!(plan.description.contains("vscode"));
    }

    #[test]
    fn test_name_alias_resolution() {
        let plan = engine()
            .synthesize(&intent(IntentKind::InstallPackage, &[("package", "code")], 0.9))
            .unwrap();
        assert_eq!(plan.operations[0].target, "vscode");
    }

    #[test]
    fn test_remove_is_destructive_but_reversible() {
        let plan = engine()
            .synthesize(&intent(IntentKind::RemovePackage, &[("package", "htop")], 0.9))
            .unwrap();
        assert_eq!(plan.risk, RiskLevel::Destructive);
        assert!(plan.reversible);
    }

    #[test]
    fn test_protected_package_removal_refused() {
        let err = engine()
            .synthesize(&intent(IntentKind::RemovePackage, &[("package", "glibc")], 0.9))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_garbage_collect_is_irreversible() {
        let plan = engine()
            .synthesize(&intent(IntentKind::GarbageCollect, &[], 0.9))
            .unwrap();
        assert_eq!(plan.risk, RiskLevel::Destructive);
        assert!(!plan.reversible);
    }

    #[test]
    fn test_low_confidence_is_rejected() {
        let err = engine()
            .synthesize(&intent(
                IntentKind::InstallPackage,
                &[("package", "firefox")],
                0.3,
            ))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownIntent(_)));
    }

    #[test]
    fn test_unknown_intent_is_rejected() {
        let err = engine()
            .synthesize(&Intent::unknown("blah"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownIntent(_)));
    }

    #[test]
    fn test_cache_fallback_for_unlisted_multiword_term() {
        let cache = Arc::new(SearchCache::new(16, Duration::from_secs(300)));
        cache.insert(
            "markdown previewer",
            vec![
                crate::types::PackageMatch::named("glow"),
                crate::types::PackageMatch::named("mdcat"),
            ],
        );
        let engine = KnowledgeEngine::new(cache, 0.5);
        let plan = engine
            .synthesize(&intent(
                IntentKind::InstallPackage,
                &[("package", "markdown previewer")],
                0.9,
            ))
            .unwrap();
        assert_eq!(plan.operations[0].target, "glow");
    }

    #[test]
    fn test_suggest_similar_finds_near_miss() {
        let suggestions = engine().suggest_similar("firefx", 3);
        assert!(suggestions.contains(&"firefox".to_string()));
    }

    #[test]
    fn test_handler_registration_order_wins() {
        struct Claimer;
        impl CapabilityHandler for Claimer {
            fn name(&self) -> &str {
                "claimer"
            }
            fn can_handle(&self, intent: &Intent) -> bool {
                intent.kind == IntentKind::InstallPackage
            }
            fn process(&self, _intent: &Intent) -> Result<Plan, PipelineError> {
                Ok(Plan {
                    operations: vec![],
                    risk: RiskLevel::Safe,
                    reversible: true,
                    description: "handled".to_string(),
                })
            }
        }

        let engine = engine();
        engine.register(Box::new(Claimer));
        let plan = engine
            .synthesize(&intent(
                IntentKind::InstallPackage,
                &[("package", "firefox")],
                0.9,
            ))
            .unwrap();
        assert_eq!(plan.description, "handled");
    }
}
