//! Error classification and recovery suggestions.
//!
//! Rule-based pattern matching over the opaque failure text the manager
//! returned. The classifier never re-executes anything; it only produces
//! a record the caller may act on, e.g. by building a corrected plan and
//! calling the executor again.

use std::sync::Arc;

use crate::knowledge::KnowledgeEngine;
use crate::types::{ErrorCategory, ErrorRecord};

/// One classification rule: if any needle occurs in the lowercased
/// failure text, the failure belongs to this category.
struct ClassifyRule {
    needles: &'static [&'static str],
    category: ErrorCategory,
    retryable: bool,
    suggestions: &'static [&'static str],
}

/// Ordered: first matching rule wins, so the more specific needles come
/// before the catch-all network ones.
const RULES: &[ClassifyRule] = &[
    ClassifyRule {
        needles: &[
            "not found",
            "no match",
            "does not exist",
            "couldn't find",
            "unknown package",
            "attribute missing",
            "undefined variable",
        ],
        category: ErrorCategory::NotFound,
        retryable: false,
        suggestions: &[
            "Check the spelling of the package name",
            "Search for it first: nixie search <term>",
        ],
    },
    ClassifyRule {
        needles: &[
            "permission denied",
            "operation not permitted",
            "read-only file system",
            "must be root",
            "requires root",
        ],
        category: ErrorCategory::PermissionDenied,
        retryable: false,
        suggestions: &[
            "Re-run the command with elevated rights (sudo)",
            "System-wide changes need administrator privileges",
        ],
    },
    ClassifyRule {
        needles: &[
            "timed out",
            "timeout",
            "network is unreachable",
            "connection refused",
            "connection reset",
            "temporary failure in name resolution",
            "unable to download",
            "unable to fetch",
        ],
        category: ErrorCategory::Network,
        retryable: true,
        suggestions: &[
            "Check your network connection and try again",
            "The package servers may be briefly unavailable",
        ],
    },
    ClassifyRule {
        needles: &[
            "syntax error",
            "parse error",
            "unexpected token",
            "unexpected end of file",
        ],
        category: ErrorCategory::SyntaxInvalid,
        retryable: false,
        suggestions: &[
            "Validate the system configuration before rebuilding",
            "Check recently edited configuration files for typos",
        ],
    },
    ClassifyRule {
        needles: &[
            "already current",
            "already installed",
            "conflict",
            "collision between",
            "is in use",
        ],
        category: ErrorCategory::Conflict,
        retryable: false,
        suggestions: &[
            "The system may already be in the requested state",
            "List generations to confirm the current state",
        ],
    },
];

pub struct ErrorClassifier {
    knowledge: Arc<KnowledgeEngine>,
}

impl ErrorClassifier {
    pub fn new(knowledge: Arc<KnowledgeEngine>) -> Self {
        Self { knowledge }
    }

    /// Classify a raw failure. `target` is the entity the failed plan was
    /// about, if any; not-found failures use it to rank fuzzy
    /// alternatives.
    pub fn classify(&self, raw_failure: &str, target: Option<&str>) -> ErrorRecord {
        let haystack = raw_failure.to_lowercase();

        for rule in RULES {
            if rule.needles.iter().any(|n| haystack.contains(n)) {
                let mut suggestions: Vec<String> =
                    rule.suggestions.iter().map(|s| s.to_string()).collect();

                if rule.category == ErrorCategory::NotFound {
                    if let Some(target) = target {
                        let similar = self.knowledge.suggest_similar(target, 3);
                        if !similar.is_empty() {
                            suggestions.insert(0, format!("Did you mean: {}?", similar.join(", ")));
                        }
                    }
                }

                return ErrorRecord {
                    category: rule.category,
                    message: first_line(raw_failure),
                    suggestions,
                    retryable: rule.retryable,
                };
            }
        }

        ErrorRecord {
            category: ErrorCategory::Unknown,
            message: first_line(raw_failure),
            suggestions: vec![
                "Re-run with --dry-run to inspect the underlying command".to_string(),
                "Report the raw message below if the problem persists".to_string(),
            ],
            retryable: false,
        }
    }
}

/// First non-empty line of the raw failure, trimmed. Error messages from
/// the manager can be pages long; the record carries the headline.
fn first_line(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("command failed with no output")
        .to_string()
}
