//! Intent recognition - natural language to typed intent mapping.
//!
//! An ordered list of tagged match rules, evaluated top to bottom; the
//! first rule that matches wins. No scoring across rules, so routing stays
//! predictable and each rule is testable on its own. Rules are compiled at
//! construction; the recognizer has no global state and no side effects.

use std::collections::BTreeMap;

use regex::Regex;

use crate::types::{Intent, IntentKind};

/// Words stripped from the head of a captured entity span. The extracted
/// target must never end up being one of the trigger words themselves
/// ("i need firefox" extracts `firefox`, not `need`).
const LEADING_FILLERS: &[&str] = &[
    "i", "me", "my", "a", "an", "the", "please", "can", "you", "could", "would", "like", "need",
    "want", "to", "for", "some", "of",
];

/// Words stripped from the tail of a captured entity span.
const TRAILING_FILLERS: &[&str] = &["please", "now", "thanks", "today"];

/// How a rule decides whether it applies.
enum Matcher {
    /// Regexes tried in order; the first with a `target` capture group that
    /// matches supplies the entity span.
    Capture(Vec<Regex>),
    /// The cleaned input contains any of these phrases. No entity.
    Phrase(&'static [&'static str]),
}

/// One routing rule: matcher strategy, produced intent kind, and the
/// confidence it carries when it fires.
struct MatchRule {
    kind: IntentKind,
    matcher: Matcher,
    /// Key under which the extracted span is stored, e.g. "package".
    entity_key: Option<&'static str>,
    base_confidence: f32,
}

pub struct IntentRecognizer {
    rules: Vec<MatchRule>,
}

impl IntentRecognizer {
    pub fn new() -> Self {
        Self {
            rules: build_rules(),
        }
    }

    /// Convert raw text into a typed intent. Deterministic for a given
    /// input and rule set. Returns `Unknown` with confidence 0 when no
    /// rule matches or the extracted entity is empty after filler
    /// stripping.
    pub fn recognize(&self, text: &str) -> Intent {
        let cleaned = clean_input(text);
        if cleaned.is_empty() {
            return Intent::unknown(text);
        }

        for rule in &self.rules {
            match &rule.matcher {
                Matcher::Capture(regexes) => {
                    for re in regexes {
                        if let Some(caps) = re.captures(&cleaned) {
                            let span = caps.name("target").map(|m| m.as_str()).unwrap_or("");
                            let entity = strip_fillers(span);
                            if entity.is_empty() {
                                // A trigger with nothing usable after it is
                                // not a recognition.
                                return Intent::unknown(text);
                            }
                            let mut entities = BTreeMap::new();
                            if let Some(key) = rule.entity_key {
                                entities.insert(key.to_string(), entity);
                            }
                            return Intent {
                                kind: rule.kind,
                                raw_text: text.to_string(),
                                entities,
                                confidence: rule.base_confidence,
                            };
                        }
                    }
                }
                Matcher::Phrase(phrases) => {
                    if phrases.iter().any(|p| cleaned.contains(p)) {
                        return Intent {
                            kind: rule.kind,
                            raw_text: text.to_string(),
                            entities: BTreeMap::new(),
                            confidence: rule.base_confidence,
                        };
                    }
                }
            }
        }

        Intent::unknown(text)
    }
}

impl Default for IntentRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase and drop punctuation that carries no routing signal.
fn clean_input(text: &str) -> String {
    let lower = text.to_lowercase();
    let replaced: String = lower
        .chars()
        .map(|c| if matches!(c, '?' | '!' | ',' | '.') { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim filler and trigger words from both ends of a captured span.
fn strip_fillers(span: &str) -> String {
    let mut words: Vec<&str> = span.split_whitespace().collect();

    while let Some(first) = words.first() {
        if LEADING_FILLERS.contains(first) {
            words.remove(0);
        } else {
            break;
        }
    }
    while let Some(last) = words.last() {
        if TRAILING_FILLERS.contains(last) {
            words.pop();
        } else {
            break;
        }
    }

    words.join(" ")
}

fn build_rules() -> Vec<MatchRule> {
    // Order matters: rollback before update so "undo the last update" is a
    // rollback; remove before install so "get rid of X" never reads as
    // "get X"; searches before installs so "find me an editor" stays a
    // search.
    vec![
        MatchRule {
            kind: IntentKind::Rollback,
            matcher: Matcher::Capture(vec![re(
                r"\b(?:roll\s*back|revert|go\s+back)\s+(?:to\s+)?(?P<target>.+)$",
            )]),
            entity_key: Some("target"),
            base_confidence: 0.9,
        },
        MatchRule {
            kind: IntentKind::Rollback,
            matcher: Matcher::Phrase(&["rollback", "roll back", "revert", "undo"]),
            entity_key: None,
            base_confidence: 0.75,
        },
        MatchRule {
            kind: IntentKind::ListGenerations,
            matcher: Matcher::Phrase(&[
                "list generations",
                "show generations",
                "show my generations",
                "generations",
            ]),
            entity_key: None,
            base_confidence: 0.85,
        },
        MatchRule {
            kind: IntentKind::GarbageCollect,
            matcher: Matcher::Phrase(&[
                "collect garbage",
                "garbage",
                "free up space",
                "free some space",
                "clean up old",
                "clean up disk",
            ]),
            entity_key: None,
            base_confidence: 0.85,
        },
        MatchRule {
            kind: IntentKind::UpdateSystem,
            matcher: Matcher::Capture(vec![re(
                r"\b(?:update|upgrade|refresh)\s+(?:my\s+|the\s+)?(?P<target>system|nixos|everything|all|computer|machine)\b",
            )]),
            entity_key: None,
            base_confidence: 0.9,
        },
        MatchRule {
            kind: IntentKind::UpdateSystem,
            matcher: Matcher::Phrase(&["update", "upgrade"]),
            entity_key: None,
            base_confidence: 0.7,
        },
        MatchRule {
            kind: IntentKind::Diagnose,
            matcher: Matcher::Phrase(&[
                "diagnose",
                "something is wrong",
                "something wrong",
                "not working",
                "broken",
                "check my system",
                "check the system",
                "health check",
                "doctor",
            ]),
            entity_key: None,
            base_confidence: 0.8,
        },
        MatchRule {
            kind: IntentKind::ListInstalled,
            matcher: Matcher::Phrase(&[
                "what is installed",
                "what's installed",
                "whats installed",
                "list installed",
                "installed packages",
                "show installed",
            ]),
            entity_key: None,
            base_confidence: 0.85,
        },
        MatchRule {
            kind: IntentKind::RemovePackage,
            matcher: Matcher::Capture(vec![re(
                r"\b(?:remove|uninstall|delete|get\s+rid\s+of)\s+(?P<target>.+)$",
            )]),
            entity_key: Some("package"),
            base_confidence: 0.9,
        },
        MatchRule {
            kind: IntentKind::SearchPackage,
            matcher: Matcher::Capture(vec![re(
                r"\b(?:search\s+for|search|find|look\s+for|is\s+there)\s+(?P<target>.+)$",
            )]),
            entity_key: Some("query"),
            base_confidence: 0.85,
        },
        MatchRule {
            kind: IntentKind::InstallPackage,
            matcher: Matcher::Capture(vec![
                re(r"\b(?:install|add|set\s*up)\s+(?P<target>.+)$"),
                re(r"\b(?:need|want|would\s+like)\s+(?P<target>.+)$"),
                re(r"\b(?:get\s+me|get|give\s+me)\s+(?P<target>.+)$"),
            ]),
            entity_key: Some("package"),
            base_confidence: 0.9,
        },
    ]
}

fn re(pattern: &str) -> Regex {
    // Patterns are compile-time constants; a failure here is a programmer
    // error caught by the rule tests.
    Regex::new(pattern).expect("invalid intent rule pattern")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognize(text: &str) -> Intent {
        IntentRecognizer::new().recognize(text)
    }

    #[test]
    fn test_install_trigger_phrasings_extract_target() {
        // The defect class to guard against: the entity must be the
        // package, never the trigger word.
        for phrasing in [
            "i need firefox",
            "i want firefox",
            "get me firefox",
            "help me install firefox",
            "install firefox",
            "please install firefox",
            "can you install firefox",
        ] {
            let intent = recognize(phrasing);
            assert_eq!(intent.kind, IntentKind::InstallPackage, "{}", phrasing);
            assert_eq!(intent.entity("package"), Some("firefox"), "{}", phrasing);
        }
    }

    #[test]
    fn test_entity_is_never_the_trigger_word() {
        let intent = recognize("i need firefox");
        assert_ne!(intent.entity("package"), Some("need"));
        let intent = recognize("get me htop");
        assert_ne!(intent.entity("package"), Some("me"));
    }

    #[test]
    fn test_multiword_target_survives() {
        let intent = recognize("i need a text editor");
        assert_eq!(intent.kind, IntentKind::InstallPackage);
        assert_eq!(intent.entity("package"), Some("text editor"));
    }

    #[test]
    fn test_empty_and_filler_input_is_unknown() {
        for text in ["", "   ", "please", "can you", "i need", "???"] {
            let intent = recognize(text);
            assert_eq!(intent.kind, IntentKind::Unknown, "{:?}", text);
            assert_eq!(intent.confidence, 0.0, "{:?}", text);
        }
    }

    #[test]
    fn test_remove_beats_install_on_get_rid_of() {
        let intent = recognize("get rid of vim");
        assert_eq!(intent.kind, IntentKind::RemovePackage);
        assert_eq!(intent.entity("package"), Some("vim"));
    }

    #[test]
    fn test_search_phrasings() {
        let intent = recognize("search for markdown editor");
        assert_eq!(intent.kind, IntentKind::SearchPackage);
        assert_eq!(intent.entity("query"), Some("markdown editor"));

        let intent = recognize("is there a music player");
        assert_eq!(intent.kind, IntentKind::SearchPackage);
        assert_eq!(intent.entity("query"), Some("music player"));
    }

    #[test]
    fn test_update_system() {
        assert_eq!(recognize("update my system").kind, IntentKind::UpdateSystem);
        assert_eq!(recognize("upgrade everything").kind, IntentKind::UpdateSystem);
        assert_eq!(recognize("update").kind, IntentKind::UpdateSystem);
    }

    #[test]
    fn test_rollback_with_and_without_target() {
        let intent = recognize("roll back to yesterday");
        assert_eq!(intent.kind, IntentKind::Rollback);
        assert_eq!(intent.entity("target"), Some("yesterday"));

        let intent = recognize("rollback to generation 42");
        assert_eq!(intent.kind, IntentKind::Rollback);
        assert_eq!(intent.entity("target"), Some("generation 42"));

        let intent = recognize("undo");
        assert_eq!(intent.kind, IntentKind::Rollback);
        assert!(intent.entity("target").is_none());
    }

    #[test]
    fn test_undo_the_last_update_is_rollback_not_update() {
        let intent = recognize("undo the last update");
        assert_eq!(intent.kind, IntentKind::Rollback);
    }

    #[test]
    fn test_list_generations_and_installed() {
        assert_eq!(
            recognize("show my generations").kind,
            IntentKind::ListGenerations
        );
        assert_eq!(
            recognize("what's installed on this machine").kind,
            IntentKind::ListInstalled
        );
    }

    #[test]
    fn test_garbage_collect_and_diagnose() {
        assert_eq!(recognize("free up space").kind, IntentKind::GarbageCollect);
        assert_eq!(
            recognize("my wifi is broken").kind,
            IntentKind::Diagnose
        );
    }

    #[test]
    fn test_gibberish_is_unknown() {
        let intent = recognize("asdf qwerty zxcv");
        assert_eq!(intent.kind, IntentKind::Unknown);
        assert_eq!(intent.confidence, 0.0);
    }

    #[test]
    fn test_punctuation_is_ignored() {
        let intent = recognize("Install firefox, please!");
        assert_eq!(intent.kind, IntentKind::InstallPackage);
        assert_eq!(intent.entity("package"), Some("firefox"));
    }

    #[test]
    fn test_recognition_is_deterministic() {
        let a = recognize("i need firefox");
        let b = recognize("i need firefox");
        assert_eq!(a, b);
    }
}
