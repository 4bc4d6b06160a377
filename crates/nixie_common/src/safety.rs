//! Input vetting before any plan exists.
//!
//! The rules are compiled into the binary. Nothing the recognizer or the
//! knowledge engine produces can reach the manager boundary unless the raw
//! query and every extracted entity pass these checks first.

use crate::errors::PipelineError;

/// Shell metacharacters that have no business in a natural-language query.
/// Their presence means either an injection attempt or input we cannot
/// safely turn into a command line.
const FORBIDDEN_CHARS: &[char] = &[';', '|', '&', '`', '$', '>', '<', '\\', '\n', '\r', '\0'];

/// Argument fragments that are never allowed anywhere in a query,
/// regardless of quoting.
const FORBIDDEN_FRAGMENTS: &[&str] = &["$(", "${", "&&", "||", ">>", "rm -rf"];

/// Maximum query length accepted. Longer input is a caller truncation
/// concern, but a bound here keeps the rule engine away from pathological
/// strings.
const MAX_QUERY_LEN: usize = 1024;

/// Validate a raw user query. Local and immediate: no generation snapshot
/// is taken for input rejected here.
pub fn validate_query(query: &str) -> Result<(), PipelineError> {
    if query.len() > MAX_QUERY_LEN {
        return Err(PipelineError::Validation(format!(
            "query longer than {} bytes",
            MAX_QUERY_LEN
        )));
    }

    if let Some(ch) = query.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(PipelineError::Validation(format!(
            "shell metacharacter '{}' is not allowed",
            ch.escape_default()
        )));
    }

    for fragment in FORBIDDEN_FRAGMENTS {
        if query.contains(fragment) {
            return Err(PipelineError::Validation(format!(
                "'{}' is not allowed",
                fragment
            )));
        }
    }

    if query.chars().any(|c| c.is_control()) {
        return Err(PipelineError::Validation(
            "control characters are not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Whether a string is acceptable as an exact package or attribute name on
/// a manager command line. Stricter than the query check: one token, no
/// whitespace, leading alphanumeric.
pub fn is_safe_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

/// Validate an entity that will be spliced into a command line.
pub fn validate_command_token(token: &str) -> Result<(), PipelineError> {
    if is_safe_package_name(token) {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "'{}' is not a safe command argument",
            token
        )))
    }
}
