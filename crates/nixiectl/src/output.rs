//! Rendering of pipeline responses for the terminal.
//!
//! Colors go through `console::style`, which backs off automatically when
//! stdout is not a terminal or NO_COLOR is set.

use console::style;
use nixie_common::history::HistoryEntry;
use nixie_common::types::{Generation, Response};

/// Render a response for terminal display.
pub fn render_response(response: &Response) -> String {
    let mut out = String::new();

    if response.success {
        out.push_str(&format!("{} {}\n", style("ok").green().bold(), response.output_text));
    } else {
        out.push_str(&format!(
            "{} {}\n",
            style("failed").red().bold(),
            response.output_text
        ));
    }

    if let Some(error) = &response.error {
        out.push_str(&format!(
            "  {} {}\n",
            style("category:").dim(),
            error.category.as_str()
        ));
        if error.retryable {
            out.push_str(&format!("  {}\n", style("retryable: try the same request again").dim()));
        }
        if !error.suggestions.is_empty() {
            out.push_str(&format!("  {}\n", style("suggestions:").dim()));
            for suggestion in &error.suggestions {
                out.push_str(&format!("    - {}\n", suggestion));
            }
        }
    }

    if let (Some(before), Some(after)) = (response.generation_before, response.generation_after) {
        out.push_str(&format!(
            "  {} {} -> {}\n",
            style("generation:").dim(),
            before,
            after
        ));
    } else if let Some(before) = response.generation_before {
        out.push_str(&format!(
            "  {} checkpoint {} recorded; roll back with: nixiectl rollback {} --execute\n",
            style("generation:").dim(),
            before,
            before
        ));
    }

    out
}

/// Render the generation listing.
pub fn render_generations(generations: &[Generation]) -> String {
    if generations.is_empty() {
        return "No generations recorded yet.\n".to_string();
    }
    let current = generations.last().map(|g| g.id);
    let mut out = String::new();
    for g in generations {
        let marker = if Some(g.id) == current { "  (current)" } else { "" };
        out.push_str(&format!(
            "{:>4}  {}  {}{}\n",
            g.id,
            g.timestamp.format("%Y-%m-%d %H:%M:%S"),
            g.description,
            marker
        ));
    }
    out
}

/// Render recent history entries, oldest first.
pub fn render_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No history yet.\n".to_string();
    }
    let mut out = String::new();
    for e in entries {
        let status = if e.success { "ok" } else { "failed" };
        let mode = if e.simulated { "dry-run" } else { "execute" };
        out.push_str(&format!(
            "{}  [{:7}] [{}] {}  {}\n",
            e.ts.format("%Y-%m-%d %H:%M:%S"),
            mode,
            status,
            e.query,
            e.plan_summary
        ));
    }
    out
}
