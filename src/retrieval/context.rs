//! Prompt context and display snippets

use super::AuthorizedHit;

/// Collapse whitespace and cut to `max_chars` characters, marking the cut with `...`
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }

    let cut: String = cleaned.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Context handed to the chat provider: one `[source=<key>]` block per hit,
/// in rank order, separated by blank lines
pub fn build_context(hits: &[AuthorizedHit]) -> String {
    hits.iter()
        .map(|hit| format!("[source={}]\n{}", hit.chunk.source_key, hit.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
