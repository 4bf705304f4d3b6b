//! Full-text query normalization.
//!
//! User input goes straight into an FTS5 MATCH expression, so everything that
//! could be parsed as FTS syntax is stripped first.

/// Normalize a raw user query for FTS5.
///
/// Keeps letters, digits and whitespace; splits on whitespace; drops tokens
/// shorter than two characters; appends a prefix-match `*` to each token.
/// Returns `None` when nothing usable remains; callers skip the index
/// entirely in that case.
pub fn sanitize_query(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let terms: Vec<String> = cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= 2)
        .map(|t| format!("{t}*"))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
