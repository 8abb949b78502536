//! Text normalization shared by the decoder and the dedup fingerprint

use regex::Regex;
use std::sync::LazyLock;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<]+?>").expect("valid html tag regex"));

/// Normalize a text field for model input
///
/// Drops quote characters, turns line breaks and tabs into spaces, collapses
/// runs of spaces and trims the ends.
pub fn clean_text(text: &str) -> String {
    let replaced: String = text
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .collect();

    replaced
        .split(' ')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Remove markup tags, leaving the text between them
pub fn strip_html_tags(html: &str) -> String {
    HTML_TAG.replace_all(html, "").into_owned()
}

/// Take the first `n` characters (not bytes)
pub fn first_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
