//! Placeholder scanning.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static ROW_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"row\s*\[\s*(?:"([^"]+)"|'([^']+)')\s*\]"#).unwrap()
});

/// Characters that never occur in a real token; seeing one means the braces
/// belong to a CSS rule or script block.
const FALSE_POSITIVE_CHARS: &[char] = &[':', ';', '\r', '\n', '\t'];

/// Extract `{token}` names, skipping `{{`, `{%` and `{#` constructs.
///
/// Deduplicated case-insensitively; first occurrence order and spelling kept.
pub fn scan_single_brace_tokens(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'{' || (i > 0 && bytes[i - 1] == b'{') {
            i += 1;
            continue;
        }
        let Some(&next) = bytes.get(i + 1) else {
            break;
        };
        if matches!(next, b'{' | b'%' | b'#') {
            i += 1;
            continue;
        }
        let Some(offset) = text[i + 1..].find('}') else {
            i += 1;
            continue;
        };
        let end = i + 1 + offset;
        let token = text[i + 1..end].trim();
        i = end + 1;

        if token.is_empty()
            || token.starts_with(['%', '#'])
            || token.contains(FALSE_POSITIVE_CHARS)
        {
            continue;
        }
        if seen.insert(token.to_lowercase()) {
            tokens.push(token.to_string());
        }
    }

    tokens
}

/// Extract the literal keys of `row["..."]` / `row['...']` lookups.
///
/// Same dedup and ordering rules as [`scan_single_brace_tokens`].
pub fn scan_row_column_keys(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for caps in ROW_KEY_RE.captures_iter(text) {
        let Some(m) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let key = m.as_str().trim();
        if key.is_empty() {
            continue;
        }
        if seen.insert(key.to_lowercase()) {
            keys.push(key.to_string());
        }
    }
    keys
}
