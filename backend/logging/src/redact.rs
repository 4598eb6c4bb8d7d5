//! Log Redaction Layer
//!
//! Scrubs bearer tokens, GitHub tokens, and key-bearing query parameters from
//! strings prior to logging. Source URLs and upstream error bodies routinely
//! carry these.

use regex::Regex;
use std::sync::LazyLock;

static BEARER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9\-\._~+/]+=*").unwrap());
static GITHUB_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:ghp|gho|ghs|github_pat)_[A-Za-z0-9_]{20,}").unwrap());
static QUERY_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([?&](?:api[_-]?key|access[_-]?token|token|apikey)=)[^&\s#]+").unwrap()
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = BEARER_RE.replace_all(input, "Bearer [REDACTED_TOKEN]");
    let redacted = GITHUB_TOKEN_RE.replace_all(&redacted, "[REDACTED_TOKEN]");
    QUERY_KEY_RE.replace_all(&redacted, "${1}[REDACTED]").into_owned()
}
