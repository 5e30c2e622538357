//! Log Redaction Layer
//!
//! Scrubs secret material (base64 key blobs, device key values, bearer
//! tokens) from strings prior to logging.

use regex::Regex;
use std::sync::LazyLock;

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"((?:ed25519|curve25519):[A-Za-z0-9_]+"?\s*[:=]\s*"?)[A-Za-z0-9+/_-]{16,}={0,2}"#)
        .expect("key value pattern")
});
static BEARER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9\-\._~+/]+=*").expect("bearer pattern"));
static BASE64_BLOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/]{32,}={0,2}").expect("base64 pattern"));

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let mut redacted = KEY_VALUE_RE
        .replace_all(input, "${1}[REDACTED_KEY]")
        .to_string();
    redacted = BEARER_RE
        .replace_all(&redacted, "[REDACTED_TOKEN]")
        .to_string();
    redacted = BASE64_BLOB_RE
        .replace_all(&redacted, "[REDACTED_SECRET]")
        .to_string();
    redacted
}
