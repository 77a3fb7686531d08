//! Rendering helpers shared by the dump tree and the middleware.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Serialize a string as a JSON string literal (quotes and escapes included).
pub fn json_string(input: &str) -> String {
    serde_json::Value::String(input.to_string()).to_string()
}

/// Hex SHA-256 of a rendered payload, used as the derived block identity
/// when the caller does not supply an explicit id.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Escape the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Pretty-print a JSON document with two-space indentation.
///
/// Input that does not parse as JSON is passed through unchanged; a
/// malformed response body must never take the trace down with it.
pub fn pretty_json(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

/// Render key/value pairs as an aligned preformatted listing.
pub fn aligned_pairs(pairs: &[(String, String)]) -> String {
    let width = pairs
        .iter()
        .map(|(key, _)| key.chars().count())
        .max()
        .unwrap_or(0);
    let lines: Vec<String> = pairs
        .iter()
        .map(|(key, value)| {
            let mut line = format!("{key}:");
            while line.chars().count() <= width {
                line.push(' ');
            }
            line.push(' ');
            line.push_str(value);
            line
        })
        .collect();
    format!("<pre class=\"code\">{}</pre>", lines.join("\n"))
}

/// Render an HTTP header map as an aligned listing, sorted by header name.
pub fn header_dump(headers: &HeaderMap) -> String {
    let mut pairs: Vec<(String, String)> = headers
        .keys()
        .map(|name| {
            let values: Vec<&str> = headers
                .get_all(name)
                .iter()
                .map(|v| v.to_str().unwrap_or("<binary>"))
                .collect();
            (name.as_str().to_string(), values.join("\n"))
        })
        .collect();
    pairs.sort();
    aligned_pairs(&pairs)
}
