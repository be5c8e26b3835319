//! Text forms of captured events.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::correlate::RequestToken;

pub const UNMATCHED_ID: &str = "?";

/// ISO-8601 UTC with millisecond precision.
pub fn iso(ts: DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn console_level(kind: &str) -> &str {
	match kind {
		"warning" => "warn",
		"startGroup" | "startGroupCollapsed" => "group",
		"endGroup" => "groupEnd",
		other => other,
	}
}

pub fn console_line(now: DateTime<Utc>, level: &str, text: &str) -> String {
	format!("[{}] [{}] {text}", iso(now), console_level(level))
}

pub fn page_error_line(now: DateTime<Utc>, text: &str) -> String {
	format!("[{}] [pageerror] {text}", iso(now))
}

pub fn clear_marker(now: DateTime<Utc>) -> String {
	format!("[{}] --- console cleared ---", iso(now))
}

pub fn hot_reload_separator(now: DateTime<Utc>) -> String {
	format!("==================== hot reload @ {} ====================", iso(now))
}

pub fn request_line(now: DateTime<Utc>, id: u64, method: &str, url: &str) -> String {
	format!("[{}] → {id} {method} {url}", iso(now))
}

pub fn completion_line(now: DateTime<Utc>, id: u64, status: i64, url: &str, duration_ms: u64) -> String {
	format!("[{}] ← {id} {status} {url} ({duration_ms}ms)", iso(now))
}

pub fn failure_line(now: DateTime<Utc>, id: u64, url: &str, error_text: &str, duration_ms: u64) -> String {
	format!("[{}] ✗ {id} FAILED {url} {error_text} ({duration_ms}ms)", iso(now))
}

pub fn unmatched_completion_line(now: DateTime<Utc>, token: &RequestToken) -> String {
	format!("[{}] ← {UNMATCHED_ID} - unknown request {token}", iso(now))
}

pub fn unmatched_failure_line(now: DateTime<Utc>, token: &RequestToken, error_text: &str) -> String {
	format!("[{}] ✗ {UNMATCHED_ID} FAILED unknown request {token} {error_text}", iso(now))
}

/// Whether a body of this content type is captured as text.
pub fn is_textual(content_type: &str) -> bool {
	let lower = content_type.to_ascii_lowercase();
	["json", "text", "javascript", "xml"].iter().any(|kind| lower.contains(kind))
}

pub fn binary_note(content_type: &str) -> String {
	let kind = content_type.split(';').next().map(str::trim).filter(|s| !s.is_empty()).unwrap_or("unknown");
	format!("binary, type {kind}")
}

/// Cuts `body` at the last char boundary not above `limit` and appends a marker.
pub fn truncate_body(body: String, limit: usize) -> String {
	if body.len() <= limit {
		return body;
	}
	let mut cut = limit;
	while !body.is_char_boundary(cut) {
		cut -= 1;
	}
	format!("{}\n... [truncated, {} bytes total]", &body[..cut], body.len())
}

/// Text form of a resolved console argument.
pub fn render_value(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Object(_) | Value::Array(_) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
		other => other.to_string(),
	}
}
