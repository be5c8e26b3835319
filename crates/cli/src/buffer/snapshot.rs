//! Optional snapshot collaborators run by a dump: cookies, DOM and viewport.

use async_trait::async_trait;
use pagewatch_protocol::{Cookie, CookieList};
use pagewatch_runtime::{Error, PageHandle, Result};
use serde::Serialize;

/// Page state captured at dump time.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
	async fn cookies(&self) -> Result<CookieList>;
	async fn document_html(&self) -> Result<String>;
	/// PNG bytes of the viewport.
	async fn screenshot(&self) -> Result<Vec<u8>>;
	async fn current_url(&self) -> Result<String>;
}

#[async_trait]
impl SnapshotSource for PageHandle {
	async fn cookies(&self) -> Result<CookieList> {
		PageHandle::cookies(self).await
	}

	async fn document_html(&self) -> Result<String> {
		PageHandle::document_html(self).await
	}

	async fn screenshot(&self) -> Result<Vec<u8>> {
		PageHandle::screenshot(self)
			.await?
			.decode()
			.map_err(|e| Error::ProtocolError(format!("screenshot payload: {e}")))
	}

	async fn current_url(&self) -> Result<String> {
		PageHandle::current_url(self).await
	}
}

/// `cookies/<domain>.json` document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieDocument {
	pub timestamp: String,
	pub domain: String,
	pub current_url: String,
	pub count: usize,
	pub cookies: Vec<Cookie>,
}

/// One document per cookie domain, paired with its file stem.
pub fn cookie_documents(list: CookieList, current_url: &str, timestamp: &str) -> Vec<(String, CookieDocument)> {
	list.by_domain()
		.into_iter()
		.map(|(domain, cookies)| {
			let doc = CookieDocument {
				timestamp: timestamp.to_string(),
				domain: domain.clone(),
				current_url: current_url.to_string(),
				count: cookies.len(),
				cookies,
			};
			(file_stem(&domain), doc)
		})
		.collect()
}

fn file_stem(domain: &str) -> String {
	let stem: String = domain
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
		.collect();
	let stem = stem.trim_matches('.');
	if stem.is_empty() { "_".to_string() } else { stem.to_string() }
}

/// Cuts `html` at exactly `limit` bytes and appends a visible marker.
///
/// The cut may split a multi-byte character; the result is bytes, not text.
pub fn truncate_dom(html: &str, limit: usize) -> Vec<u8> {
	let bytes = html.as_bytes();
	if bytes.len() <= limit {
		return bytes.to_vec();
	}
	let mut out = bytes[..limit].to_vec();
	out.extend_from_slice(format!("\n<!-- pagewatch: truncated at {limit} bytes ({} bytes total) -->", bytes.len()).as_bytes());
	out
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn dom_over_ceiling_is_prefix_plus_marker() {
		let html = "<html>".to_string() + &"x".repeat(100) + "</html>";
		let stored = truncate_dom(&html, 16);

		let marker = format!("\n<!-- pagewatch: truncated at 16 bytes ({} bytes total) -->", html.len());
		assert_eq!(&stored[..16], &html.as_bytes()[..16]);
		assert_eq!(&stored[16..], marker.as_bytes());
	}

	#[test]
	fn dom_within_ceiling_is_untouched() {
		assert_eq!(truncate_dom("<p>hi</p>", 9), b"<p>hi</p>".to_vec());
	}

	#[test]
	fn cookie_documents_group_by_domain() {
		let list: CookieList = serde_json::from_value(json!({
			"cookies": [
				{ "name": "sid", "value": "1", "domain": ".app.local", "path": "/" },
				{ "name": "theme", "value": "dark", "domain": "app.local", "path": "/" },
				{ "name": "t", "value": "x", "domain": "cdn.example.net", "path": "/" }
			]
		}))
		.unwrap();

		let docs = cookie_documents(list, "http://app.local/", "2024-05-01T10:00:00.000Z");
		assert_eq!(docs.len(), 2);
		let (stem, doc) = &docs[0];
		assert_eq!(stem, "app.local");
		assert_eq!(doc.count, 2);
		assert_eq!(doc.current_url, "http://app.local/");

		let value = serde_json::to_value(doc).unwrap();
		assert_eq!(value["currentUrl"], "http://app.local/");
		assert_eq!(value["cookies"][0]["name"], "sid");
	}

	#[test]
	fn file_stems_are_filesystem_safe() {
		assert_eq!(file_stem("localhost:3000"), "localhost_3000");
		assert_eq!(file_stem(""), "_");
	}
}
