//! Handle to one attached tab.

use std::sync::{Arc, Weak};

use pagewatch_protocol::{CookieList, ResponseBody, Screenshot};
use serde_json::{Value, json};
use tracing::debug;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::events::{EventFilter, EventStream};

const DOCUMENT_HTML_EXPRESSION: &str = "document.documentElement ? document.documentElement.outerHTML : ''";

/// A flattened CDP session on one page target.
///
/// The handle does not own the tab or the connection: once the browser goes
/// away every call fails with [`Error::TargetClosed`].
#[derive(Debug, Clone)]
pub struct PageHandle {
	connection: Weak<Connection>,
	session_id: String,
	target_id: String,
}

impl PageHandle {
	pub(crate) fn new(connection: &Arc<Connection>, session_id: String, target_id: String) -> Self {
		Self {
			connection: Arc::downgrade(connection),
			session_id,
			target_id,
		}
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn target_id(&self) -> &str {
		&self.target_id
	}

	fn connection(&self) -> Result<Arc<Connection>> {
		self.connection
			.upgrade()
			.ok_or_else(|| Error::TargetClosed(format!("target {} (connection dropped)", self.target_id)))
	}

	async fn call(&self, method: &str, params: Value) -> Result<Value> {
		self.connection()?.send(method, params, Some(&self.session_id)).await
	}

	/// Enables the domains whose events the capture engine consumes.
	pub async fn enable_capture(&self) -> Result<()> {
		self.call("Runtime.enable", json!({})).await?;
		self.call("Network.enable", json!({})).await?;
		debug!(target = "pagewatch.runtime", session = %self.session_id, "capture domains enabled");
		Ok(())
	}

	/// Subscribes to this session's events.
	pub fn events(&self) -> Result<EventStream> {
		Ok(self.connection()?.subscribe(EventFilter::Session(self.session_id.clone())))
	}

	/// Fetches a response body as text.
	pub async fn response_body(&self, request_id: &str) -> Result<String> {
		let raw = self.call("Network.getResponseBody", json!({ "requestId": request_id })).await?;
		let body: ResponseBody = serde_json::from_value(raw)?;
		Ok(body.into_text())
	}

	/// Resolves a remote object to its JSON value.
	pub async fn resolve_value(&self, object_id: &str) -> Result<Value> {
		let raw = self
			.call(
				"Runtime.callFunctionOn",
				json!({
					"objectId": object_id,
					"functionDeclaration": "function() { return this; }",
					"returnByValue": true,
					"silent": true,
				}),
			)
			.await?;
		evaluation_value(raw, "Runtime.callFunctionOn")
	}

	/// Cookies visible to the page.
	pub async fn cookies(&self) -> Result<CookieList> {
		let raw = self.call("Network.getCookies", json!({})).await?;
		Ok(serde_json::from_value(raw)?)
	}

	/// Serialized document (`outerHTML` of the root element).
	pub async fn document_html(&self) -> Result<String> {
		let raw = self
			.call("Runtime.evaluate", json!({ "expression": DOCUMENT_HTML_EXPRESSION, "returnByValue": true }))
			.await?;
		Ok(evaluation_value(raw, "Runtime.evaluate")?.as_str().unwrap_or_default().to_string())
	}

	/// PNG of the current viewport.
	pub async fn screenshot(&self) -> Result<Screenshot> {
		let raw = self.call("Page.captureScreenshot", json!({ "format": "png" })).await?;
		Ok(serde_json::from_value(raw)?)
	}

	pub async fn current_url(&self) -> Result<String> {
		let raw = self
			.call("Runtime.evaluate", json!({ "expression": "location.href", "returnByValue": true }))
			.await?;
		Ok(evaluation_value(raw, "Runtime.evaluate")?.as_str().unwrap_or_default().to_string())
	}

	/// Ends the session. The tab itself stays open.
	pub async fn detach(&self) -> Result<()> {
		self.connection()?
			.send("Target.detachFromTarget", json!({ "sessionId": self.session_id }), None)
			.await?;
		Ok(())
	}
}

/// Extracts `result.value` from an evaluation result, surfacing page-side exceptions.
fn evaluation_value(raw: Value, method: &str) -> Result<Value> {
	if let Some(details) = raw.get("exceptionDetails") {
		let text = details.get("text").and_then(Value::as_str).unwrap_or("exception");
		return Err(Error::ProtocolError(format!("{method} threw: {text}")));
	}
	Ok(raw.get("result").and_then(|r| r.get("value")).cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn evaluation_value_reads_result() {
		let value = evaluation_value(json!({ "result": { "type": "object", "value": { "a": [1, 2] } } }), "m").unwrap();
		assert_eq!(value, json!({ "a": [1, 2] }));
		assert_eq!(evaluation_value(json!({ "result": { "type": "undefined" } }), "m").unwrap(), Value::Null);
	}

	#[test]
	fn evaluation_value_reports_exceptions() {
		let err = evaluation_value(json!({ "result": {}, "exceptionDetails": { "text": "Uncaught" } }), "Runtime.evaluate").unwrap_err();
		assert!(err.to_string().contains("Uncaught"));
	}
}
