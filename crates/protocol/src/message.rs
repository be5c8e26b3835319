//! JSON-RPC envelopes exchanged with the browser.
//!
//! Commands carry a numeric `id` and optionally a `sessionId` when they are
//! addressed to an attached target (flattened session mode). Responses echo
//! the `id`; events carry a `method` and no `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command sent to the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CdpCommand {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl CdpCommand {
	pub fn new(id: u64, method: impl Into<String>, params: Value, session_id: Option<&str>) -> Self {
		Self {
			id,
			method: method.into(),
			params,
			session_id: session_id.map(str::to_string),
		}
	}
}

/// Error object of a failed command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

/// Response correlated to a [`CdpCommand`] by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpResponse {
	pub id: u64,
	pub result: Option<Value>,
	pub error: Option<RemoteError>,
}

/// Asynchronous notification emitted by the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
	pub method: String,
	pub params: Value,
	/// Session the event belongs to; `None` for browser-level events.
	pub session_id: Option<String>,
}

impl CdpEvent {
	pub fn new(method: impl Into<String>, params: Value, session_id: Option<&str>) -> Self {
		Self {
			method: method.into(),
			params,
			session_id: session_id.map(str::to_string),
		}
	}

	/// Returns the domain part of the method (`Network` for `Network.loadingFinished`).
	pub fn domain(&self) -> &str {
		self.method.split_once('.').map(|(domain, _)| domain).unwrap_or(&self.method)
	}
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
	Response(CdpResponse),
	Event(CdpEvent),
}

impl IncomingMessage {
	/// Classifies a raw JSON message. Messages with neither `id` nor `method` yield `None`.
	pub fn parse(json: &Value) -> Option<Self> {
		if let Some(id) = json.get("id").and_then(Value::as_u64) {
			return Some(Self::Response(CdpResponse {
				id,
				result: json.get("result").cloned(),
				error: json.get("error").and_then(|e| serde_json::from_value(e.clone()).ok()),
			}));
		}

		let method = json.get("method")?.as_str()?;
		Some(Self::Event(CdpEvent {
			method: method.to_string(),
			params: json.get("params").cloned().unwrap_or(Value::Null),
			session_id: json.get("sessionId").and_then(Value::as_str).map(str::to_string),
		}))
	}
}
