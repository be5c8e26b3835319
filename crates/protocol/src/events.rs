//! Typed parameters for the events pagewatch consumes.
//!
//! Only the fields the capture engine and tab manager read are modelled;
//! unknown fields are ignored so newer browsers stay compatible.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::CdpEvent;
use crate::remote::RemoteObject;
use crate::target::TargetInfo;

/// HTTP header map as sent by the browser (values are normally strings).
pub type Headers = Map<String, Value>;

/// `Runtime.consoleAPICalled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
	/// `log`, `warning`, `error`, `clear`, ...
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub args: Vec<RemoteObject>,
	/// Milliseconds since the epoch.
	#[serde(default)]
	pub timestamp: f64,
}

impl ConsoleApiCalled {
	/// Arguments joined with spaces using their preformatted text.
	pub fn preformatted_text(&self) -> String {
		self.args.iter().map(RemoteObject::preformatted).collect::<Vec<_>>().join(" ")
	}
}

/// Details of an uncaught exception.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub line_number: i64,
	#[serde(default)]
	pub column_number: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
	/// Most descriptive message available (the error's description carries the stack).
	pub fn message(&self) -> String {
		self.exception
			.as_ref()
			.and_then(|e| e.description.clone())
			.filter(|d| !d.is_empty())
			.unwrap_or_else(|| self.text.clone())
	}
}

/// `Runtime.exceptionThrown`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrown {
	#[serde(default)]
	pub timestamp: f64,
	pub exception_details: ExceptionDetails,
}

/// Request half of a network exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
	pub url: String,
	pub method: String,
	#[serde(default)]
	pub headers: Headers,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub post_data: Option<String>,
}

/// Response half of a network exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResponse {
	pub url: String,
	pub status: i64,
	#[serde(default)]
	pub status_text: String,
	#[serde(default)]
	pub headers: Headers,
	#[serde(default)]
	pub mime_type: String,
}

impl NetworkResponse {
	/// Content type from headers (case-insensitive), falling back to the MIME type.
	pub fn content_type(&self) -> String {
		self.headers
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
			.and_then(|(_, value)| value.as_str())
			.map(str::to_string)
			.unwrap_or_else(|| self.mime_type.clone())
	}
}

/// `Network.requestWillBeSent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
	pub request_id: String,
	pub request: NetworkRequest,
	/// Monotonic seconds.
	#[serde(default)]
	pub timestamp: f64,
	/// Seconds since the epoch.
	#[serde(default)]
	pub wall_time: f64,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub resource_type: Option<String>,
	/// Present when this event continues a redirect chain under the same id.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redirect_response: Option<NetworkResponse>,
}

/// `Network.responseReceived`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
	pub request_id: String,
	#[serde(default)]
	pub timestamp: f64,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub resource_type: Option<String>,
	pub response: NetworkResponse,
}

/// `Network.loadingFinished`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
	pub request_id: String,
	#[serde(default)]
	pub timestamp: f64,
	#[serde(default)]
	pub encoded_data_length: f64,
}

/// `Network.loadingFailed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
	pub request_id: String,
	#[serde(default)]
	pub timestamp: f64,
	#[serde(default)]
	pub error_text: String,
	#[serde(default)]
	pub canceled: bool,
}

/// `Target.targetCreated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetCreated {
	pub target_info: TargetInfo,
}

/// `Target.targetDestroyed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetDestroyed {
	pub target_id: String,
}

/// `Network.getResponseBody` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
	#[serde(default)]
	pub body: String,
	#[serde(default)]
	pub base64_encoded: bool,
}

impl ResponseBody {
	/// Body as text. Base64 payloads are decoded and read as lossy UTF-8.
	pub fn into_text(self) -> String {
		if !self.base64_encoded {
			return self.body;
		}
		use base64::Engine as _;
		match base64::engine::general_purpose::STANDARD.decode(self.body.as_bytes()) {
			Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
			Err(_) => self.body,
		}
	}
}

/// Events understood by pagewatch.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
	Console(ConsoleApiCalled),
	Exception(ExceptionThrown),
	RequestStarted(RequestWillBeSent),
	ResponseReceived(ResponseReceived),
	RequestFinished(LoadingFinished),
	RequestFailed(LoadingFailed),
	TargetCreated(TargetCreated),
	TargetDestroyed(TargetDestroyed),
}

impl PageEvent {
	/// Decodes a raw event; `None` when the method is not one pagewatch consumes.
	pub fn from_event(event: &CdpEvent) -> Option<Result<Self, serde_json::Error>> {
		fn decode<T: serde::de::DeserializeOwned>(params: &Value, wrap: fn(T) -> PageEvent) -> Option<Result<PageEvent, serde_json::Error>> {
			Some(T::deserialize(params).map(wrap))
		}

		let params = &event.params;
		match event.method.as_str() {
			"Runtime.consoleAPICalled" => decode(params, PageEvent::Console),
			"Runtime.exceptionThrown" => decode(params, PageEvent::Exception),
			"Network.requestWillBeSent" => decode(params, PageEvent::RequestStarted),
			"Network.responseReceived" => decode(params, PageEvent::ResponseReceived),
			"Network.loadingFinished" => decode(params, PageEvent::RequestFinished),
			"Network.loadingFailed" => decode(params, PageEvent::RequestFailed),
			"Target.targetCreated" => decode(params, PageEvent::TargetCreated),
			"Target.targetDestroyed" => decode(params, PageEvent::TargetDestroyed),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn decodes_request_with_redirect() {
		let event = CdpEvent::new(
			"Network.requestWillBeSent",
			json!({
				"requestId": "42.1",
				"request": { "url": "https://a/next", "method": "GET", "headers": { "Accept": "*/*" } },
				"timestamp": 10.5,
				"wallTime": 1700000000.0,
				"type": "Fetch",
				"redirectResponse": { "url": "https://a/x", "status": 302, "statusText": "Found", "headers": {}, "mimeType": "" }
			}),
			Some("S"),
		);
		let Some(Ok(PageEvent::RequestStarted(started))) = PageEvent::from_event(&event) else {
			panic!("expected request started");
		};
		assert_eq!(started.request_id, "42.1");
		assert_eq!(started.resource_type.as_deref(), Some("Fetch"));
		assert_eq!(started.redirect_response.unwrap().status, 302);
	}

	#[test]
	fn content_type_prefers_header_case_insensitively() {
		let response: NetworkResponse = serde_json::from_value(json!({
			"url": "https://a/x.json",
			"status": 200,
			"headers": { "Content-Type": "application/json; charset=utf-8" },
			"mimeType": "text/plain"
		}))
		.unwrap();
		assert_eq!(response.content_type(), "application/json; charset=utf-8");

		let bare: NetworkResponse = serde_json::from_value(json!({ "url": "u", "status": 200, "mimeType": "image/png" })).unwrap();
		assert_eq!(bare.content_type(), "image/png");
	}

	#[test]
	fn unknown_methods_are_skipped_and_bad_params_reported() {
		let other = CdpEvent::new("Page.frameNavigated", json!({}), None);
		assert!(PageEvent::from_event(&other).is_none());

		let broken = CdpEvent::new("Network.loadingFinished", json!({ "timestamp": 1.0 }), None);
		assert!(matches!(PageEvent::from_event(&broken), Some(Err(_))));
	}

	#[test]
	fn exception_message_prefers_description() {
		let thrown: ExceptionThrown = serde_json::from_value(json!({
			"timestamp": 1.0,
			"exceptionDetails": {
				"text": "Uncaught",
				"lineNumber": 3,
				"columnNumber": 7,
				"exception": { "type": "object", "subtype": "error", "description": "TypeError: x is undefined\n    at f (app.js:3:7)" }
			}
		}))
		.unwrap();
		assert!(thrown.exception_details.message().starts_with("TypeError: x is undefined"));
	}

	#[test]
	fn response_body_decodes_base64_text() {
		let plain = ResponseBody { body: "{\"k\":1}".into(), base64_encoded: false };
		assert_eq!(plain.into_text(), "{\"k\":1}");

		let encoded = ResponseBody { body: "aGVsbG8=".into(), base64_encoded: true };
		assert_eq!(encoded.into_text(), "hello");
	}
}
