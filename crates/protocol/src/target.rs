//! Targets (tabs, workers, extension pages) and the HTTP discovery document.

use serde::{Deserialize, Serialize};

/// `Target.TargetInfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub target_id: String,
	/// `page`, `background_page`, `service_worker`, `iframe`, ...
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub attached: bool,
}

impl TargetInfo {
	pub fn is_page(&self) -> bool {
		self.kind == "page"
	}
}

/// `/json/version` response subset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser", default, skip_serializing_if = "Option::is_none")]
	pub browser: Option<String>,
	#[serde(rename = "Protocol-Version", default, skip_serializing_if = "Option::is_none")]
	pub protocol_version: Option<String>,
}

impl VersionInfo {
	/// Rewrites the host of the debugger URL.
	///
	/// Browsers report `ws://127.0.0.1:<port>/...` even when reached through a
	/// forwarding rule on another address; the socket must be opened on the
	/// address the HTTP probe actually used.
	pub fn debugger_url_via(&self, host: &str, port: u16) -> String {
		let url = &self.web_socket_debugger_url;
		let Some(rest) = url.strip_prefix("ws://") else {
			return url.clone();
		};
		match rest.find('/') {
			Some(path_start) => format!("ws://{host}:{port}{}", &rest[path_start..]),
			None => format!("ws://{host}:{port}"),
		}
	}
}
