//! Browser-level control channel.

use std::sync::Arc;
use std::time::Duration;

use pagewatch_protocol::TargetInfo;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::events::{EventFilter, EventStream};
use crate::page::PageHandle;
use crate::transport::{TransportParts, connect_websocket};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetList {
	#[serde(default)]
	target_infos: Vec<TargetInfo>,
}

/// Live connection to a browser instance.
///
/// Owns the underlying [`Connection`]; [`PageHandle`]s only borrow it weakly.
#[derive(Debug)]
pub struct ControlChannel {
	connection: Arc<Connection>,
	url: String,
}

impl ControlChannel {
	/// Performs the WebSocket handshake with the browser endpoint.
	pub async fn connect(ws_url: &str, handshake_timeout: Duration) -> Result<Self> {
		let parts = connect_websocket(ws_url, handshake_timeout).await?;
		info!(target = "pagewatch.runtime", url = ws_url, "control channel open");
		Ok(Self::from_parts(parts, ws_url))
	}

	/// Wraps an already established transport.
	pub fn from_parts(parts: TransportParts, url: &str) -> Self {
		Self {
			connection: Connection::open(parts),
			url: url.to_string(),
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	pub fn is_closed(&self) -> bool {
		self.connection.is_closed()
	}

	/// `Browser.getVersion` product string.
	pub async fn browser_version(&self) -> Result<String> {
		let raw = self.connection.send("Browser.getVersion", json!({}), None).await?;
		Ok(raw.get("product").and_then(Value::as_str).unwrap_or_default().to_string())
	}

	/// All targets known to the browser, in browser order.
	pub async fn targets(&self) -> Result<Vec<TargetInfo>> {
		let raw = self.connection.send("Target.getTargets", json!({}), None).await?;
		let list: TargetList = serde_json::from_value(raw)?;
		Ok(list.target_infos)
	}

	/// Starts `Target.targetCreated`/`targetDestroyed` notifications.
	pub async fn discover_targets(&self) -> Result<()> {
		self.connection.send("Target.setDiscoverTargets", json!({ "discover": true }), None).await?;
		Ok(())
	}

	/// Browser-level events (target lifecycle).
	pub fn target_events(&self) -> EventStream {
		self.connection.subscribe(EventFilter::Browser)
	}

	/// Attaches a flattened session to `target`.
	pub async fn attach(&self, target: &TargetInfo) -> Result<PageHandle> {
		let raw = self
			.connection
			.send("Target.attachToTarget", json!({ "targetId": target.target_id, "flatten": true }), None)
			.await?;
		let session_id = raw
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::ProtocolError("Target.attachToTarget returned no sessionId".into()))?;
		debug!(target = "pagewatch.runtime", target_id = %target.target_id, session = session_id, "attached");
		Ok(PageHandle::new(&self.connection, session_id.to_string(), target.target_id.clone()))
	}

	/// Asks the browser process to exit. A connection that drops while doing so counts as success.
	pub async fn close_browser(&self) -> Result<()> {
		match self.connection.send("Browser.close", json!({}), None).await {
			Ok(_) | Err(Error::ChannelClosed) => Ok(()),
			Err(err) => Err(err),
		}
	}

	/// Releases the channel without touching the browser.
	pub fn close(&self) {
		self.connection.close();
	}
}

#[cfg(test)]
mod tests {
	use pagewatch_protocol::CdpEvent;

	use super::*;
	use crate::transport::memory_pair;

	#[tokio::test]
	async fn attach_yields_page_bound_to_session() {
		let (parts, mut peer) = memory_pair();
		let channel = Arc::new(ControlChannel::from_parts(parts, "ws://test"));

		let task = tokio::spawn({
			let channel = Arc::clone(&channel);
			async move {
				let targets = channel.targets().await.unwrap();
				let page = channel.attach(&targets[0]).await.unwrap();
				page.enable_capture().await.unwrap();
				page
			}
		});

		let list = peer.next_command().await.unwrap();
		assert_eq!(list.method, "Target.getTargets");
		peer.respond(
			list.id,
			json!({ "targetInfos": [{ "targetId": "T1", "type": "page", "title": "App", "url": "http://localhost:3000/", "attached": false }] }),
		);

		let attach = peer.next_command().await.unwrap();
		assert_eq!(attach.method, "Target.attachToTarget");
		assert_eq!(attach.params["targetId"], "T1");
		assert_eq!(attach.params["flatten"], true);
		peer.respond(attach.id, json!({ "sessionId": "S1" }));

		for expected in ["Runtime.enable", "Network.enable"] {
			let cmd = peer.next_command().await.unwrap();
			assert_eq!(cmd.method, expected);
			assert_eq!(cmd.session_id.as_deref(), Some("S1"));
			peer.respond(cmd.id, json!({}));
		}

		let page = task.await.unwrap();
		assert_eq!(page.session_id(), "S1");
		assert_eq!(page.target_id(), "T1");

		let mut events = page.events().unwrap();
		peer.emit(CdpEvent::new("Runtime.consoleAPICalled", json!({ "type": "log", "args": [] }), Some("S1")));
		assert_eq!(events.recv().await.unwrap().method, "Runtime.consoleAPICalled");
	}

	#[tokio::test]
	async fn page_calls_fail_as_target_closed_once_channel_is_dropped() {
		let (parts, _peer) = memory_pair();
		let channel = ControlChannel::from_parts(parts, "ws://test");
		let page = PageHandle::new(channel.connection(), "S1".into(), "T1".into());
		drop(channel);

		let err = page.cookies().await.unwrap_err();
		assert!(matches!(err, Error::TargetClosed(_)));
		assert!(err.is_stale_context());
	}

	#[tokio::test]
	async fn close_browser_tolerates_dropped_connection() {
		let (parts, mut peer) = memory_pair();
		let channel = Arc::new(ControlChannel::from_parts(parts, "ws://test"));

		let task = tokio::spawn({
			let channel = Arc::clone(&channel);
			async move { channel.close_browser().await }
		});
		let cmd = peer.next_command().await.unwrap();
		assert_eq!(cmd.method, "Browser.close");
		drop(peer);

		assert!(task.await.unwrap().is_ok());
	}
}
