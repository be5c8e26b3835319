//! Message transports for the control channel.
//!
//! A transport is reduced to two unbounded queues of JSON values:
//! [`TransportParts::outgoing`] for commands and [`TransportParts::incoming`]
//! for everything the browser sends. [`connect_websocket`] backs them with a
//! DevTools WebSocket; [`memory_pair`] backs them with channels so the whole
//! stack can run against a scripted peer.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pagewatch_protocol::{CdpCommand, CdpEvent};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Both directions of an open transport.
#[derive(Debug)]
pub struct TransportParts {
	/// Messages queued here are written to the browser in order.
	pub outgoing: mpsc::UnboundedSender<Value>,
	/// Messages read from the browser, in arrival order. Closes when the peer goes away.
	pub incoming: mpsc::UnboundedReceiver<Value>,
}

/// Opens a DevTools WebSocket and spawns its reader and writer tasks.
pub async fn connect_websocket(url: &str, timeout: Duration) -> Result<TransportParts> {
	debug!(target = "pagewatch.runtime", url, "opening devtools websocket");

	let (stream, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
		.await
		.map_err(|_| Error::HandshakeTimeout {
			url: url.to_string(),
			ms: timeout.as_millis() as u64,
		})?
		.map_err(|e| Error::ConnectionFailed {
			url: url.to_string(),
			reason: e.to_string(),
		})?;

	let (mut sink, mut source) = stream.split();
	let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Value>();
	let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Value>();

	tokio::spawn(async move {
		while let Some(message) = outgoing_rx.recv().await {
			let text = message.to_string();
			if let Err(err) = sink.send(Message::Text(text.into())).await {
				warn!(target = "pagewatch.runtime", error = %err, "websocket write failed");
				return;
			}
		}
		let _ = sink.send(Message::Close(None)).await;
	});

	tokio::spawn(async move {
		while let Some(frame) = source.next().await {
			let text = match frame {
				Ok(Message::Text(text)) => text.to_string(),
				Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
					Ok(text) => text,
					Err(_) => continue,
				},
				Ok(Message::Close(_)) => {
					debug!(target = "pagewatch.runtime", "websocket closed by browser");
					break;
				}
				Ok(_) => continue,
				Err(err) => {
					warn!(target = "pagewatch.runtime", error = %err, "websocket read failed");
					break;
				}
			};

			match serde_json::from_str::<Value>(&text) {
				Ok(value) => {
					if incoming_tx.send(value).is_err() {
						break;
					}
				}
				Err(err) => warn!(target = "pagewatch.runtime", error = %err, "dropping non-JSON frame"),
			}
		}
	});

	Ok(TransportParts {
		outgoing: outgoing_tx,
		incoming: incoming_rx,
	})
}

/// Browser side of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
	commands: mpsc::UnboundedReceiver<Value>,
	messages: mpsc::UnboundedSender<Value>,
}

/// Creates a connected in-memory transport and its scripted peer.
pub fn memory_pair() -> (TransportParts, MemoryPeer) {
	let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
	let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
	(
		TransportParts {
			outgoing: outgoing_tx,
			incoming: incoming_rx,
		},
		MemoryPeer {
			commands: outgoing_rx,
			messages: incoming_tx,
		},
	)
}

impl MemoryPeer {
	/// Waits for the next command written by the client.
	pub async fn next_command(&mut self) -> Option<CdpCommand> {
		let raw = self.commands.recv().await?;
		serde_json::from_value(raw).ok()
	}

	/// Returns the next command if one is already queued.
	pub fn try_next_command(&mut self) -> Option<CdpCommand> {
		let raw = self.commands.try_recv().ok()?;
		serde_json::from_value(raw).ok()
	}

	/// Sends a successful response.
	pub fn respond(&self, id: u64, result: Value) {
		let _ = self.messages.send(json!({ "id": id, "result": result }));
	}

	/// Sends an error response.
	pub fn respond_error(&self, id: u64, code: i64, message: &str) {
		let _ = self.messages.send(json!({ "id": id, "error": { "code": code, "message": message } }));
	}

	/// Emits an event, optionally scoped to a session.
	pub fn emit(&self, event: CdpEvent) {
		let mut raw = json!({ "method": event.method, "params": event.params });
		if let Some(session) = event.session_id {
			raw["sessionId"] = Value::String(session);
		}
		let _ = self.messages.send(raw);
	}

	/// Sends an arbitrary raw message.
	pub fn send_raw(&self, message: Value) {
		let _ = self.messages.send(message);
	}
}

#[cfg(test)]
mod tests;
