//! JSON-RPC correlation layer on top of a transport.
//!
//! - Assigns monotonically increasing command ids and matches responses to
//!   waiting callers
//! - Fans events out to [`EventStream`] subscribers, filtered by session
//! - Fails every pending command once the transport goes away, or once the
//!   session a command was addressed to detaches

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use pagewatch_protocol::{CdpCommand, CdpEvent, CdpResponse, IncomingMessage};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::events::{EventFilter, EventStream, Subscribers};
use crate::transport::TransportParts;

/// Default time a command may wait for its response.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

struct PendingCommand {
	method: String,
	session_id: Option<String>,
	tx: oneshot::Sender<Result<Value>>,
}

type PendingMap = Mutex<HashMap<u64, PendingCommand>>;

struct Shared {
	pending: PendingMap,
	subscribers: Subscribers,
	closed: AtomicBool,
}

impl Shared {
	fn resolve(&self, response: CdpResponse) {
		let Some(entry) = self.pending.lock().remove(&response.id) else {
			trace!(target = "pagewatch.runtime", id = response.id, "response for unknown command");
			return;
		};

		let outcome = match response.error {
			Some(err) => Err(Error::Remote {
				method: entry.method,
				code: err.code,
				message: err.message,
				data: err.data,
			}),
			None => Ok(response.result.unwrap_or(Value::Null)),
		};
		let _ = entry.tx.send(outcome);
	}

	fn handle_event(&self, event: CdpEvent) {
		if event.method == "Target.detachedFromTarget" {
			if let Some(session) = event.params.get("sessionId").and_then(Value::as_str) {
				self.fail_session(session);
			}
		}
		self.subscribers.dispatch(&event);
	}

	fn fail_session(&self, session: &str) {
		let mut pending = self.pending.lock();
		let ids: Vec<u64> = pending
			.iter()
			.filter(|(_, entry)| entry.session_id.as_deref() == Some(session))
			.map(|(id, _)| *id)
			.collect();
		for id in ids {
			if let Some(entry) = pending.remove(&id) {
				let _ = entry.tx.send(Err(Error::TargetClosed(format!("session {session} detached during {}", entry.method))));
			}
		}
	}

	fn shut_down(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let drained: Vec<PendingCommand> = self.pending.lock().drain().map(|(_, entry)| entry).collect();
		for entry in drained {
			let _ = entry.tx.send(Err(Error::ChannelClosed));
		}
		self.subscribers.close_all();
	}
}

/// Removes the pending entry if the waiting future is dropped early.
struct PendingGuard<'a> {
	id: u64,
	pending: &'a PendingMap,
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		self.pending.lock().remove(&self.id);
	}
}

/// A live JSON-RPC connection to the browser.
pub struct Connection {
	last_id: AtomicU64,
	shared: Arc<Shared>,
	outgoing: Mutex<Option<mpsc::UnboundedSender<Value>>>,
	reader: Mutex<Option<JoinHandle<()>>>,
	command_timeout: Duration,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("last_id", &self.last_id.load(Ordering::Relaxed))
			.field("closed", &self.is_closed())
			.field("command_timeout", &self.command_timeout)
			.finish()
	}
}

impl Connection {
	/// Starts the reader task over `parts`. Must be called inside a tokio runtime.
	pub fn open(parts: TransportParts) -> Arc<Self> {
		Self::open_with_timeout(parts, DEFAULT_COMMAND_TIMEOUT)
	}

	pub fn open_with_timeout(parts: TransportParts, command_timeout: Duration) -> Arc<Self> {
		let TransportParts { outgoing, mut incoming } = parts;
		let shared = Arc::new(Shared {
			pending: Mutex::new(HashMap::new()),
			subscribers: Subscribers::default(),
			closed: AtomicBool::new(false),
		});

		let reader_shared = Arc::clone(&shared);
		let reader = tokio::spawn(async move {
			while let Some(raw) = incoming.recv().await {
				match IncomingMessage::parse(&raw) {
					Some(IncomingMessage::Response(response)) => reader_shared.resolve(response),
					Some(IncomingMessage::Event(event)) => reader_shared.handle_event(event),
					None => debug!(target = "pagewatch.runtime", "ignoring unrecognized message"),
				}
			}
			debug!(target = "pagewatch.runtime", "transport closed");
			reader_shared.shut_down();
		});

		Arc::new(Self {
			last_id: AtomicU64::new(0),
			shared,
			outgoing: Mutex::new(Some(outgoing)),
			reader: Mutex::new(Some(reader)),
			command_timeout,
		})
	}

	/// Sends a command and waits for its result.
	///
	/// `session_id` addresses an attached target; `None` talks to the browser.
	pub async fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();
		self.shared.pending.lock().insert(
			id,
			PendingCommand {
				method: method.to_string(),
				session_id: session_id.map(str::to_string),
				tx,
			},
		);
		let _guard = PendingGuard {
			id,
			pending: &self.shared.pending,
		};
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let command = serde_json::to_value(CdpCommand::new(id, method, params, session_id))?;
		trace!(target = "pagewatch.runtime", id, method, session = ?session_id, "sending command");

		let queued = match self.outgoing.lock().as_ref() {
			Some(outgoing) => outgoing.send(command).is_ok(),
			None => false,
		};
		if !queued {
			return Err(Error::ChannelClosed);
		}

		match tokio::time::timeout(self.command_timeout, rx).await {
			Err(_) => Err(Error::Timeout(method.to_string())),
			Ok(Err(_)) => Err(Error::ChannelClosed),
			Ok(Ok(outcome)) => outcome,
		}
	}

	/// Subscribes to events matching `filter`.
	pub fn subscribe(&self, filter: EventFilter) -> EventStream {
		self.shared.subscribers.subscribe(filter)
	}

	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::SeqCst)
	}

	/// Closes the connection. Pending commands fail with [`Error::ChannelClosed`]
	/// and every event stream ends. Idempotent.
	pub fn close(&self) {
		if let Some(reader) = self.reader.lock().take() {
			reader.abort();
		}
		self.outgoing.lock().take();
		self.shared.shut_down();
	}

	#[cfg(test)]
	pub(crate) fn pending_len(&self) -> usize {
		self.shared.pending.lock().len()
	}

	#[cfg(test)]
	pub(crate) fn subscriber_len(&self) -> usize {
		self.shared.subscribers.len()
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		if let Some(reader) = self.reader.get_mut().take() {
			reader.abort();
		}
	}
}
