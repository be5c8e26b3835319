//! Event fan-out for a [`Connection`](crate::Connection).
//!
//! Every subscriber owns an unbounded queue, so a slow consumer never loses
//! events the way a lagging broadcast receiver would. Dropping an
//! [`EventStream`] unregisters it.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use pagewatch_protocol::CdpEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Selects which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
	/// Every event on the connection.
	All,
	/// Browser-level events (no session id).
	Browser,
	/// Events of one attached session.
	Session(String),
}

impl EventFilter {
	pub fn matches(&self, event: &CdpEvent) -> bool {
		match self {
			EventFilter::All => true,
			EventFilter::Browser => event.session_id.is_none(),
			EventFilter::Session(id) => event.session_id.as_deref() == Some(id.as_str()),
		}
	}
}

#[derive(Debug, Default)]
struct Registry {
	next_id: u64,
	entries: HashMap<u64, (EventFilter, mpsc::UnboundedSender<CdpEvent>)>,
}

/// Shared list of live subscribers.
#[derive(Debug, Clone, Default)]
pub(crate) struct Subscribers {
	inner: Arc<Mutex<Registry>>,
}

impl Subscribers {
	pub(crate) fn subscribe(&self, filter: EventFilter) -> EventStream {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut registry = self.inner.lock();
		registry.next_id += 1;
		let id = registry.next_id;
		registry.entries.insert(id, (filter, tx));
		EventStream {
			id,
			rx,
			registry: Arc::downgrade(&self.inner),
		}
	}

	/// Delivers an event to every matching subscriber, pruning closed ones.
	pub(crate) fn dispatch(&self, event: &CdpEvent) {
		let mut registry = self.inner.lock();
		registry
			.entries
			.retain(|_, (filter, tx)| !filter.matches(event) || tx.send(event.clone()).is_ok());
	}

	/// Drops every sender so all streams end.
	pub(crate) fn close_all(&self) {
		self.inner.lock().entries.clear();
	}

	pub(crate) fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}
}

/// Stream of events matching one [`EventFilter`].
///
/// Ends when the connection closes. Unsubscribes on drop.
#[derive(Debug)]
pub struct EventStream {
	id: u64,
	rx: mpsc::UnboundedReceiver<CdpEvent>,
	registry: Weak<Mutex<Registry>>,
}

impl EventStream {
	/// Waits for the next event; `None` once the connection is gone.
	pub async fn recv(&mut self) -> Option<CdpEvent> {
		self.rx.recv().await
	}

	/// Returns an already queued event without waiting.
	pub fn try_recv(&mut self) -> Option<CdpEvent> {
		self.rx.try_recv().ok()
	}
}

impl Stream for EventStream {
	type Item = CdpEvent;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.rx.poll_recv(cx)
	}
}

impl Drop for EventStream {
	fn drop(&mut self) {
		if let Some(registry) = self.registry.upgrade() {
			registry.lock().entries.remove(&self.id);
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn filters_by_session() {
		let scoped = CdpEvent::new("Network.requestWillBeSent", json!({}), Some("S1"));
		let browser = CdpEvent::new("Target.targetCreated", json!({}), None);

		assert!(EventFilter::All.matches(&scoped));
		assert!(EventFilter::Session("S1".into()).matches(&scoped));
		assert!(!EventFilter::Session("S2".into()).matches(&scoped));
		assert!(!EventFilter::Browser.matches(&scoped));
		assert!(EventFilter::Browser.matches(&browser));
	}

	#[test]
	fn dropping_stream_unsubscribes() {
		let subscribers = Subscribers::default();
		let stream = subscribers.subscribe(EventFilter::All);
		let _other = subscribers.subscribe(EventFilter::Browser);
		assert_eq!(subscribers.len(), 2);

		drop(stream);
		assert_eq!(subscribers.len(), 1);
	}

	#[tokio::test]
	async fn slow_subscriber_loses_nothing() {
		let subscribers = Subscribers::default();
		let mut stream = subscribers.subscribe(EventFilter::Session("S1".into()));

		for n in 0..2_000 {
			subscribers.dispatch(&CdpEvent::new("Runtime.consoleAPICalled", json!({ "n": n }), Some("S1")));
		}
		subscribers.dispatch(&CdpEvent::new("Runtime.consoleAPICalled", json!({ "n": -1 }), Some("S2")));
		subscribers.close_all();

		let mut seen = 0;
		while let Some(event) = stream.recv().await {
			assert_eq!(event.params["n"], seen);
			seen += 1;
		}
		assert_eq!(seen, 2_000);
	}
}
