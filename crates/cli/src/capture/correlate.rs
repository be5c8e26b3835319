//! Request correlation keyed by the browser's request id.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use pagewatch_protocol::NetworkResponse;

/// Correlation token carried by every `Network.*` event of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestToken(String);

impl RequestToken {
	pub fn new(request_id: impl Into<String>) -> Self {
		Self(request_id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RequestToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A request that has started but not reached a terminal event.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightRequest {
	/// Session-local id, the one shown in logs and artifact names.
	pub id: u64,
	pub method: String,
	pub url: String,
	pub started: DateTime<Utc>,
	/// Browser monotonic clock at start, seconds.
	pub started_at: f64,
	pub resource_type: String,
	/// Metadata from `Network.responseReceived`, once seen.
	pub response: Option<NetworkResponse>,
}

impl InFlightRequest {
	/// Milliseconds between start and `finished_at` (browser monotonic seconds).
	pub fn duration_ms(&self, finished_at: f64) -> u64 {
		if finished_at <= 0.0 || self.started_at <= 0.0 || finished_at < self.started_at {
			return 0;
		}
		((finished_at - self.started_at) * 1000.0).round() as u64
	}
}

/// In-flight map plus the monotonic id allocator.
///
/// Ids are never reused within a session: [`Correlator::clear`] drops
/// in-flight entries but keeps the counter.
#[derive(Debug, Default)]
pub struct Correlator {
	next_id: u64,
	in_flight: HashMap<RequestToken, InFlightRequest>,
}

impl Correlator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new request and returns its id.
	pub fn start(&mut self, token: RequestToken, mut request: InFlightRequest) -> u64 {
		self.next_id += 1;
		request.id = self.next_id;
		self.in_flight.insert(token, request);
		self.next_id
	}

	/// Stores response metadata for a live request. Returns false when unmatched.
	pub fn record_response(&mut self, token: &RequestToken, response: NetworkResponse) -> bool {
		match self.in_flight.get_mut(token) {
			Some(entry) => {
				entry.response = Some(response);
				true
			}
			None => false,
		}
	}

	/// Removes and returns the entry for a terminal event.
	pub fn finish(&mut self, token: &RequestToken) -> Option<InFlightRequest> {
		self.in_flight.remove(token)
	}

	pub fn is_live(&self, token: &RequestToken) -> bool {
		self.in_flight.contains_key(token)
	}

	pub fn len(&self) -> usize {
		self.in_flight.len()
	}

	pub fn is_empty(&self) -> bool {
		self.in_flight.is_empty()
	}

	/// Forgets every in-flight request.
	pub fn clear(&mut self) {
		self.in_flight.clear();
	}
}
