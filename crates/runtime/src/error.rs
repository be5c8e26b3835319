//! Error types for the control-channel runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the browser.
#[derive(Debug, Error)]
pub enum Error {
	/// Failed to open the control socket.
	#[error("Failed to connect to {url}: {reason}")]
	ConnectionFailed { url: String, reason: String },

	/// The handshake did not complete in time.
	#[error("Handshake with {url} timed out after {ms}ms")]
	HandshakeTimeout { url: String, ms: u64 },

	/// Transport-level error (WebSocket framing, socket I/O).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Malformed or unexpected protocol message.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// The browser rejected a command.
	#[error("{method} failed ({code}): {message}")]
	Remote {
		method: String,
		code: i64,
		message: String,
		data: Option<String>,
	},

	/// A command did not receive its response in time.
	#[error("Timeout waiting for {0}")]
	Timeout(String),

	/// The page (or its session) no longer exists.
	#[error("Target closed: {0}")]
	TargetClosed(String),

	/// The connection to the browser is gone.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Remote error messages the browser produces once a page navigated away or closed.
const STALE_CONTEXT_MARKERS: &[&str] = &[
	"no resource with given identifier",
	"cannot find context with specified id",
	"execution context was destroyed",
	"could not find object with given id",
	"inspected target navigated or closed",
	"session with given id not found",
	"no target with given id",
	"target closed",
	"no data found for resource",
];

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_) | Error::HandshakeTimeout { .. })
	}

	/// Returns true when the error only means the observed page went away.
	///
	/// Such errors are expected after navigation or tab close and must not end
	/// a capture session. A closed connection is not stale: the browser itself
	/// is gone.
	pub fn is_stale_context(&self) -> bool {
		match self {
			Error::TargetClosed(_) => true,
			Error::Remote { message, .. } => {
				let lower = message.to_ascii_lowercase();
				STALE_CONTEXT_MARKERS.iter().any(|marker| lower.contains(marker))
			}
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn remote(message: &str) -> Error {
		Error::Remote {
			method: "Network.getResponseBody".into(),
			code: -32000,
			message: message.into(),
			data: None,
		}
	}

	#[test]
	fn navigation_errors_are_stale() {
		assert!(remote("No resource with given identifier found").is_stale_context());
		assert!(remote("Execution context was destroyed.").is_stale_context());
		assert!(Error::TargetClosed("session S1".into()).is_stale_context());
	}

	#[test]
	fn other_errors_are_not_stale() {
		assert!(!remote("Invalid parameters").is_stale_context());
		assert!(!Error::ChannelClosed.is_stale_context());
		assert!(!Error::Timeout("Network.enable".into()).is_stale_context());
	}

	#[test]
	fn timeout_classification() {
		assert!(Error::Timeout("x".into()).is_timeout());
		assert!(Error::HandshakeTimeout { url: "ws://h".into(), ms: 3000 }.is_timeout());
		assert!(!Error::ChannelClosed.is_timeout());
	}
}
