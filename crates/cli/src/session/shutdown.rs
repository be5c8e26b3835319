use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// What happens to the browser when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShutdownMode {
	/// Send `Browser.close` and remove a forwarding rule this session installed.
	CloseBrowser,
	/// Detach and release the channel; the browser and its forwarding keep running.
	LeaveRunning,
}

impl ShutdownMode {
	/// Default when neither flags nor config decide: close only what this session launched.
	pub fn for_session(launched: bool) -> Self {
		if launched { Self::CloseBrowser } else { Self::LeaveRunning }
	}
}

/// Why the session is ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
	Operator,
	Signal,
	Timeout,
	BrowserGone,
	Fatal(String),
}

impl ShutdownTrigger {
	pub fn describe(&self) -> &str {
		match self {
			ShutdownTrigger::Operator => "stop requested",
			ShutdownTrigger::Signal => "signal received",
			ShutdownTrigger::Timeout => "session timeout reached",
			ShutdownTrigger::BrowserGone => "browser connection lost",
			ShutdownTrigger::Fatal(reason) => reason,
		}
	}
}

/// Lets exactly one caller run session cleanup.
#[derive(Debug, Default)]
pub struct ShutdownGuard {
	fired: AtomicBool,
}

impl ShutdownGuard {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true for the first caller only.
	pub fn begin(&self) -> bool {
		!self.fired.swap(true, Ordering::SeqCst)
	}

	pub fn has_fired(&self) -> bool {
		self.fired.load(Ordering::SeqCst)
	}
}
