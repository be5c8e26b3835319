use thiserror::Error;

use crate::capture::CaptureError;
use crate::connect::ConnectError;
use crate::platform::BridgeError;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
	#[error(transparent)]
	Connect(#[from] ConnectError),

	#[error(transparent)]
	Capture(#[from] CaptureError),

	#[error("platform bridge unavailable: {0}")]
	Bridge(#[from] BridgeError),

	#[error(transparent)]
	Runtime(#[from] pagewatch_runtime::Error),

	/// The browser has no tab that can be observed.
	#[error("no pages to observe")]
	NoPages,

	#[error("no tab at index {index} ({count} listed)")]
	NoSuchTab { index: usize, count: usize },

	#[error("no tab url contains {0:?}")]
	NoMatchingTab(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl WatchError {
	/// Process exit code: 2 when the session never started, 1 otherwise.
	pub fn exit_code(&self) -> i32 {
		match self {
			WatchError::Connect(_) | WatchError::Bridge(_) | WatchError::NoPages | WatchError::NoMatchingTab(_) => 2,
			_ => 1,
		}
	}

	/// Follow-up text printed under the error, when there is any.
	pub fn guidance(&self) -> Option<String> {
		match self {
			WatchError::Connect(err) => Some(err.guidance()),
			WatchError::NoPages => Some("open a tab in the browser, or rerun with --launch".into()),
			WatchError::NoMatchingTab(_) => Some("run with --tab N instead, or check the url with the `t` command".into()),
			_ => None,
		}
	}
}
