//! Buffer/dump lifecycle.
//!
//! [`CaptureBuffers`] holds the two ordered log streams and the per-request
//! detail store for one capture session. Only the capture engine's
//! [`Emission`]s write into it; only [`dump`](dump::dump), `clear` and
//! `stats` read or reset it.
//!
//! In realtime mode [`LiveSink`] additionally persists every emission as it
//! is applied, and the in-memory streams become bounded rings.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;

use pagewatch_protocol::events::Headers;
use serde::Serialize;
use tracing::debug;

pub mod dump;
pub mod sink;
pub mod snapshot;

pub use dump::{ArtifactOutcome, ArtifactStatus, DumpError, DumpOptions, DumpReport, dump};
pub use sink::LiveSink;
pub use snapshot::{SnapshotSource, truncate_dom};

/// The two independent ordered log streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
	Console,
	Network,
}

/// One unit of captured output, in the order the buffers must see it.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
	Line { stream: LogStream, text: String },
	/// Drops earlier console entries; `marker` becomes the only console content.
	ConsoleCleared { marker: String },
	DetailCreated(RequestDetail),
	DetailCompleted { id: u64, response: ResponseMeta },
	DetailFailed { id: u64, failed: FailureMeta },
}

impl Emission {
	pub fn console(text: impl Into<String>) -> Self {
		Emission::Line {
			stream: LogStream::Console,
			text: text.into(),
		}
	}

	pub fn network(text: impl Into<String>) -> Self {
		Emission::Line {
			stream: LogStream::Network,
			text: text.into(),
		}
	}

	/// Id of the request detail this emission touches.
	pub fn detail_id(&self) -> Option<u64> {
		match self {
			Emission::DetailCreated(detail) => Some(detail.id),
			Emission::DetailCompleted { id, .. } | Emission::DetailFailed { id, .. } => Some(*id),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
	pub headers: Headers,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub post_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
	pub status: i64,
	pub status_text: String,
	pub headers: Headers,
	/// Text body, `None` for binary or unavailable content.
	pub body: Option<String>,
	/// Why `body` is absent (`binary, type image/png`, ...).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub body_note: Option<String>,
	/// Milliseconds.
	pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMeta {
	pub error_text: String,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub canceled: bool,
	/// Milliseconds.
	pub duration: u64,
}

/// Everything known about one request, persisted as `requests/<id>.json`.
///
/// Created when the request starts and updated at most once, by the first
/// terminal event. Neither `response` nor `failed` set means pending.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
	pub id: u64,
	pub timestamp: String,
	pub method: String,
	pub resource_type: String,
	pub url: String,
	pub request: RequestMeta,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub response: Option<ResponseMeta>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failed: Option<FailureMeta>,
}

impl RequestDetail {
	pub fn is_pending(&self) -> bool {
		self.response.is_none() && self.failed.is_none()
	}
}

/// Counts reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
	pub console: usize,
	pub network: usize,
	pub requests: usize,
	pub pending_requests: usize,
	/// Lines evicted from the realtime rings (already persisted under `live/`).
	pub evicted: u64,
}

#[derive(Debug, Default)]
pub struct CaptureBuffers {
	console: VecDeque<String>,
	network: VecDeque<String>,
	details: BTreeMap<u64, RequestDetail>,
	/// Per-stream ring size in realtime mode.
	line_limit: Option<usize>,
	evicted: u64,
}

impl CaptureBuffers {
	/// Unbounded buffers for lazy mode.
	pub fn new() -> Self {
		Self::default()
	}

	/// Ring buffers keeping the newest `limit` lines per stream.
	pub fn bounded(limit: usize) -> Self {
		Self {
			line_limit: Some(limit.max(1)),
			..Self::default()
		}
	}

	pub fn apply(&mut self, emission: &Emission) {
		match emission {
			Emission::Line { stream, text } => {
				let limit = self.line_limit;
				let lines = match stream {
					LogStream::Console => &mut self.console,
					LogStream::Network => &mut self.network,
				};
				lines.push_back(text.clone());
				if let Some(limit) = limit {
					while lines.len() > limit {
						lines.pop_front();
						self.evicted += 1;
					}
				}
			}
			Emission::ConsoleCleared { marker } => {
				self.console.clear();
				self.console.push_back(marker.clone());
			}
			Emission::DetailCreated(detail) => {
				self.details.insert(detail.id, detail.clone());
			}
			Emission::DetailCompleted { id, response } => match self.details.get_mut(id) {
				Some(detail) if detail.is_pending() => detail.response = Some(response.clone()),
				Some(_) => debug!(target = "pagewatch.capture", id, "detail already terminal, ignoring completion"),
				None => debug!(target = "pagewatch.capture", id, "completion for a cleared detail"),
			},
			Emission::DetailFailed { id, failed } => match self.details.get_mut(id) {
				Some(detail) if detail.is_pending() => detail.failed = Some(failed.clone()),
				Some(_) => debug!(target = "pagewatch.capture", id, "detail already terminal, ignoring failure"),
				None => debug!(target = "pagewatch.capture", id, "failure for a cleared detail"),
			},
		}
	}

	pub fn stats(&self) -> BufferStats {
		BufferStats {
			console: self.console.len(),
			network: self.network.len(),
			requests: self.details.len(),
			pending_requests: self.details.values().filter(|d| d.is_pending()).count(),
			evicted: self.evicted,
		}
	}

	/// Drops all buffered content without writing anything.
	pub fn clear(&mut self) {
		self.console.clear();
		self.network.clear();
		self.details.clear();
		self.evicted = 0;
	}

	pub fn console_lines(&self) -> impl Iterator<Item = &str> {
		self.console.iter().map(String::as_str)
	}

	pub fn network_lines(&self) -> impl Iterator<Item = &str> {
		self.network.iter().map(String::as_str)
	}

	/// Details in id order.
	pub fn details(&self) -> impl Iterator<Item = &RequestDetail> {
		self.details.values()
	}

	pub fn detail(&self, id: u64) -> Option<&RequestDetail> {
		self.details.get(&id)
	}
}

/// Writes `contents` to `path` through a sibling temporary file and a rename,
/// so readers never observe a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
	tmp_name.push(".tmp");
	let tmp_path = path.with_file_name(tmp_name);
	fs::write(&tmp_path, contents)?;
	fs::rename(&tmp_path, path).inspect_err(|_| {
		let _ = fs::remove_file(&tmp_path);
	})
}

/// Joins lines with `\n`, ending with a newline when non-empty.
pub fn join_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
	let mut out = String::new();
	for line in lines {
		out.push_str(line);
		out.push('\n');
	}
	out
}
