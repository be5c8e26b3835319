//! Realtime persistence under `<output>/live/`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{CaptureBuffers, Emission, LogStream, write_atomic};

pub const LIVE_DIR: &str = "live";

/// Appends every emission to durable storage as it is applied.
///
/// `live/console.log` and `live/network.log` are append-only for the whole
/// session; a console clear appends its marker rather than truncating.
/// `live/requests/<id>.json` is rewritten whenever its detail changes.
#[derive(Debug)]
pub struct LiveSink {
	dir: PathBuf,
	console: File,
	network: File,
	failures: u64,
}

impl LiveSink {
	/// Starts a fresh `live/` directory, discarding a previous session's files.
	pub fn open(output_dir: &Path) -> io::Result<Self> {
		let dir = output_dir.join(LIVE_DIR);
		match fs::remove_dir_all(&dir) {
			Ok(()) => {}
			Err(err) if err.kind() == io::ErrorKind::NotFound => {}
			Err(err) => return Err(err),
		}
		fs::create_dir_all(dir.join("requests"))?;
		let open = |name: &str| OpenOptions::new().create(true).append(true).open(dir.join(name));
		Ok(Self {
			console: open("console.log")?,
			network: open("network.log")?,
			dir,
			failures: 0,
		})
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Write failures so far. A failed write never stops capture.
	pub fn failures(&self) -> u64 {
		self.failures
	}

	/// Persists `emission`. Call after `buffers.apply(emission)` so detail
	/// documents reflect the applied state.
	pub fn write(&mut self, emission: &Emission, buffers: &CaptureBuffers) {
		let result = match emission {
			Emission::Line {
				stream: LogStream::Console,
				text,
			}
			| Emission::ConsoleCleared { marker: text } => writeln!(self.console, "{text}"),
			Emission::Line {
				stream: LogStream::Network,
				text,
			} => writeln!(self.network, "{text}"),
			_ => match emission.detail_id().and_then(|id| buffers.detail(id)) {
				Some(detail) => serde_json::to_vec_pretty(detail)
					.map_err(io::Error::other)
					.and_then(|json| write_atomic(&self.dir.join("requests").join(format!("{}.json", detail.id)), &json)),
				None => {
					debug!(target = "pagewatch.dump", "live detail already cleared");
					Ok(())
				}
			},
		};
		if let Err(err) = result {
			self.failures += 1;
			warn!(target = "pagewatch.dump", dir = %self.dir.display(), error = %err, "live write failed");
		}
	}
}
