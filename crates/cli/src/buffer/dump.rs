//! Atomic dump of the capture buffers to the output directory.
//!
//! Layout:
//!
//! ```text
//! <output>/console.log
//! <output>/network.log
//! <output>/requests/<id>.json
//! <output>/cookies/<domain>.json
//! <output>/dom.html
//! <output>/screenshot.png
//! <output>/dump.json          manifest, written last
//! ```
//!
//! Each artifact is attempted independently. The buffers are cleared once
//! every artifact has been attempted, whatever the individual outcomes.
//! Snapshot artifacts from an earlier dump are removed first, so a skipped or
//! failed snapshot leaves nothing behind that predates this dump.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::snapshot::{SnapshotSource, cookie_documents, truncate_dom};
use super::{BufferStats, CaptureBuffers, join_lines, write_atomic};
use crate::capture::render::iso;
use crate::config::SnapshotToggles;

pub const MANIFEST_FILE: &str = "dump.json";

#[derive(Debug, Error)]
pub enum DumpError {
	#[error("{artifact}: {source}")]
	Io {
		artifact: String,
		#[source]
		source: io::Error,
	},

	#[error("{artifact}: {source}")]
	Json {
		artifact: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("{artifact}: {source}")]
	Page {
		artifact: String,
		#[source]
		source: pagewatch_runtime::Error,
	},
}

impl DumpError {
	fn io(artifact: &str) -> impl FnOnce(io::Error) -> Self + '_ {
		move |source| DumpError::Io {
			artifact: artifact.to_string(),
			source,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
	Written,
	Skipped,
	Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactOutcome {
	pub artifact: String,
	pub status: ArtifactStatus,
	/// Failure or skip reason.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

/// Result of one dump, also persisted as the manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpReport {
	pub timestamp: String,
	pub output_dir: PathBuf,
	/// Buffer counts at the moment of the dump.
	pub counts: BufferStats,
	pub artifacts: Vec<ArtifactOutcome>,
}

impl DumpReport {
	pub fn failures(&self) -> impl Iterator<Item = &ArtifactOutcome> {
		self.artifacts.iter().filter(|a| a.status == ArtifactStatus::Failed)
	}

	pub fn is_complete(&self) -> bool {
		self.failures().next().is_none()
	}

	fn record(&mut self, artifact: &str, result: Result<(), DumpError>) {
		let (status, detail) = match result {
			Ok(()) => (ArtifactStatus::Written, None),
			Err(err) => {
				warn!(target = "pagewatch.dump", artifact, error = %err, "artifact failed");
				(ArtifactStatus::Failed, Some(err.to_string()))
			}
		};
		self.artifacts.push(ArtifactOutcome {
			artifact: artifact.to_string(),
			status,
			detail,
		});
	}

	fn skip(&mut self, artifact: &str, reason: &str) {
		self.artifacts.push(ArtifactOutcome {
			artifact: artifact.to_string(),
			status: ArtifactStatus::Skipped,
			detail: Some(reason.to_string()),
		});
	}
}

/// What a dump should collect besides the buffers.
#[derive(Clone, Copy)]
pub struct DumpOptions<'a> {
	pub page: Option<&'a dyn SnapshotSource>,
	pub toggles: SnapshotToggles,
	pub dom_limit: usize,
}

/// Writes every artifact, then clears `buffers`.
pub async fn dump(buffers: &mut CaptureBuffers, output_dir: &Path, options: DumpOptions<'_>, now: DateTime<Utc>) -> DumpReport {
	let timestamp = iso(now);
	let mut report = DumpReport {
		timestamp: timestamp.clone(),
		output_dir: output_dir.to_path_buf(),
		counts: buffers.stats(),
		artifacts: Vec::new(),
	};

	report.record(
		"console.log",
		write_atomic(&output_dir.join("console.log"), join_lines(buffers.console_lines()).as_bytes()).map_err(DumpError::io("console.log")),
	);
	report.record(
		"network.log",
		write_atomic(&output_dir.join("network.log"), join_lines(buffers.network_lines()).as_bytes()).map_err(DumpError::io("network.log")),
	);
	report.record("requests", write_requests(buffers, &output_dir.join("requests")));

	remove_snapshots(output_dir);
	match options.page {
		Some(page) => collect_snapshots(&mut report, page, output_dir, &options, &timestamp).await,
		None => {
			for artifact in ["cookies", "dom.html", "screenshot.png"] {
				report.skip(artifact, "no page attached");
			}
		}
	}

	buffers.clear();

	let manifest = serde_json::to_vec_pretty(&report)
		.map_err(|source| DumpError::Json {
			artifact: MANIFEST_FILE.into(),
			source,
		})
		.and_then(|json| write_atomic(&output_dir.join(MANIFEST_FILE), &json).map_err(DumpError::io(MANIFEST_FILE)));
	if let Err(err) = manifest {
		warn!(target = "pagewatch.dump", error = %err, "manifest not written");
	}

	info!(
		target = "pagewatch.dump",
		dir = %output_dir.display(),
		console = report.counts.console,
		network = report.counts.network,
		requests = report.counts.requests,
		failed = report.failures().count(),
		"dump complete"
	);
	report
}

/// Replaces `requests/` with one document per detail. An empty buffer leaves an empty directory.
fn write_requests(buffers: &CaptureBuffers, dir: &Path) -> Result<(), DumpError> {
	reset_dir(dir).map_err(DumpError::io("requests"))?;
	let mut first_error = None;
	for detail in buffers.details() {
		let artifact = format!("requests/{}.json", detail.id);
		let result = serde_json::to_vec_pretty(detail)
			.map_err(|source| DumpError::Json {
				artifact: artifact.clone(),
				source,
			})
			.and_then(|json| write_atomic(&dir.join(format!("{}.json", detail.id)), &json).map_err(DumpError::io(&artifact)));
		if let Err(err) = result {
			warn!(target = "pagewatch.dump", error = %err, "request document failed");
			first_error.get_or_insert(err);
		}
	}
	first_error.map_or(Ok(()), Err)
}

async fn collect_snapshots(report: &mut DumpReport, page: &dyn SnapshotSource, output_dir: &Path, options: &DumpOptions<'_>, timestamp: &str) {
	if options.toggles.cookies {
		report.record("cookies", write_cookies(page, &output_dir.join("cookies"), timestamp).await);
	} else {
		report.skip("cookies", "disabled");
	}

	if options.toggles.dom {
		let result = match page.document_html().await {
			Ok(html) => write_atomic(&output_dir.join("dom.html"), &truncate_dom(&html, options.dom_limit)).map_err(DumpError::io("dom.html")),
			Err(source) => Err(DumpError::Page {
				artifact: "dom.html".into(),
				source,
			}),
		};
		report.record("dom.html", result);
	} else {
		report.skip("dom.html", "disabled");
	}

	if options.toggles.screenshot {
		let result = match page.screenshot().await {
			Ok(png) => write_atomic(&output_dir.join("screenshot.png"), &png).map_err(DumpError::io("screenshot.png")),
			Err(source) => Err(DumpError::Page {
				artifact: "screenshot.png".into(),
				source,
			}),
		};
		report.record("screenshot.png", result);
	} else {
		report.skip("screenshot.png", "disabled");
	}
}

async fn write_cookies(page: &dyn SnapshotSource, dir: &Path, timestamp: &str) -> Result<(), DumpError> {
	let page_error = |source| DumpError::Page {
		artifact: "cookies".into(),
		source,
	};
	let list = page.cookies().await.map_err(page_error)?;
	let current_url = page.current_url().await.unwrap_or_default();

	reset_dir(dir).map_err(DumpError::io("cookies"))?;
	for (stem, doc) in cookie_documents(list, &current_url, timestamp) {
		let artifact = format!("cookies/{stem}.json");
		let json = serde_json::to_vec_pretty(&doc).map_err(|source| DumpError::Json {
			artifact: artifact.clone(),
			source,
		})?;
		write_atomic(&dir.join(format!("{stem}.json")), &json).map_err(DumpError::io(&artifact))?;
	}
	Ok(())
}

fn remove_snapshots(output_dir: &Path) {
	let removals = [
		("cookies", fs::remove_dir_all(output_dir.join("cookies"))),
		("dom.html", fs::remove_file(output_dir.join("dom.html"))),
		("screenshot.png", fs::remove_file(output_dir.join("screenshot.png"))),
	];
	for (artifact, result) in removals {
		match result {
			Ok(()) => {}
			Err(err) if err.kind() == io::ErrorKind::NotFound => {}
			Err(err) => warn!(target = "pagewatch.dump", artifact, error = %err, "previous snapshot not removed"),
		}
	}
}

fn reset_dir(dir: &Path) -> io::Result<()> {
	match fs::remove_dir_all(dir) {
		Ok(()) => {}
		Err(err) if err.kind() == io::ErrorKind::NotFound => {}
		Err(err) => return Err(err),
	}
	fs::create_dir_all(dir)
}
