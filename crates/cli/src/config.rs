//! Session configuration.
//!
//! Values come from an optional JSON file and are then overridden by CLI
//! flags. A missing, unreadable or malformed file falls back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::ShutdownMode;

/// File looked up inside the output directory when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "pagewatch.json";

/// How captured entries reach disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
	/// Memory only until an explicit dump.
	#[default]
	Lazy,
	/// Every entry is also appended to `live/` as it arrives.
	Realtime,
}

/// Which snapshot collaborators run during a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotToggles {
	pub cookies: bool,
	pub dom: bool,
	pub screenshot: bool,
}

impl Default for SnapshotToggles {
	fn default() -> Self {
		Self {
			cookies: true,
			dom: true,
			screenshot: true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
	pub output_dir: PathBuf,
	pub mode: CaptureMode,
	/// Regular expressions; matching console messages are dropped.
	pub ignore_patterns: Vec<String>,
	/// Case-insensitive substrings that mark a dev-server hot reload.
	pub hot_reload_markers: Vec<String>,
	/// Ceiling for captured response bodies, in bytes.
	pub body_limit: usize,
	/// Ceiling for the DOM snapshot, in bytes.
	pub dom_limit: usize,
	/// Entries kept in memory per stream in realtime mode.
	pub realtime_memory_limit: usize,
	pub snapshots: SnapshotToggles,
	pub candidate_ports: Vec<u16>,
	/// Discovery polls before giving up when no browser is found.
	pub repoll_attempts: u32,
	pub repoll_interval_ms: u64,
	/// `None` closes the browser only when this session launched it.
	pub shutdown: Option<ShutdownMode>,
	pub session_timeout_secs: Option<u64>,
	pub control_socket: Option<PathBuf>,
	/// Profile directory for launched browsers.
	pub profile_dir: Option<PathBuf>,
	/// New-tab notices kept for `status`.
	pub notice_limit: usize,
}

impl Default for WatchConfig {
	fn default() -> Self {
		Self {
			output_dir: PathBuf::from(".pagewatch"),
			mode: CaptureMode::Lazy,
			ignore_patterns: Vec::new(),
			hot_reload_markers: vec![
				"[vite] hot updated".into(),
				"[vite] page reload".into(),
				"[hmr]".into(),
				"[fast refresh]".into(),
				"[webpack-dev-server]".into(),
			],
			body_limit: 64 * 1024,
			dom_limit: 2 * 1024 * 1024,
			realtime_memory_limit: 500,
			snapshots: SnapshotToggles::default(),
			candidate_ports: (9222..=9229).collect(),
			repoll_attempts: 30,
			repoll_interval_ms: 2_000,
			shutdown: None,
			session_timeout_secs: None,
			control_socket: None,
			profile_dir: None,
			notice_limit: 20,
		}
	}
}

impl WatchConfig {
	/// Loads `explicit`, else `<output_dir>/pagewatch.json`, else defaults.
	pub fn load(explicit: Option<&Path>, output_dir: &Path) -> Self {
		let candidate = explicit.map(Path::to_path_buf).unwrap_or_else(|| output_dir.join(CONFIG_FILE_NAME));
		if explicit.is_none() && !candidate.exists() {
			return Self::default();
		}

		match load_json(&candidate) {
			Ok(config) => {
				debug!(target = "pagewatch.config", path = %candidate.display(), "loaded config");
				config
			}
			Err(reason) => {
				warn!(target = "pagewatch.config", path = %candidate.display(), reason, "ignoring config file, using defaults");
				Self::default()
			}
		}
	}

	pub fn repoll_interval(&self) -> Duration {
		Duration::from_millis(self.repoll_interval_ms)
	}

	pub fn session_timeout(&self) -> Option<Duration> {
		self.session_timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
	}

	/// Profile for launched browsers: configured, else the per-user data directory.
	pub fn resolved_profile_dir(&self) -> PathBuf {
		self.profile_dir.clone().unwrap_or_else(|| {
			dirs::data_local_dir()
				.unwrap_or_else(|| self.output_dir.clone())
				.join("pagewatch")
				.join("profile")
		})
	}

	pub fn resolved_control_socket(&self) -> PathBuf {
		self.control_socket.clone().unwrap_or_else(|| self.output_dir.join("control.sock"))
	}
}

fn load_json(path: &Path) -> Result<WatchConfig, String> {
	let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
	serde_json::from_str(&content).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn defaults_match_documented_ceilings() {
		let config = WatchConfig::default();
		assert_eq!(config.body_limit, 65_536);
		assert_eq!(config.dom_limit, 2_097_152);
		assert_eq!(config.realtime_memory_limit, 500);
		assert_eq!(config.candidate_ports.first(), Some(&9222));
		assert_eq!(config.candidate_ports.last(), Some(&9229));
		assert_eq!(config.mode, CaptureMode::Lazy);
	}

	#[test]
	fn partial_file_keeps_other_defaults() {
		let temp = TempDir::new().unwrap();
		std::fs::write(
			temp.path().join(CONFIG_FILE_NAME),
			r#"{ "mode": "realtime", "ignorePatterns": ["^\\[HMR\\]"], "snapshots": { "screenshot": false } }"#,
		)
		.unwrap();

		let config = WatchConfig::load(None, temp.path());
		assert_eq!(config.mode, CaptureMode::Realtime);
		assert_eq!(config.ignore_patterns, vec![r"^\[HMR\]".to_string()]);
		assert!(!config.snapshots.screenshot);
		assert!(config.snapshots.dom);
		assert_eq!(config.body_limit, 64 * 1024);
	}

	#[test]
	fn malformed_file_falls_back_to_defaults() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("broken.json");
		std::fs::write(&path, "{ not json").unwrap();

		assert_eq!(WatchConfig::load(Some(&path), temp.path()), WatchConfig::default());
	}

	#[test]
	fn missing_explicit_file_falls_back_to_defaults() {
		let temp = TempDir::new().unwrap();
		let config = WatchConfig::load(Some(&temp.path().join("absent.json")), temp.path());
		assert_eq!(config, WatchConfig::default());
	}

	#[test]
	fn zero_timeout_means_none() {
		let config = WatchConfig {
			session_timeout_secs: Some(0),
			..WatchConfig::default()
		};
		assert_eq!(config.session_timeout(), None);
	}
}
