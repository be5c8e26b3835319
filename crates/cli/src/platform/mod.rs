//! Platform bridge: everything that touches the OS to find, start and reach a browser.
//!
//! The connection manager only sees the [`PlatformBridge`] trait. Two
//! implementations exist:
//!
//! - [`NativeBridge`] - browser on the same machine, no forwarding
//! - [`WslBridge`] - observer inside WSL, browser on the Windows host, reached
//!   through a `netsh interface portproxy` rule
//!
//! Every OS failure becomes an error value or `false`; nothing here panics.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

mod native;
pub mod probe;
mod wsl;

pub use native::NativeBridge;
pub use wsl::{Shell, ShellOutput, SystemShell, WslBridge, is_wsl, windows_loopback};

/// A host/port pair that may expose the DevTools HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
	pub host: String,
	pub port: u16,
	/// Whether the last probe succeeded.
	pub reachable: bool,
}

impl Endpoint {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			port,
			reachable: false,
		}
	}

	/// Parses `HOST:PORT` (or a bare port, meaning localhost).
	pub fn parse(value: &str) -> Option<Self> {
		let value = value.trim().trim_start_matches("http://").trim_end_matches('/');
		if let Ok(port) = value.parse::<u16>() {
			return Some(Self::new("127.0.0.1", port));
		}
		let (host, port) = value.rsplit_once(':')?;
		let host = host.trim_start_matches('[').trim_end_matches(']');
		if host.is_empty() {
			return None;
		}
		Some(Self::new(host, port.parse().ok()?))
	}

	/// Host formatted for use inside a URL authority.
	pub fn url_host(&self) -> String {
		if self.host.contains(':') { format!("[{}]", self.host) } else { self.host.clone() }
	}

	pub fn version_url(&self) -> String {
		format!("http://{}:{}/json/version", self.url_host(), self.port)
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.url_host(), self.port)
	}
}

/// Parameters for starting a browser with remote debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
	pub port: u16,
	pub profile_dir: PathBuf,
	/// Page to open on start.
	pub url: Option<String>,
}

impl LaunchSpec {
	/// Command-line flags common to every bridge. The profile path is supplied by the caller
	/// because bridges translate it differently.
	pub fn browser_args(&self, profile: &str) -> Vec<String> {
		let mut args = vec![
			format!("--remote-debugging-port={}", self.port),
			format!("--user-data-dir={profile}"),
			"--no-first-run".to_string(),
			"--no-default-browser-check".to_string(),
		];
		if let Some(url) = &self.url {
			args.push(url.clone());
		}
		args
	}
}

/// A port forwarding rule on the browser host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardRule {
	pub listen_address: String,
	pub listen_port: u16,
	pub connect_address: String,
	pub connect_port: u16,
}

impl ForwardRule {
	/// Whether the rule delivers traffic to `target`.
	pub fn points_at(&self, target: &Endpoint) -> bool {
		self.connect_port == target.port && same_host(&self.connect_address, &target.host)
	}
}

fn same_host(a: &str, b: &str) -> bool {
	let loopback = |h: &str| matches!(h, "127.0.0.1" | "localhost" | "::1");
	a.eq_ignore_ascii_case(b) || (loopback(a) && loopback(b))
}

#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("{what} not found: {hint}")]
	NotFound { what: &'static str, hint: String },

	#[error("`{command}` failed: {detail}")]
	CommandFailed { command: String, detail: String },

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// OS-facing operations used by the connection manager.
#[async_trait]
pub trait PlatformBridge: Send + Sync {
	fn name(&self) -> &'static str;

	/// Address at which this process reaches the browser.
	fn browser_host(&self) -> String;

	/// Where a forwarding rule for `port` must deliver traffic, or `None` when the
	/// browser is reachable without forwarding.
	fn forward_target(&self, port: u16) -> Option<Endpoint>;

	/// Probes the configured candidate ports; returns the reachable ones.
	async fn list_candidates(&self) -> Vec<Endpoint>;

	/// Starts a browser. Returns once the process is spawned, not once it listens.
	async fn launch(&self, spec: &LaunchSpec) -> Result<(), BridgeError>;

	/// Whether `/json/version` answers on `endpoint`.
	async fn probe(&self, endpoint: &Endpoint) -> bool;

	/// Whether anything accepts TCP on `port` on the browser side.
	async fn is_listening(&self, port: u16) -> bool;

	/// Current forwarding rules.
	async fn forward_rules(&self) -> Vec<ForwardRule>;

	/// Forwards `port` to `target`, replacing any existing rule for the port.
	async fn install_forward(&self, port: u16, target: &Endpoint) -> Result<(), BridgeError>;

	/// Removes the rule for `port`. Removing an absent rule succeeds.
	async fn remove_forward(&self, port: u16) -> Result<(), BridgeError>;
}

/// Bridge selection from `--bridge`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BridgeKind {
	#[default]
	Auto,
	Native,
	Wsl,
}

/// Builds the bridge for `kind`, detecting WSL for [`BridgeKind::Auto`].
pub async fn select_bridge(kind: BridgeKind, ports: Vec<u16>) -> Result<Box<dyn PlatformBridge>, BridgeError> {
	let use_wsl = match kind {
		BridgeKind::Native => false,
		BridgeKind::Wsl => true,
		BridgeKind::Auto => is_wsl(),
	};
	if use_wsl {
		Ok(Box::new(WslBridge::detect(ports).await?))
	} else {
		Ok(Box::new(NativeBridge::new(ports)?))
	}
}
