//! Browser on the same machine as the observer.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};

use super::probe::{PROBE_TIMEOUT, fetch_version, http_client, tcp_open};
use super::{BridgeError, Endpoint, ForwardRule, LaunchSpec, PlatformBridge};

const LOCAL_HOST: &str = "127.0.0.1";

pub struct NativeBridge {
	ports: Vec<u16>,
	client: reqwest::Client,
}

impl NativeBridge {
	pub fn new(ports: Vec<u16>) -> Result<Self, BridgeError> {
		let client = http_client(PROBE_TIMEOUT).map_err(|e| BridgeError::CommandFailed {
			command: "http client".into(),
			detail: e.to_string(),
		})?;
		Ok(Self { ports, client })
	}
}

#[async_trait]
impl PlatformBridge for NativeBridge {
	fn name(&self) -> &'static str {
		"native"
	}

	fn browser_host(&self) -> String {
		LOCAL_HOST.to_string()
	}

	fn forward_target(&self, _port: u16) -> Option<Endpoint> {
		None
	}

	async fn list_candidates(&self) -> Vec<Endpoint> {
		let probes = self.ports.iter().map(|port| async move {
			let mut endpoint = Endpoint::new(LOCAL_HOST, *port);
			endpoint.reachable = fetch_version(&self.client, &endpoint).await.is_ok();
			endpoint
		});
		let found: Vec<Endpoint> = join_all(probes).await.into_iter().filter(|e| e.reachable).collect();
		debug!(target = "pagewatch.bridge", count = found.len(), "native candidates");
		found
	}

	async fn launch(&self, spec: &LaunchSpec) -> Result<(), BridgeError> {
		let chrome = find_chrome_executable().ok_or_else(|| BridgeError::NotFound {
			what: "Chrome/Chromium executable",
			hint: "install Chrome, Edge, Brave or Chromium, or start one with --remote-debugging-port and use --endpoint".into(),
		})?;

		std::fs::create_dir_all(&spec.profile_dir)?;
		let args = spec.browser_args(&spec.profile_dir.display().to_string());

		let mut cmd = Command::new(&chrome);
		cmd.args(&args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

		#[cfg(unix)]
		std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

		let child = cmd.spawn().map_err(|e| BridgeError::CommandFailed {
			command: chrome.clone(),
			detail: e.to_string(),
		})?;
		info!(target = "pagewatch.bridge", browser = %chrome, pid = child.id(), port = spec.port, "browser launched");
		Ok(())
	}

	async fn probe(&self, endpoint: &Endpoint) -> bool {
		fetch_version(&self.client, endpoint).await.is_ok()
	}

	async fn is_listening(&self, port: u16) -> bool {
		tcp_open(LOCAL_HOST, port, PROBE_TIMEOUT).await
	}

	async fn forward_rules(&self) -> Vec<ForwardRule> {
		Vec::new()
	}

	async fn install_forward(&self, port: u16, target: &Endpoint) -> Result<(), BridgeError> {
		debug!(target = "pagewatch.bridge", port, to = %target, "native bridge needs no forwarding");
		Ok(())
	}

	async fn remove_forward(&self, _port: u16) -> Result<(), BridgeError> {
		Ok(())
	}
}

fn find_chrome_executable() -> Option<String> {
	let candidates: Vec<String> = if cfg!(target_os = "macos") {
		vec![
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
			"/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
		]
		.into_iter()
		.map(str::to_string)
		.collect()
	} else if cfg!(target_os = "windows") {
		windows_browser_candidates()
	} else {
		vec![
			"google-chrome-stable",
			"google-chrome",
			"chromium-browser",
			"chromium",
			"brave-browser",
			"brave",
			"microsoft-edge",
			"/usr/bin/google-chrome-stable",
			"/usr/bin/google-chrome",
			"/usr/bin/chromium-browser",
			"/usr/bin/chromium",
			"/snap/bin/chromium",
		]
		.into_iter()
		.map(str::to_string)
		.collect()
	};

	candidates.into_iter().find(|candidate| {
		if is_path_like(candidate) {
			Path::new(candidate).exists()
		} else {
			which::which(candidate).is_ok()
		}
	})
}

fn is_path_like(candidate: &str) -> bool {
	candidate.starts_with('/') || candidate.contains('\\') || candidate.contains(':')
}

fn windows_browser_candidates() -> Vec<String> {
	let mut roots: Vec<PathBuf> = ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
		.into_iter()
		.filter_map(|key| std::env::var_os(key).map(PathBuf::from))
		.collect();
	if roots.is_empty() {
		roots.push(PathBuf::from(r"C:\Program Files"));
		roots.push(PathBuf::from(r"C:\Program Files (x86)"));
	}

	let suffixes: &[&[&str]] = &[
		&["Google", "Chrome", "Application", "chrome.exe"],
		&["Microsoft", "Edge", "Application", "msedge.exe"],
		&["BraveSoftware", "Brave-Browser", "Application", "brave.exe"],
		&["Chromium", "Application", "chrome.exe"],
	];

	let mut candidates: Vec<String> = roots
		.iter()
		.flat_map(|root| suffixes.iter().map(move |suffix| suffix.iter().fold(root.clone(), |path, part| path.join(part))))
		.map(|path| path.to_string_lossy().to_string())
		.collect();
	candidates.extend(["chrome.exe", "msedge.exe", "brave.exe"].map(str::to_string));
	candidates
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn path_like_detection() {
		assert!(is_path_like("/usr/bin/chromium"));
		assert!(is_path_like(r"C:\Program Files\Google\Chrome\Application\chrome.exe"));
		assert!(!is_path_like("google-chrome"));
	}

	#[tokio::test]
	async fn forwarding_is_a_no_op() {
		let bridge = NativeBridge::new(vec![9222]).unwrap();
		assert!(bridge.forward_rules().await.is_empty());
		bridge.remove_forward(9222).await.unwrap();
		bridge.remove_forward(9222).await.unwrap();
		bridge.install_forward(9222, &Endpoint::new("127.0.0.1", 9222)).await.unwrap();
	}

	#[tokio::test]
	async fn no_candidates_on_closed_ports() {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);

		let bridge = NativeBridge::new(vec![port]).unwrap();
		assert!(bridge.list_candidates().await.is_empty());
		assert!(!bridge.is_listening(port).await);
	}
}
