//! Observer inside WSL, browser on the Windows host.
//!
//! The browser binds its debugging port on the Windows loopback, which WSL
//! cannot reach. A `netsh interface portproxy` rule listening on the Windows
//! host address bridges the two.

use std::path::Path;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::probe::{PROBE_TIMEOUT, fetch_version, http_client};
use super::{BridgeError, Endpoint, ForwardRule, LaunchSpec, PlatformBridge};

const WSL_POWERSHELL_PATH: &str = "/mnt/c/Windows/System32/WindowsPowerShell/v1.0/powershell.exe";
const MANAGED_PROFILE_DIR: &str = r"C:\temp\pagewatch\profile";
const WINDOWS_LOOPBACK: &str = "127.0.0.1";

pub fn is_wsl() -> bool {
	let osrelease = std::fs::read_to_string("/proc/sys/kernel/osrelease").ok();
	let wsl_distro = std::env::var("WSL_DISTRO_NAME").ok();
	is_wsl_with_inputs(osrelease.as_deref(), wsl_distro.as_deref())
}

fn is_wsl_with_inputs(osrelease: Option<&str>, wsl_distro: Option<&str>) -> bool {
	if wsl_distro.is_some() {
		return true;
	}
	osrelease
		.map(str::to_ascii_lowercase)
		.is_some_and(|value| value.contains("microsoft") || value.contains("wsl"))
}

/// Captured result of an OS command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
	pub success: bool,
	pub stdout: String,
	pub stderr: String,
}

/// Runs OS commands. Swapped for a script in tests.
#[async_trait]
pub trait Shell: Send + Sync {
	async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ShellOutput>;
}

/// [`Shell`] backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShell;

#[async_trait]
impl Shell for SystemShell {
	async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ShellOutput> {
		let output = tokio::process::Command::new(program)
			.args(args)
			.stdin(std::process::Stdio::null())
			.kill_on_drop(true)
			.output()
			.await?;
		Ok(ShellOutput {
			success: output.status.success(),
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}
}

pub struct WslBridge<S: Shell = SystemShell> {
	shell: S,
	ports: Vec<u16>,
	host: String,
	powershell: String,
	client: reqwest::Client,
}

impl WslBridge<SystemShell> {
	/// Locates PowerShell and the Windows host address.
	pub async fn detect(ports: Vec<u16>) -> Result<Self, BridgeError> {
		let powershell = find_powershell().ok_or_else(|| BridgeError::NotFound {
			what: "powershell.exe",
			hint: format!("expected at {WSL_POWERSHELL_PATH} or on PATH"),
		})?;
		let host = windows_host_ip(&SystemShell).await.ok_or_else(|| BridgeError::NotFound {
			what: "Windows host address",
			hint: "no default route or nameserver found; pass --endpoint HOST:PORT".into(),
		})?;
		debug!(target = "pagewatch.bridge", host = %host, powershell = %powershell, "wsl bridge ready");
		Self::with_shell(SystemShell, ports, host, powershell)
	}
}

impl<S: Shell> WslBridge<S> {
	pub fn with_shell(shell: S, ports: Vec<u16>, host: String, powershell: String) -> Result<Self, BridgeError> {
		let client = http_client(PROBE_TIMEOUT).map_err(|e| BridgeError::CommandFailed {
			command: "http client".into(),
			detail: e.to_string(),
		})?;
		Ok(Self {
			shell,
			ports,
			host,
			powershell,
			client,
		})
	}

	async fn powershell(&self, script: String) -> Result<ShellOutput, BridgeError> {
		let args = vec!["-NoProfile".to_string(), "-NonInteractive".to_string(), "-Command".to_string(), script.clone()];
		let output = self.shell.run(&self.powershell, &args).await?;
		if !output.success {
			return Err(BridgeError::CommandFailed {
				command: script,
				detail: output.stderr.trim().to_string(),
			});
		}
		Ok(output)
	}

	/// Runs `netsh` elevated (UAC prompt on the Windows side) and waits for it.
	async fn netsh_elevated(&self, netsh_args: &[String]) -> Result<(), BridgeError> {
		let argument_list = format!("@({})", netsh_args.iter().map(|a| ps_single_quote(a)).collect::<Vec<_>>().join(", "));
		let script = format!("Start-Process -FilePath 'netsh.exe' -ArgumentList {argument_list} -Verb RunAs -Wait -WindowStyle Hidden");
		self.powershell(script).await.map(|_| ())
	}

	async fn rules_for_port(&self, port: u16) -> Vec<ForwardRule> {
		self.forward_rules().await.into_iter().filter(|rule| rule.listen_port == port).collect()
	}
}

#[async_trait]
impl<S: Shell> PlatformBridge for WslBridge<S> {
	fn name(&self) -> &'static str {
		"wsl"
	}

	fn browser_host(&self) -> String {
		self.host.clone()
	}

	fn forward_target(&self, port: u16) -> Option<Endpoint> {
		Some(windows_loopback(port))
	}

	async fn list_candidates(&self) -> Vec<Endpoint> {
		let probes = self.ports.iter().map(|port| async move {
			let mut endpoint = Endpoint::new(self.host.clone(), *port);
			endpoint.reachable = fetch_version(&self.client, &endpoint).await.is_ok();
			endpoint
		});
		join_all(probes).await.into_iter().filter(|e| e.reachable).collect()
	}

	async fn launch(&self, spec: &LaunchSpec) -> Result<(), BridgeError> {
		let chrome = find_windows_chrome().ok_or_else(|| BridgeError::NotFound {
			what: "Windows Chromium browser",
			hint: "install Chrome, Edge or Brave on Windows, or start one with --remote-debugging-port and use --endpoint".into(),
		})?;

		let profile = windows_profile_path(&spec.profile_dir);
		let args = spec.browser_args(&profile);
		let argument_list = format!("@({})", args.iter().map(|arg| ps_single_quote(arg)).collect::<Vec<_>>().join(", "));
		let script = format!("Start-Process -FilePath {} -ArgumentList {} | Out-Null", ps_single_quote(chrome), argument_list);

		self.powershell(script).await?;
		info!(target = "pagewatch.bridge", browser = chrome, port = spec.port, profile = %profile, "windows browser launched");
		Ok(())
	}

	async fn probe(&self, endpoint: &Endpoint) -> bool {
		fetch_version(&self.client, endpoint).await.is_ok()
	}

	/// Loopback only: the portproxy rule itself listens on the host address.
	async fn is_listening(&self, port: u16) -> bool {
		let script = format!(
			"if (Get-NetTCPConnection -State Listen -LocalAddress 127.0.0.1 -LocalPort {port} -ErrorAction SilentlyContinue) {{ 'listening' }} else {{ 'idle' }}"
		);
		match self.powershell(script).await {
			Ok(output) => output.stdout.contains("listening"),
			Err(err) => {
				warn!(target = "pagewatch.bridge", port, error = %err, "listen check failed");
				false
			}
		}
	}

	async fn forward_rules(&self) -> Vec<ForwardRule> {
		match self.powershell("netsh interface portproxy show v4tov4".into()).await {
			Ok(output) => parse_portproxy(&output.stdout),
			Err(err) => {
				warn!(target = "pagewatch.bridge", error = %err, "reading forwarding rules failed");
				Vec::new()
			}
		}
	}

	async fn install_forward(&self, port: u16, target: &Endpoint) -> Result<(), BridgeError> {
		self.remove_forward(port).await?;

		let args = [
			"interface".to_string(),
			"portproxy".into(),
			"add".into(),
			"v4tov4".into(),
			format!("listenaddress={}", self.host),
			format!("listenport={port}"),
			format!("connectaddress={}", target.host),
			format!("connectport={}", target.port),
		];
		self.netsh_elevated(&args).await?;

		if !self.rules_for_port(port).await.iter().any(|rule| rule.points_at(target)) {
			return Err(BridgeError::CommandFailed {
				command: "netsh interface portproxy add v4tov4".into(),
				detail: "rule not present afterwards (elevation declined?)".into(),
			});
		}
		info!(target = "pagewatch.bridge", port, to = %target, "forwarding rule installed");
		Ok(())
	}

	async fn remove_forward(&self, port: u16) -> Result<(), BridgeError> {
		let existing = self.rules_for_port(port).await;
		if existing.is_empty() {
			debug!(target = "pagewatch.bridge", port, "no forwarding rule to remove");
			return Ok(());
		}

		for rule in &existing {
			let args = [
				"interface".to_string(),
				"portproxy".into(),
				"delete".into(),
				"v4tov4".into(),
				format!("listenaddress={}", rule.listen_address),
				format!("listenport={port}"),
			];
			self.netsh_elevated(&args).await?;
		}

		if !self.rules_for_port(port).await.is_empty() {
			return Err(BridgeError::CommandFailed {
				command: "netsh interface portproxy delete v4tov4".into(),
				detail: "rule still present afterwards (elevation declined?)".into(),
			});
		}
		info!(target = "pagewatch.bridge", port, removed = existing.len(), "forwarding rule removed");
		Ok(())
	}
}

/// Default forwarding target for a browser port: the Windows loopback.
pub fn windows_loopback(port: u16) -> Endpoint {
	Endpoint::new(WINDOWS_LOOPBACK, port)
}

async fn windows_host_ip(shell: &dyn Shell) -> Option<String> {
	let route = shell
		.run("ip", &["route".to_string(), "show".into(), "default".into()])
		.await
		.ok()
		.and_then(|output| parse_default_route(&output.stdout));
	if route.is_some() {
		return route;
	}
	std::fs::read_to_string("/etc/resolv.conf").ok().and_then(|content| parse_nameserver(&content))
}

fn parse_default_route(output: &str) -> Option<String> {
	output.lines().find_map(|line| {
		let mut words = line.split_whitespace();
		(words.next()? == "default" && words.next()? == "via").then(|| words.next().map(str::to_string))?
	})
}

fn parse_nameserver(resolv: &str) -> Option<String> {
	resolv.lines().find_map(|line| line.trim().strip_prefix("nameserver").map(|rest| rest.trim().to_string()))
}

/// Parses the table printed by `netsh interface portproxy show v4tov4`.
fn parse_portproxy(output: &str) -> Vec<ForwardRule> {
	output
		.lines()
		.filter_map(|line| {
			let cols: Vec<&str> = line.split_whitespace().collect();
			let [listen_address, listen_port, connect_address, connect_port] = cols.as_slice() else {
				return None;
			};
			Some(ForwardRule {
				listen_address: listen_address.to_string(),
				listen_port: listen_port.parse().ok()?,
				connect_address: connect_address.to_string(),
				connect_port: connect_port.parse().ok()?,
			})
		})
		.collect()
}

fn find_powershell() -> Option<String> {
	if Path::new(WSL_POWERSHELL_PATH).exists() {
		return Some(WSL_POWERSHELL_PATH.to_string());
	}
	which::which("powershell.exe").ok().and_then(|path| path.to_str().map(ToOwned::to_owned))
}

fn find_windows_chrome() -> Option<&'static str> {
	let candidates = [
		(
			"/mnt/c/Program Files/Google/Chrome/Application/chrome.exe",
			r"C:\Program Files\Google\Chrome\Application\chrome.exe",
		),
		(
			"/mnt/c/Program Files (x86)/Google/Chrome/Application/chrome.exe",
			r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
		),
		(
			"/mnt/c/Program Files/Microsoft/Edge/Application/msedge.exe",
			r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
		),
		(
			"/mnt/c/Program Files (x86)/Microsoft/Edge/Application/msedge.exe",
			r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
		),
		(
			"/mnt/c/Program Files/BraveSoftware/Brave-Browser/Application/brave.exe",
			r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
		),
	];

	candidates
		.into_iter()
		.find(|(wsl_path, _)| Path::new(wsl_path).exists())
		.map(|(_, windows_path)| windows_path)
}

/// Windows form of a profile path. Paths outside `/mnt/<drive>` fall back to a managed Windows directory.
fn windows_profile_path(profile: &Path) -> String {
	if let Some(raw) = profile.to_str().filter(|raw| is_windows_drive_path(raw)) {
		return raw.to_string();
	}
	if let Some(converted) = wsl_mount_path_to_windows(profile) {
		return converted;
	}
	debug!(target = "pagewatch.bridge", profile = %profile.display(), "profile not on a Windows drive, using managed directory");
	MANAGED_PROFILE_DIR.to_string()
}

/// `C:\...` or `C:/...`.
fn is_windows_drive_path(path: &str) -> bool {
	let bytes = path.as_bytes();
	bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && (bytes[2] == b'\\' || bytes[2] == b'/')
}

fn wsl_mount_path_to_windows(path: &Path) -> Option<String> {
	let path = path.to_str()?;
	let mut parts = path.split('/');
	if !parts.next()?.is_empty() || parts.next()? != "mnt" {
		return None;
	}
	let drive = parts.next()?;
	if drive.len() != 1 || !drive.as_bytes()[0].is_ascii_alphabetic() {
		return None;
	}

	let mut windows_path = format!("{}:\\", drive.to_ascii_uppercase());
	let rest: Vec<&str> = parts.filter(|p| !p.is_empty()).collect();
	windows_path.push_str(&rest.join("\\"));
	Some(windows_path)
}

fn ps_single_quote(value: &str) -> String {
	format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests;
