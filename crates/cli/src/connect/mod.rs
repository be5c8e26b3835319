//! Connection manager: turns a [`ConnectionIntent`] into a live [`ControlChannel`].
//!
//! The policy lives in [`machine`] as a pure transition table. This module
//! executes the actions the table asks for against three seams:
//!
//! - [`PlatformBridge`] for discovery, launch, diagnostics and forwarding
//! - [`Handshaker`] for the DevTools handshake itself
//! - [`Operator`] for confirmation prompts and aborts
//!
//! OS network configuration is only changed after [`Operator::confirm`] says yes.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagewatch_runtime::ControlChannel;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

pub mod diagnose;
pub mod machine;

pub use diagnose::{Diagnosis, DiagnosisFacts, DiagnosisKind};
pub use machine::{ConnectAction, ConnectInput, ConnectMachine, ConnectMode, ConnectState, ConnectionPolicy, FailReason};

use crate::platform::probe::{PROBE_TIMEOUT, fetch_version, http_client};
use crate::platform::{BridgeError, Endpoint, LaunchSpec, PlatformBridge};

/// Ports tried when launching a fresh browser.
pub const LAUNCH_PORT_RANGE: std::ops::RangeInclusive<u16> = 9222..=10221;

/// What the invocation asked for. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIntent {
	pub mode: ConnectMode,
	pub endpoint_hint: Option<Endpoint>,
	/// Handshake attempts before diagnostics.
	pub retry_budget: u32,
	pub diagnostics_enabled: bool,
}

impl ConnectionIntent {
	pub fn join(endpoint_hint: Option<Endpoint>) -> Self {
		Self {
			mode: ConnectMode::Join,
			endpoint_hint,
			retry_budget: ConnectionPolicy::default().max_attempts,
			diagnostics_enabled: true,
		}
	}

	pub fn launch() -> Self {
		Self {
			mode: ConnectMode::Launch,
			endpoint_hint: None,
			retry_budget: ConnectionPolicy::default().max_attempts,
			diagnostics_enabled: true,
		}
	}
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandshakeError(pub String);

/// Performs one DevTools handshake attempt.
#[async_trait]
pub trait Handshaker: Send + Sync {
	async fn handshake(&self, endpoint: &Endpoint, timeout: Duration) -> Result<ControlChannel, HandshakeError>;
}

/// `/json/version` discovery followed by the WebSocket upgrade.
pub struct CdpHandshaker {
	client: reqwest::Client,
}

impl CdpHandshaker {
	pub fn new() -> Result<Self, HandshakeError> {
		let client = http_client(PROBE_TIMEOUT * 5).map_err(|e| HandshakeError(e.to_string()))?;
		Ok(Self { client })
	}
}

#[async_trait]
impl Handshaker for CdpHandshaker {
	async fn handshake(&self, endpoint: &Endpoint, timeout: Duration) -> Result<ControlChannel, HandshakeError> {
		let version = tokio::time::timeout(timeout, fetch_version(&self.client, endpoint))
			.await
			.map_err(|_| HandshakeError(format!("/json/version on {endpoint} timed out")))?
			.map_err(HandshakeError)?;
		let ws_url = version.debugger_url_via(&endpoint.url_host(), endpoint.port);
		debug!(target = "pagewatch.connect", url = %ws_url, browser = ?version.browser, "debugger url");
		ControlChannel::connect(&ws_url, timeout)
			.await
			.map_err(|e| HandshakeError(e.to_string()))
	}
}

/// The human (or agent) driving the session.
#[async_trait]
pub trait Operator: Send + Sync {
	/// Asks a yes/no question. Must answer `false` when nobody can answer.
	async fn confirm(&self, prompt: &str) -> bool;

	/// Resolves when the operator gives up on connecting.
	async fn aborted(&self);
}

/// Prompts on stderr and reads the answer from stdin; Ctrl-C aborts.
#[derive(Debug, Default)]
pub struct TerminalOperator;

#[async_trait]
impl Operator for TerminalOperator {
	async fn confirm(&self, prompt: &str) -> bool {
		if !std::io::stdin().is_terminal() {
			warn!(target = "pagewatch.connect", prompt, "no terminal to confirm on, declining");
			return false;
		}
		eprint!("{prompt} [y/N] ");
		let mut line = String::new();
		match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
			Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
			Err(_) => false,
		}
	}

	async fn aborted(&self) {
		if tokio::signal::ctrl_c().await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}

/// Successful outcome of [`ConnectionManager::connect`].
#[derive(Debug)]
pub struct Connected {
	pub channel: ControlChannel,
	pub endpoint: Endpoint,
	/// Whether this session started the browser.
	pub launched: bool,
	/// Port of a forwarding rule this session installed.
	pub forward_installed: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConnectError {
	#[error("no browser with remote debugging found after {polls} discovery polls")]
	NoCandidates { polls: u32 },

	#[error("handshake with {endpoint} failed after {attempts} attempts: {last_error}")]
	HandshakeTimeout { endpoint: String, attempts: u32, last_error: String },

	#[error("forwarding conflict on port {port} was not resolved")]
	ConflictUnresolved { port: u16, diagnosis: Option<Diagnosis> },

	#[error("{endpoint} is unreachable: {}", diagnosis.kind())]
	Unreachable { endpoint: String, port: u16, diagnosis: Diagnosis },

	#[error("browser launch failed: {0}")]
	LaunchFailed(String),

	#[error("no free debugging port in {start}..={end}")]
	NoFreePort { start: u16, end: u16 },

	#[error("aborted by operator")]
	UserAborted,

	#[error("connection state machine stalled in {0:?}")]
	Stalled(ConnectState),
}

impl ConnectError {
	/// Actionable next step for the operator.
	pub fn guidance(&self) -> String {
		match self {
			ConnectError::NoCandidates { .. } => {
				"start Chrome with --remote-debugging-port=9222, pass --endpoint HOST:PORT, or rerun with --launch".into()
			}
			ConnectError::HandshakeTimeout { .. } => {
				"the endpoint answered slowly or not at all; rerun without --no-diagnostics to classify the failure".into()
			}
			ConnectError::ConflictUnresolved { port, diagnosis } => match diagnosis {
				Some(d) => d.guidance(*port),
				None => format!("remove the forwarding rule for port {port} and retry"),
			},
			ConnectError::Unreachable { port, diagnosis, .. } => diagnosis.guidance(*port),
			ConnectError::LaunchFailed(_) => "install a Chromium-based browser or start one yourself and use --endpoint".into(),
			ConnectError::NoFreePort { .. } => "close other browsers using debugging ports or pass --endpoint".into(),
			ConnectError::UserAborted => "nothing was changed".into(),
			ConnectError::Stalled(_) => "rerun with -vv and report the log".into(),
		}
	}
}

/// Runs the connection state machine against the bridge, handshaker and operator.
pub struct ConnectionManager {
	bridge: Arc<dyn PlatformBridge>,
	handshaker: Arc<dyn Handshaker>,
	operator: Arc<dyn Operator>,
	policy: ConnectionPolicy,
	profile_dir: PathBuf,
	launch_url: Option<String>,
}

/// Mutable bookkeeping while one intent is executed.
#[derive(Default)]
struct Attempt {
	endpoint: Option<Endpoint>,
	channel: Option<ControlChannel>,
	diagnosis: Option<Diagnosis>,
	launched: bool,
	forward_installed: Option<u16>,
	last_error: String,
	handshakes: u32,
}

impl ConnectionManager {
	pub fn new(bridge: Arc<dyn PlatformBridge>, handshaker: Arc<dyn Handshaker>, operator: Arc<dyn Operator>, profile_dir: PathBuf) -> Self {
		Self {
			bridge,
			handshaker,
			operator,
			policy: ConnectionPolicy::default(),
			profile_dir,
			launch_url: None,
		}
	}

	pub fn with_policy(mut self, policy: ConnectionPolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Page opened by a launched browser.
	pub fn with_launch_url(mut self, url: Option<String>) -> Self {
		self.launch_url = url;
		self
	}

	pub fn bridge(&self) -> &Arc<dyn PlatformBridge> {
		&self.bridge
	}

	/// Executes `intent`. A failed intent removes any forwarding rule it installed.
	pub async fn connect(&self, intent: &ConnectionIntent) -> Result<Connected, ConnectError> {
		let mut attempt = Attempt {
			endpoint: intent.endpoint_hint.clone(),
			..Attempt::default()
		};
		let result = self.drive(intent, &mut attempt).await;
		if result.is_err() {
			self.release(&mut attempt).await;
		}
		result
	}

	async fn drive(&self, intent: &ConnectionIntent, attempt: &mut Attempt) -> Result<Connected, ConnectError> {
		let policy = ConnectionPolicy {
			max_attempts: intent.retry_budget.max(1),
			..self.policy
		};
		let mut machine = ConnectMachine::new(intent.mode, intent.endpoint_hint.is_some(), intent.diagnostics_enabled, policy);

		info!(target = "pagewatch.connect", bridge = self.bridge.name(), mode = ?intent.mode, "connecting");
		let mut action = machine.step(ConnectInput::Start).ok_or(ConnectError::Stalled(machine.state()))?;

		loop {
			debug!(target = "pagewatch.connect", state = ?machine.state(), ?action, "step");
			let input = match action {
				ConnectAction::Discover => self.abortable(self.discover(attempt)).await,
				ConnectAction::Launch => self.launch(attempt).await?,
				ConnectAction::Handshake => self.abortable(self.handshake(attempt, policy.handshake_timeout)).await,
				ConnectAction::Wait(delay) => self.abortable(async {
					tokio::time::sleep(delay).await;
					ConnectInput::WaitElapsed
				})
				.await,
				ConnectAction::Diagnose => self.diagnose(attempt).await,
				ConnectAction::Confirm => self.confirm_remediation(attempt).await,
				ConnectAction::Remediate => self.remediate(attempt).await,
				ConnectAction::Finish => {
					let (Some(channel), Some(endpoint)) = (attempt.channel.take(), attempt.endpoint.take()) else {
						return Err(ConnectError::Stalled(machine.state()));
					};
					info!(target = "pagewatch.connect", %endpoint, launched = attempt.launched, "connected");
					return Ok(Connected {
						channel,
						endpoint,
						launched: attempt.launched,
						forward_installed: attempt.forward_installed.take(),
					});
				}
				ConnectAction::Fail(reason) => return Err(self.failure(reason, attempt, &policy)),
			};
			action = machine.step(input).ok_or(ConnectError::Stalled(machine.state()))?;
		}
	}

	/// Races `work` against the operator's abort signal.
	async fn abortable(&self, work: impl std::future::Future<Output = ConnectInput>) -> ConnectInput {
		tokio::select! {
			input = work => input,
			_ = self.operator.aborted() => {
				info!(target = "pagewatch.connect", "aborted by operator");
				ConnectInput::Aborted
			}
		}
	}

	async fn discover(&self, attempt: &mut Attempt) -> ConnectInput {
		let candidates = self.bridge.list_candidates().await;
		let count = candidates.len();
		if count == 0 {
			info!(target = "pagewatch.connect", "no browser found yet, waiting");
		}
		if let Some(first) = candidates.into_iter().next() {
			info!(target = "pagewatch.connect", endpoint = %first, count, "found browser");
			attempt.endpoint = Some(first);
		}
		ConnectInput::Candidates(count)
	}

	async fn launch(&self, attempt: &mut Attempt) -> Result<ConnectInput, ConnectError> {
		let port = self.free_port().await?;
		let spec = LaunchSpec {
			port,
			profile_dir: self.profile_dir.clone(),
			url: self.launch_url.clone(),
		};
		if let Err(err) = self.bridge.launch(&spec).await {
			warn!(target = "pagewatch.connect", port, error = %err, "launch failed");
			attempt.last_error = err.to_string();
			return Ok(ConnectInput::LaunchFailed);
		}
		attempt.launched = true;
		attempt.endpoint = Some(Endpoint::new(self.bridge.browser_host(), port));

		if let Some(target) = self.bridge.forward_target(port) {
			let prompt = format!("Forward {}:{port} to {target} on the browser host?", self.bridge.browser_host());
			if self.operator.confirm(&prompt).await {
				match self.bridge.install_forward(port, &target).await {
					Ok(()) => attempt.forward_installed = Some(port),
					Err(err) => warn!(target = "pagewatch.connect", port, error = %err, "could not install forwarding rule"),
				}
			} else {
				info!(target = "pagewatch.connect", port, "forwarding declined; browser may be unreachable");
			}
		}
		Ok(ConnectInput::Launched)
	}

	async fn handshake(&self, attempt: &mut Attempt, timeout: Duration) -> ConnectInput {
		let Some(endpoint) = attempt.endpoint.clone() else {
			return ConnectInput::HandshakeFailed;
		};
		attempt.handshakes += 1;
		match self.handshaker.handshake(&endpoint, timeout).await {
			Ok(channel) => {
				attempt.channel = Some(channel);
				ConnectInput::HandshakeSucceeded
			}
			Err(err) => {
				debug!(target = "pagewatch.connect", %endpoint, error = %err, "handshake failed");
				attempt.last_error = err.0;
				ConnectInput::HandshakeFailed
			}
		}
	}

	async fn diagnose(&self, attempt: &mut Attempt) -> ConnectInput {
		let Some(endpoint) = attempt.endpoint.as_ref() else {
			attempt.diagnosis = Some(Diagnosis::Inconclusive);
			return ConnectInput::Diagnosed(DiagnosisKind::Inconclusive);
		};
		let facts = DiagnosisFacts::gather(self.bridge.as_ref(), endpoint).await;
		let diagnosis = Diagnosis::classify(&facts);
		info!(target = "pagewatch.connect", %endpoint, ?facts, kind = %diagnosis.kind(), "diagnosed");
		let kind = diagnosis.kind();
		attempt.diagnosis = Some(diagnosis);
		ConnectInput::Diagnosed(kind)
	}

	async fn confirm_remediation(&self, attempt: &Attempt) -> ConnectInput {
		let (Some(Diagnosis::Conflict { rule }), Some(endpoint)) = (&attempt.diagnosis, &attempt.endpoint) else {
			return ConnectInput::Confirmed(false);
		};
		let prompt = format!(
			"Port {} is forwarded to {}:{}. Remove that rule, restart the browser and forward it again?",
			endpoint.port, rule.connect_address, rule.connect_port
		);
		ConnectInput::Confirmed(self.operator.confirm(&prompt).await)
	}

	/// Remove the stale rule, restart the browser, forward again.
	async fn remediate(&self, attempt: &mut Attempt) -> ConnectInput {
		let Some(endpoint) = attempt.endpoint.clone() else {
			return ConnectInput::Remediated(false);
		};
		let port = endpoint.port;
		let Some(target) = self.bridge.forward_target(port) else {
			return ConnectInput::Remediated(false);
		};

		let result: Result<(), BridgeError> = async {
			self.bridge.remove_forward(port).await?;
			let spec = LaunchSpec {
				port: target.port,
				profile_dir: self.profile_dir.clone(),
				url: self.launch_url.clone(),
			};
			self.bridge.launch(&spec).await?;
			self.bridge.install_forward(port, &target).await
		}
		.await;

		match result {
			Ok(()) => {
				info!(target = "pagewatch.connect", port, to = %target, "forwarding repaired");
				attempt.launched = true;
				attempt.forward_installed = Some(port);
				ConnectInput::Remediated(true)
			}
			Err(err) => {
				warn!(target = "pagewatch.connect", port, error = %err, "remediation failed");
				attempt.last_error = err.to_string();
				ConnectInput::Remediated(false)
			}
		}
	}

	async fn free_port(&self) -> Result<u16, ConnectError> {
		for port in LAUNCH_PORT_RANGE {
			let bindable = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok();
			if bindable && !self.bridge.is_listening(port).await {
				return Ok(port);
			}
		}
		Err(ConnectError::NoFreePort {
			start: *LAUNCH_PORT_RANGE.start(),
			end: *LAUNCH_PORT_RANGE.end(),
		})
	}

	/// Removes a forwarding rule a failed intent installed. A launched browser
	/// cannot be reached to close it; that is only reported.
	async fn release(&self, attempt: &mut Attempt) {
		if let Some(port) = attempt.forward_installed.take() {
			match self.bridge.remove_forward(port).await {
				Ok(()) => info!(target = "pagewatch.connect", port, "removed forwarding rule of the failed connection"),
				Err(err) => warn!(target = "pagewatch.connect", port, error = %err, "could not remove forwarding rule"),
			}
		}
		if attempt.launched {
			let endpoint = attempt.endpoint.as_ref().map(ToString::to_string).unwrap_or_default();
			warn!(target = "pagewatch.connect", %endpoint, "the browser launched for this connection may still be running");
		}
	}

	fn failure(&self, reason: FailReason, attempt: &mut Attempt, policy: &ConnectionPolicy) -> ConnectError {
		let endpoint = attempt.endpoint.as_ref().map(ToString::to_string).unwrap_or_else(|| "browser".into());
		let port = attempt.endpoint.as_ref().map(|e| e.port).unwrap_or_default();
		let error = match reason {
			FailReason::NoCandidates => ConnectError::NoCandidates {
				polls: policy.discovery_polls,
			},
			FailReason::HandshakeTimeout => ConnectError::HandshakeTimeout {
				endpoint,
				attempts: attempt.handshakes,
				last_error: std::mem::take(&mut attempt.last_error),
			},
			FailReason::ConflictUnresolved => ConnectError::ConflictUnresolved {
				port,
				diagnosis: attempt.diagnosis.take(),
			},
			FailReason::Unreachable(_) => ConnectError::Unreachable {
				endpoint,
				port,
				diagnosis: attempt.diagnosis.take().unwrap_or(Diagnosis::Inconclusive),
			},
			FailReason::LaunchFailed => ConnectError::LaunchFailed(std::mem::take(&mut attempt.last_error)),
			FailReason::UserAborted => ConnectError::UserAborted,
		};
		warn!(target = "pagewatch.connect", error = %error, "connection failed");
		error
	}
}

#[cfg(test)]
mod tests;
