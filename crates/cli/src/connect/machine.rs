//! Pure connection state machine.
//!
//! [`transition`] is the whole retry/diagnose/remediate policy as a table from
//! `(state, input)` to `(next state, action)`. It performs no I/O; the
//! [`ConnectionManager`](super::ConnectionManager) executes the actions and
//! feeds their results back as inputs.

use std::time::Duration;

use super::diagnose::DiagnosisKind;

/// Fixed retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
	/// Handshake attempts before diagnostics run.
	pub max_attempts: u32,
	pub retry_delay: Duration,
	pub handshake_timeout: Duration,
	/// Remediation passes allowed per intent.
	pub remediation_passes: u32,
	/// Discovery polls before giving up with no candidates.
	pub discovery_polls: u32,
	pub discovery_interval: Duration,
}

impl Default for ConnectionPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			retry_delay: Duration::from_millis(1_500),
			handshake_timeout: Duration::from_secs(3),
			remediation_passes: 1,
			discovery_polls: 30,
			discovery_interval: Duration::from_secs(2),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
	/// Start a fresh browser on a newly chosen port.
	Launch,
	/// Connect to an already running browser.
	Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
	Idle,
	Discovering { poll: u32 },
	Launching,
	Connecting { attempt: u32 },
	Diagnosing,
	AwaitingConfirmation,
	Remediating,
	Connected,
	Failed,
}

impl ConnectState {
	pub fn is_terminal(self) -> bool {
		matches!(self, ConnectState::Connected | ConnectState::Failed)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectInput {
	Start,
	/// Number of reachable candidates found by a discovery pass.
	Candidates(usize),
	Launched,
	LaunchFailed,
	HandshakeSucceeded,
	HandshakeFailed,
	WaitElapsed,
	Diagnosed(DiagnosisKind),
	Confirmed(bool),
	Remediated(bool),
	Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
	NoCandidates,
	HandshakeTimeout,
	ConflictUnresolved,
	UserAborted,
	Unreachable(DiagnosisKind),
	LaunchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAction {
	Discover,
	Launch,
	Handshake,
	Wait(Duration),
	Diagnose,
	Confirm,
	Remediate,
	Finish,
	Fail(FailReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
	pub next: ConnectState,
	pub action: ConnectAction,
}

/// Inputs that do not change between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineContext {
	pub mode: ConnectMode,
	pub has_endpoint_hint: bool,
	pub diagnostics_enabled: bool,
	pub policy: ConnectionPolicy,
	/// Remediation passes already spent.
	pub remediations_used: u32,
}

fn to(next: ConnectState, action: ConnectAction) -> Option<Transition> {
	Some(Transition { next, action })
}

fn fail(reason: FailReason) -> Option<Transition> {
	to(ConnectState::Failed, ConnectAction::Fail(reason))
}

/// The transition table. `None` means the input is not valid in `state`.
pub fn transition(state: ConnectState, input: ConnectInput, ctx: &MachineContext) -> Option<Transition> {
	use ConnectAction as A;
	use ConnectInput as I;
	use ConnectState as S;

	if input == I::Aborted && !state.is_terminal() {
		return fail(FailReason::UserAborted);
	}

	match (state, input) {
		(S::Idle, I::Start) => match (ctx.mode, ctx.has_endpoint_hint) {
			(ConnectMode::Launch, _) => to(S::Launching, A::Launch),
			(ConnectMode::Join, true) => to(S::Connecting { attempt: 1 }, A::Handshake),
			(ConnectMode::Join, false) => to(S::Discovering { poll: 1 }, A::Discover),
		},

		(S::Discovering { .. }, I::Candidates(n)) if n > 0 => to(S::Connecting { attempt: 1 }, A::Handshake),
		(S::Discovering { poll }, I::Candidates(_)) if poll < ctx.policy.discovery_polls => {
			to(S::Discovering { poll: poll + 1 }, A::Wait(ctx.policy.discovery_interval))
		}
		(S::Discovering { .. }, I::Candidates(_)) => fail(FailReason::NoCandidates),
		(S::Discovering { poll }, I::WaitElapsed) => to(S::Discovering { poll }, A::Discover),

		(S::Launching, I::Launched) => to(S::Connecting { attempt: 1 }, A::Handshake),
		(S::Launching, I::LaunchFailed) => fail(FailReason::LaunchFailed),

		(S::Connecting { .. }, I::HandshakeSucceeded) => to(S::Connected, A::Finish),
		(S::Connecting { attempt }, I::HandshakeFailed) if attempt < ctx.policy.max_attempts => {
			to(S::Connecting { attempt: attempt + 1 }, A::Wait(ctx.policy.retry_delay))
		}
		(S::Connecting { .. }, I::HandshakeFailed) if ctx.diagnostics_enabled => to(S::Diagnosing, A::Diagnose),
		(S::Connecting { .. }, I::HandshakeFailed) => fail(FailReason::HandshakeTimeout),
		(S::Connecting { attempt }, I::WaitElapsed) => to(S::Connecting { attempt }, A::Handshake),

		(S::Diagnosing, I::Diagnosed(DiagnosisKind::Conflict)) if ctx.remediations_used < ctx.policy.remediation_passes => {
			to(S::AwaitingConfirmation, A::Confirm)
		}
		(S::Diagnosing, I::Diagnosed(DiagnosisKind::Conflict)) => fail(FailReason::ConflictUnresolved),
		(S::Diagnosing, I::Diagnosed(DiagnosisKind::Inconclusive)) => fail(FailReason::HandshakeTimeout),
		(S::Diagnosing, I::Diagnosed(kind)) => fail(FailReason::Unreachable(kind)),

		(S::AwaitingConfirmation, I::Confirmed(true)) => to(S::Remediating, A::Remediate),
		(S::AwaitingConfirmation, I::Confirmed(false)) => fail(FailReason::ConflictUnresolved),

		(S::Remediating, I::Remediated(true)) => to(S::Connecting { attempt: 1 }, A::Handshake),
		(S::Remediating, I::Remediated(false)) => fail(FailReason::ConflictUnresolved),

		_ => None,
	}
}

/// Stateful wrapper around [`transition`].
#[derive(Debug, Clone)]
pub struct ConnectMachine {
	state: ConnectState,
	ctx: MachineContext,
}

impl ConnectMachine {
	pub fn new(mode: ConnectMode, has_endpoint_hint: bool, diagnostics_enabled: bool, policy: ConnectionPolicy) -> Self {
		Self {
			state: ConnectState::Idle,
			ctx: MachineContext {
				mode,
				has_endpoint_hint,
				diagnostics_enabled,
				policy,
				remediations_used: 0,
			},
		}
	}

	pub fn state(&self) -> ConnectState {
		self.state
	}

	/// Applies `input`. Returns `None` (state unchanged) if the input is invalid here.
	pub fn step(&mut self, input: ConnectInput) -> Option<ConnectAction> {
		let t = transition(self.state, input, &self.ctx)?;
		if t.action == ConnectAction::Remediate {
			self.ctx.remediations_used += 1;
		}
		self.state = t.next;
		Some(t.action)
	}
}
