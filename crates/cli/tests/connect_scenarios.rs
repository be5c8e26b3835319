//! Connection state machine driven through whole scenarios.

use pagewatch_cli::connect::{ConnectAction, ConnectInput, ConnectMachine, ConnectMode, ConnectState, ConnectionPolicy, DiagnosisKind, FailReason};

/// Feeds `inputs` in order and returns every action taken.
fn replay(machine: &mut ConnectMachine, inputs: &[ConnectInput]) -> Vec<ConnectAction> {
	inputs
		.iter()
		.map(|input| machine.step(*input).unwrap_or_else(|| panic!("{input:?} rejected in {:?}", machine.state())))
		.collect()
}

fn exhaust_handshakes(policy: &ConnectionPolicy) -> Vec<ConnectInput> {
	let mut inputs = vec![ConnectInput::Start];
	for attempt in 1..=policy.max_attempts {
		inputs.push(ConnectInput::HandshakeFailed);
		if attempt < policy.max_attempts {
			inputs.push(ConnectInput::WaitElapsed);
		}
	}
	inputs
}

#[test]
fn declined_conflict_never_launches_or_remediates() {
	let policy = ConnectionPolicy::default();
	let mut machine = ConnectMachine::new(ConnectMode::Join, true, true, policy);

	let mut inputs = exhaust_handshakes(&policy);
	inputs.extend([ConnectInput::Diagnosed(DiagnosisKind::Conflict), ConnectInput::Confirmed(false)]);
	let actions = replay(&mut machine, &inputs);

	assert_eq!(actions.iter().filter(|a| **a == ConnectAction::Handshake).count(), policy.max_attempts as usize);
	assert!(actions.contains(&ConnectAction::Diagnose));
	assert!(actions.contains(&ConnectAction::Confirm));
	assert!(!actions.iter().any(|a| matches!(a, ConnectAction::Launch | ConnectAction::Remediate)));
	assert_eq!(actions.last(), Some(&ConnectAction::Fail(FailReason::ConflictUnresolved)));
	assert_eq!(machine.state(), ConnectState::Failed);
}

#[test]
fn nothing_listening_fails_without_asking() {
	let policy = ConnectionPolicy::default();
	let mut machine = ConnectMachine::new(ConnectMode::Join, true, true, policy);

	let mut inputs = exhaust_handshakes(&policy);
	inputs.push(ConnectInput::Diagnosed(DiagnosisKind::NothingListening));
	let actions = replay(&mut machine, &inputs);

	assert!(!actions.contains(&ConnectAction::Confirm));
	assert_eq!(actions.last(), Some(&ConnectAction::Fail(FailReason::Unreachable(DiagnosisKind::NothingListening))));
}

#[test]
fn accepted_fix_gets_one_fresh_budget_only() {
	let policy = ConnectionPolicy::default();
	let mut machine = ConnectMachine::new(ConnectMode::Join, true, true, policy);

	let mut inputs = exhaust_handshakes(&policy);
	inputs.extend([ConnectInput::Diagnosed(DiagnosisKind::Conflict), ConnectInput::Confirmed(true), ConnectInput::Remediated(true)]);
	for attempt in 1..=policy.max_attempts {
		inputs.push(ConnectInput::HandshakeFailed);
		if attempt < policy.max_attempts {
			inputs.push(ConnectInput::WaitElapsed);
		}
	}
	inputs.push(ConnectInput::Diagnosed(DiagnosisKind::Conflict));
	let actions = replay(&mut machine, &inputs);

	assert_eq!(actions.iter().filter(|a| **a == ConnectAction::Remediate).count(), 1);
	assert_eq!(actions.last(), Some(&ConnectAction::Fail(FailReason::ConflictUnresolved)));
	assert_eq!(machine.step(ConnectInput::Start), None, "terminal states accept nothing");
}
