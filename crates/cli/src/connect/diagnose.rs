//! Read-only classification of a connection that will not come up.

use std::fmt;

use crate::platform::{Endpoint, ForwardRule, PlatformBridge};

/// Coarse diagnosis class, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisKind {
	NothingListening,
	Conflict,
	AccessRefused,
	Inconclusive,
}

impl fmt::Display for DiagnosisKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			DiagnosisKind::NothingListening => "nothing listening",
			DiagnosisKind::Conflict => "stale forwarding rule",
			DiagnosisKind::AccessRefused => "access refused",
			DiagnosisKind::Inconclusive => "inconclusive",
		})
	}
}

/// Everything observed while diagnosing. Gathering it changes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisFacts {
	pub port: u16,
	/// Where a forwarding rule for `port` must point, when the bridge forwards at all.
	pub expected: Option<Endpoint>,
	/// Rule currently installed for `port`.
	pub rule: Option<ForwardRule>,
	/// Whether anything accepts TCP on the browser side of `port`.
	pub listening: Option<bool>,
	/// Whether `/json/version` answers through the observer's address.
	pub probe_ok: bool,
}

impl DiagnosisFacts {
	/// Collects facts through the bridge's read-only operations.
	pub async fn gather(bridge: &dyn PlatformBridge, endpoint: &Endpoint) -> Self {
		let expected = bridge.forward_target(endpoint.port);
		let rule = match expected {
			Some(_) => bridge.forward_rules().await.into_iter().find(|r| r.listen_port == endpoint.port),
			None => None,
		};
		// The browser side of a forwarded port is the rule's target port.
		let browser_port = expected.as_ref().map(|e| e.port).unwrap_or(endpoint.port);
		let listening = Some(bridge.is_listening(browser_port).await);
		let probe_ok = bridge.probe(endpoint).await;
		Self {
			port: endpoint.port,
			expected,
			rule,
			listening,
			probe_ok,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
	/// No process accepts connections on the debugging port.
	NothingListening,
	/// A forwarding rule exists for the port but points somewhere else.
	Conflict { rule: ForwardRule },
	/// Something listens but refuses the DevTools handshake.
	AccessRefused,
	Inconclusive,
}

impl Diagnosis {
	pub fn classify(facts: &DiagnosisFacts) -> Self {
		if let (Some(rule), Some(expected)) = (&facts.rule, &facts.expected) {
			if !rule.points_at(expected) {
				return Diagnosis::Conflict { rule: rule.clone() };
			}
		}
		match facts.listening {
			Some(false) => Diagnosis::NothingListening,
			Some(true) => Diagnosis::AccessRefused,
			None => Diagnosis::Inconclusive,
		}
	}

	pub fn kind(&self) -> DiagnosisKind {
		match self {
			Diagnosis::NothingListening => DiagnosisKind::NothingListening,
			Diagnosis::Conflict { .. } => DiagnosisKind::Conflict,
			Diagnosis::AccessRefused => DiagnosisKind::AccessRefused,
			Diagnosis::Inconclusive => DiagnosisKind::Inconclusive,
		}
	}

	/// Operator-facing next step.
	pub fn guidance(&self, port: u16) -> String {
		match self {
			Diagnosis::NothingListening => format!(
				"no browser listens on port {port}; start one with --remote-debugging-port={port} or rerun with --launch"
			),
			Diagnosis::Conflict { rule } => format!(
				"port {port} is forwarded to {}:{} which is not the browser; remove the rule or accept the fix when prompted",
				rule.connect_address, rule.connect_port
			),
			Diagnosis::AccessRefused => format!(
				"something listens on port {port} but refuses DevTools; check firewall rules and that the browser was started with --remote-debugging-port"
			),
			Diagnosis::Inconclusive => format!("could not determine why port {port} is unreachable; rerun with -vv for details"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn facts(rule: Option<ForwardRule>, listening: Option<bool>) -> DiagnosisFacts {
		DiagnosisFacts {
			port: 9222,
			expected: Some(Endpoint::new("127.0.0.1", 9222)),
			rule,
			listening,
			probe_ok: false,
		}
	}

	fn rule_to(port: u16) -> ForwardRule {
		ForwardRule {
			listen_address: "172.29.160.1".into(),
			listen_port: 9222,
			connect_address: "127.0.0.1".into(),
			connect_port: port,
		}
	}

	#[test]
	fn rule_to_wrong_target_is_a_conflict() {
		let diagnosis = Diagnosis::classify(&facts(Some(rule_to(9333)), Some(true)));
		assert_eq!(diagnosis, Diagnosis::Conflict { rule: rule_to(9333) });
		assert_eq!(diagnosis.kind(), DiagnosisKind::Conflict);
	}

	#[test]
	fn matching_rule_falls_through_to_listening_check() {
		assert_eq!(Diagnosis::classify(&facts(Some(rule_to(9222)), Some(true))), Diagnosis::AccessRefused);
		assert_eq!(Diagnosis::classify(&facts(Some(rule_to(9222)), Some(false))), Diagnosis::NothingListening);
	}

	#[test]
	fn no_rule_without_facts_is_inconclusive() {
		assert_eq!(Diagnosis::classify(&facts(None, None)), Diagnosis::Inconclusive);
	}

	#[test]
	fn native_bridge_never_conflicts() {
		let native = DiagnosisFacts {
			expected: None,
			..facts(Some(rule_to(9333)), Some(false))
		};
		assert_eq!(Diagnosis::classify(&native), Diagnosis::NothingListening);
	}

	#[test]
	fn guidance_names_the_port() {
		assert!(Diagnosis::NothingListening.guidance(9222).contains("9222"));
		assert!(Diagnosis::Conflict { rule: rule_to(9333) }.guidance(9222).contains("127.0.0.1:9333"));
	}
}
