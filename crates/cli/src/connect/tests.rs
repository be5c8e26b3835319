use std::collections::VecDeque;
use std::sync::Mutex;

use pagewatch_runtime::memory_pair;

use super::*;
use crate::platform::ForwardRule;

/// Bridge that records every call and answers from fixed facts.
#[derive(Default)]
struct FakeBridge {
	calls: Mutex<Vec<String>>,
	candidates: Vec<Endpoint>,
	forwards: bool,
	rules: Mutex<Vec<ForwardRule>>,
	listening: bool,
	launch_fails: bool,
}

impl FakeBridge {
	fn wsl_with_stale_rule() -> Self {
		Self {
			forwards: true,
			listening: true,
			rules: Mutex::new(vec![ForwardRule {
				listen_address: "172.29.160.1".into(),
				listen_port: 9222,
				connect_address: "127.0.0.1".into(),
				connect_port: 9333,
			}]),
			..Self::default()
		}
	}

	fn record(&self, call: impl Into<String>) {
		self.calls.lock().unwrap().push(call.into());
	}

	fn calls(&self) -> Vec<String> {
		self.calls.lock().unwrap().clone()
	}

	fn called(&self, prefix: &str) -> bool {
		self.calls().iter().any(|c| c.starts_with(prefix))
	}

	fn position(&self, prefix: &str) -> usize {
		self.calls().iter().position(|c| c.starts_with(prefix)).unwrap()
	}
}

#[async_trait]
impl PlatformBridge for FakeBridge {
	fn name(&self) -> &'static str {
		"fake"
	}

	fn browser_host(&self) -> String {
		"127.0.0.1".into()
	}

	fn forward_target(&self, port: u16) -> Option<Endpoint> {
		self.forwards.then(|| Endpoint::new("127.0.0.1", port))
	}

	async fn list_candidates(&self) -> Vec<Endpoint> {
		self.record("list_candidates");
		self.candidates.clone()
	}

	async fn launch(&self, spec: &LaunchSpec) -> Result<(), BridgeError> {
		self.record(format!("launch {}", spec.port));
		if self.launch_fails {
			return Err(BridgeError::NotFound {
				what: "browser",
				hint: "none installed".into(),
			});
		}
		Ok(())
	}

	async fn probe(&self, _endpoint: &Endpoint) -> bool {
		self.record("probe");
		false
	}

	async fn is_listening(&self, _port: u16) -> bool {
		self.listening
	}

	async fn forward_rules(&self) -> Vec<ForwardRule> {
		self.rules.lock().unwrap().clone()
	}

	async fn install_forward(&self, port: u16, target: &Endpoint) -> Result<(), BridgeError> {
		self.record(format!("install_forward {port}"));
		self.rules.lock().unwrap().push(ForwardRule {
			listen_address: "172.29.160.1".into(),
			listen_port: port,
			connect_address: target.host.clone(),
			connect_port: target.port,
		});
		Ok(())
	}

	async fn remove_forward(&self, port: u16) -> Result<(), BridgeError> {
		self.record(format!("remove_forward {port}"));
		self.rules.lock().unwrap().retain(|r| r.listen_port != port);
		Ok(())
	}
}

/// Answers handshakes from a script; an exhausted script fails.
#[derive(Default)]
struct ScriptedHandshaker {
	script: Mutex<VecDeque<bool>>,
	attempts: Mutex<u32>,
}

impl ScriptedHandshaker {
	fn new(script: impl IntoIterator<Item = bool>) -> Self {
		Self {
			script: Mutex::new(script.into_iter().collect()),
			attempts: Mutex::new(0),
		}
	}

	fn attempts(&self) -> u32 {
		*self.attempts.lock().unwrap()
	}
}

#[async_trait]
impl Handshaker for ScriptedHandshaker {
	async fn handshake(&self, endpoint: &Endpoint, _timeout: Duration) -> Result<ControlChannel, HandshakeError> {
		*self.attempts.lock().unwrap() += 1;
		if self.script.lock().unwrap().pop_front().unwrap_or(false) {
			let (parts, _peer) = memory_pair();
			Ok(ControlChannel::from_parts(parts, &format!("ws://{endpoint}/devtools/browser/fake")))
		} else {
			Err(HandshakeError("connection refused".into()))
		}
	}
}

#[derive(Default)]
struct ScriptedOperator {
	answer: bool,
	abort: bool,
	prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
	fn answering(answer: bool) -> Self {
		Self {
			answer,
			..Self::default()
		}
	}

	fn prompts(&self) -> Vec<String> {
		self.prompts.lock().unwrap().clone()
	}
}

#[async_trait]
impl Operator for ScriptedOperator {
	async fn confirm(&self, prompt: &str) -> bool {
		self.prompts.lock().unwrap().push(prompt.to_string());
		self.answer
	}

	async fn aborted(&self) {
		if !self.abort {
			std::future::pending::<()>().await;
		}
	}
}

fn fast_policy() -> ConnectionPolicy {
	ConnectionPolicy {
		retry_delay: Duration::from_millis(1),
		discovery_interval: Duration::from_millis(1),
		discovery_polls: 3,
		..ConnectionPolicy::default()
	}
}

fn manager(bridge: &Arc<FakeBridge>, handshaker: &Arc<ScriptedHandshaker>, operator: &Arc<ScriptedOperator>) -> ConnectionManager {
	ConnectionManager::new(
		Arc::clone(bridge) as Arc<dyn PlatformBridge>,
		Arc::clone(handshaker) as Arc<dyn Handshaker>,
		Arc::clone(operator) as Arc<dyn Operator>,
		PathBuf::from("/tmp/pagewatch-test-profile"),
	)
	.with_policy(fast_policy())
}

fn hinted() -> ConnectionIntent {
	ConnectionIntent::join(Some(Endpoint::new("127.0.0.1", 9222)))
}

#[tokio::test]
async fn join_with_hint_connects_without_side_effects() {
	let bridge = Arc::new(FakeBridge::default());
	let handshaker = Arc::new(ScriptedHandshaker::new([true]));
	let operator = Arc::new(ScriptedOperator::default());

	let connected = manager(&bridge, &handshaker, &operator).connect(&hinted()).await.unwrap();

	assert_eq!(connected.endpoint, Endpoint::new("127.0.0.1", 9222));
	assert!(!connected.launched);
	assert_eq!(connected.forward_installed, None);
	assert!(bridge.calls().is_empty());
	assert!(operator.prompts().is_empty());
}

#[tokio::test]
async fn retries_then_succeeds_within_budget() {
	let bridge = Arc::new(FakeBridge::default());
	let handshaker = Arc::new(ScriptedHandshaker::new([false, false, true]));
	let operator = Arc::new(ScriptedOperator::default());

	manager(&bridge, &handshaker, &operator).connect(&hinted()).await.unwrap();
	assert_eq!(handshaker.attempts(), 3);
}

#[tokio::test]
async fn declined_conflict_fix_spawns_nothing_and_keeps_rule() {
	let bridge = Arc::new(FakeBridge::wsl_with_stale_rule());
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::answering(false));

	let err = manager(&bridge, &handshaker, &operator).connect(&hinted()).await.unwrap_err();

	assert!(matches!(err, ConnectError::ConflictUnresolved { port: 9222, .. }), "{err:?}");
	assert_eq!(handshaker.attempts(), 5);
	assert_eq!(operator.prompts().len(), 1);
	assert!(!bridge.called("launch"));
	assert!(!bridge.called("remove_forward"));
	assert_eq!(bridge.forward_rules().await.len(), 1);
}

#[tokio::test]
async fn accepted_conflict_fix_removes_before_relaunch_and_forward() {
	let bridge = Arc::new(FakeBridge::wsl_with_stale_rule());
	let handshaker = Arc::new(ScriptedHandshaker::new([false, false, false, false, false, true]));
	let operator = Arc::new(ScriptedOperator::answering(true));

	let connected = manager(&bridge, &handshaker, &operator).connect(&hinted()).await.unwrap();

	assert!(connected.launched);
	assert_eq!(connected.forward_installed, Some(9222));
	assert!(bridge.position("remove_forward") < bridge.position("launch"));
	assert!(bridge.position("launch") < bridge.position("install_forward"));

	let rules = bridge.forward_rules().await;
	assert_eq!(rules.len(), 1, "no orphaned rule after replacement");
	assert!(rules[0].points_at(&Endpoint::new("127.0.0.1", 9222)));
}

#[tokio::test]
async fn remediation_is_attempted_only_once() {
	let bridge = Arc::new(FakeBridge::wsl_with_stale_rule());
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::answering(true));

	// The fake keeps listing a stale rule only until remediation replaces it,
	// after which the diagnosis is access refused.
	let err = manager(&bridge, &handshaker, &operator).connect(&hinted()).await.unwrap_err();

	assert!(matches!(err, ConnectError::Unreachable { .. }), "{err:?}");
	assert_eq!(handshaker.attempts(), 10);
	assert_eq!(bridge.calls().iter().filter(|c| c.starts_with("launch")).count(), 1);
	assert!(bridge.forward_rules().await.is_empty(), "the replacement rule is not left behind");
}

#[tokio::test]
async fn nothing_listening_fails_with_guidance_and_no_prompt() {
	let bridge = Arc::new(FakeBridge::default());
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::answering(true));

	let err = manager(&bridge, &handshaker, &operator).connect(&hinted()).await.unwrap_err();

	let ConnectError::Unreachable { diagnosis, .. } = &err else {
		panic!("expected unreachable, got {err:?}");
	};
	assert_eq!(*diagnosis, Diagnosis::NothingListening);
	assert!(err.guidance().contains("--remote-debugging-port=9222"));
	assert!(operator.prompts().is_empty());
}

#[tokio::test]
async fn diagnostics_can_be_disabled() {
	let bridge = Arc::new(FakeBridge::default());
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::default());
	let intent = ConnectionIntent {
		diagnostics_enabled: false,
		..hinted()
	};

	let err = manager(&bridge, &handshaker, &operator).connect(&intent).await.unwrap_err();
	assert!(matches!(err, ConnectError::HandshakeTimeout { attempts: 5, .. }), "{err:?}");
	assert!(!bridge.called("probe"));
}

#[tokio::test]
async fn discovery_gives_up_after_bounded_polls() {
	let bridge = Arc::new(FakeBridge::default());
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::default());

	let err = manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::join(None)).await.unwrap_err();

	assert!(matches!(err, ConnectError::NoCandidates { polls: 3 }), "{err:?}");
	assert_eq!(bridge.calls().iter().filter(|c| *c == "list_candidates").count(), 3);
	assert_eq!(handshaker.attempts(), 0);
}

#[tokio::test]
async fn discovery_uses_first_candidate() {
	let bridge = Arc::new(FakeBridge {
		candidates: vec![Endpoint::new("127.0.0.1", 9224), Endpoint::new("127.0.0.1", 9225)],
		..FakeBridge::default()
	});
	let handshaker = Arc::new(ScriptedHandshaker::new([true]));
	let operator = Arc::new(ScriptedOperator::default());

	let connected = manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::join(None)).await.unwrap();
	assert_eq!(connected.endpoint.port, 9224);
}

#[tokio::test]
async fn operator_abort_during_discovery() {
	let bridge = Arc::new(FakeBridge::default());
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator {
		abort: true,
		..ScriptedOperator::default()
	});

	let err = manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::join(None)).await.unwrap_err();
	assert!(matches!(err, ConnectError::UserAborted));
}

#[tokio::test]
async fn launch_connects_to_fresh_port() {
	let bridge = Arc::new(FakeBridge::default());
	let handshaker = Arc::new(ScriptedHandshaker::new([false, true]));
	let operator = Arc::new(ScriptedOperator::default());

	let connected = manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::launch()).await.unwrap();

	assert!(connected.launched);
	assert!(LAUNCH_PORT_RANGE.contains(&connected.endpoint.port));
	assert_eq!(bridge.calls(), vec![format!("launch {}", connected.endpoint.port)]);
}

#[tokio::test]
async fn launch_asks_before_forwarding() {
	let bridge = Arc::new(FakeBridge {
		forwards: true,
		..FakeBridge::default()
	});
	let handshaker = Arc::new(ScriptedHandshaker::new([true]));
	let operator = Arc::new(ScriptedOperator::answering(false));

	let connected = manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::launch()).await.unwrap();

	assert_eq!(operator.prompts().len(), 1);
	assert_eq!(connected.forward_installed, None);
	assert!(!bridge.called("install_forward"));
}

#[tokio::test]
async fn launch_failure_is_terminal() {
	let bridge = Arc::new(FakeBridge {
		launch_fails: true,
		..FakeBridge::default()
	});
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::default());

	let err = manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::launch()).await.unwrap_err();
	assert!(matches!(err, ConnectError::LaunchFailed(_)));
	assert_eq!(handshaker.attempts(), 0);
}

#[tokio::test]
async fn failed_launch_connection_removes_its_forward() {
	let bridge = Arc::new(FakeBridge {
		forwards: true,
		..FakeBridge::default()
	});
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::answering(true));

	let err = manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::launch()).await.unwrap_err();

	assert!(matches!(err, ConnectError::Unreachable { .. } | ConnectError::HandshakeTimeout { .. }), "{err:?}");
	assert_eq!(handshaker.attempts(), 5);
	assert!(bridge.called("install_forward"));
	assert!(bridge.position("install_forward") < bridge.position("remove_forward"));
	assert!(bridge.forward_rules().await.is_empty());
}

#[tokio::test]
async fn declined_forward_leaves_nothing_to_remove() {
	let bridge = Arc::new(FakeBridge {
		forwards: true,
		..FakeBridge::default()
	});
	let handshaker = Arc::new(ScriptedHandshaker::default());
	let operator = Arc::new(ScriptedOperator::answering(false));

	manager(&bridge, &handshaker, &operator).connect(&ConnectionIntent::launch()).await.unwrap_err();

	assert!(!bridge.called("remove_forward"));
}
