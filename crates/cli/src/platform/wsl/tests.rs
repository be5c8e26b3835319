use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::*;

const PORTPROXY_TABLE: &str = "
Listen on ipv4:             Connect to ipv4:

Address         Port        Address         Port
--------------- ----------  --------------- ----------
172.29.160.1    9222        127.0.0.1       9333
0.0.0.0         8080        127.0.0.1       8080
";

/// Windows-side listeners: a browser on loopback 9333, the portproxy rule on the host address.
const LISTENERS: [(&str, u16); 2] = [("127.0.0.1", 9333), ("172.29.160.1", 9222)];

/// Simulates `netsh interface portproxy` state behind PowerShell.
#[derive(Default)]
struct FakeWindows {
	rules: Mutex<Vec<ForwardRule>>,
	calls: Mutex<Vec<String>>,
	deny_elevation: bool,
}

impl FakeWindows {
	fn with_rules(rules: Vec<ForwardRule>) -> Self {
		Self {
			rules: Mutex::new(rules),
			..Self::default()
		}
	}

	fn mutations(&self) -> Vec<String> {
		self.calls.lock().unwrap().iter().filter(|c| c.contains("RunAs")).cloned().collect()
	}

	fn table(&self) -> String {
		let mut out = String::from("Address         Port        Address         Port\n--------------- ----------  --------------- ----------\n");
		for rule in self.rules.lock().unwrap().iter() {
			out.push_str(&format!("{}  {}  {}  {}\n", rule.listen_address, rule.listen_port, rule.connect_address, rule.connect_port));
		}
		out
	}

	fn apply(&self, script: &str) {
		let value = |key: &str| {
			script
				.split('\'')
				.find_map(|token| token.strip_prefix(key))
				.map(str::to_string)
				.unwrap_or_default()
		};
		let mut rules = self.rules.lock().unwrap();
		if script.contains("'add'") {
			rules.push(ForwardRule {
				listen_address: value("listenaddress="),
				listen_port: value("listenport=").parse().unwrap(),
				connect_address: value("connectaddress="),
				connect_port: value("connectport=").parse().unwrap(),
			});
		} else if script.contains("'delete'") {
			let address = value("listenaddress=");
			let port: u16 = value("listenport=").parse().unwrap();
			rules.retain(|r| !(r.listen_address == address && r.listen_port == port));
		}
	}
}

#[async_trait]
impl Shell for FakeWindows {
	async fn run(&self, _program: &str, args: &[String]) -> std::io::Result<ShellOutput> {
		let script = args.last().cloned().unwrap_or_default();
		self.calls.lock().unwrap().push(script.clone());

		let stdout = if script.contains("show v4tov4") {
			self.table()
		} else if script.contains("RunAs") {
			if !self.deny_elevation {
				self.apply(&script);
			}
			String::new()
		} else if script.contains("Get-NetTCPConnection") {
			let listening = LISTENERS.iter().any(|(address, port)| {
				script.contains(&format!("-LocalPort {port} ")) && (!script.contains("-LocalAddress") || script.contains(&format!("-LocalAddress {address} ")))
			});
			if listening { "listening".into() } else { "idle".into() }
		} else {
			String::new()
		};
		Ok(ShellOutput {
			success: true,
			stdout,
			stderr: String::new(),
		})
	}
}

fn bridge(fake: FakeWindows) -> WslBridge<FakeWindows> {
	WslBridge::with_shell(fake, vec![9222], "172.29.160.1".into(), "powershell.exe".into()).unwrap()
}

fn rule(listen: &str, port: u16, connect: &str, connect_port: u16) -> ForwardRule {
	ForwardRule {
		listen_address: listen.into(),
		listen_port: port,
		connect_address: connect.into(),
		connect_port,
	}
}

#[test]
fn is_wsl_detection_works_for_env_or_osrelease() {
	assert!(is_wsl_with_inputs(None, Some("Ubuntu")));
	assert!(is_wsl_with_inputs(Some("6.6.87.2-microsoft-standard-WSL2"), None));
	assert!(!is_wsl_with_inputs(Some("6.8.0-generic"), None));
}

#[test]
fn parses_portproxy_table() {
	let rules = parse_portproxy(PORTPROXY_TABLE);
	assert_eq!(rules, vec![rule("172.29.160.1", 9222, "127.0.0.1", 9333), rule("0.0.0.0", 8080, "127.0.0.1", 8080)]);
	assert!(parse_portproxy("").is_empty());
}

#[test]
fn host_ip_from_route_or_nameserver() {
	assert_eq!(
		parse_default_route("default via 172.29.160.1 dev eth0 proto kernel\n172.29.160.0/20 dev eth0"),
		Some("172.29.160.1".into())
	);
	assert_eq!(parse_default_route("172.29.160.0/20 dev eth0"), None);
	assert_eq!(
		parse_nameserver("# generated by WSL\nnameserver 172.29.160.1\n"),
		Some("172.29.160.1".into())
	);
}

#[test]
fn profile_paths_are_translated_for_windows() {
	assert_eq!(windows_profile_path(Path::new("/mnt/d/work/profile")), r"D:\work\profile");
	assert_eq!(windows_profile_path(Path::new(r"C:\temp\chrome")), r"C:\temp\chrome");
	assert_eq!(windows_profile_path(&PathBuf::from("/home/dev/.local/share/pagewatch")), MANAGED_PROFILE_DIR);
}

#[test]
fn powershell_quoting_escapes_single_quotes() {
	assert_eq!(ps_single_quote("it's"), "'it''s'");
}

#[tokio::test]
async fn remove_forward_twice_is_a_no_op_the_second_time() {
	let fake = FakeWindows::with_rules(vec![rule("172.29.160.1", 9222, "127.0.0.1", 9333)]);
	let bridge = bridge(fake);

	bridge.remove_forward(9222).await.unwrap();
	assert_eq!(bridge.shell.mutations().len(), 1);

	bridge.remove_forward(9222).await.unwrap();
	assert_eq!(bridge.shell.mutations().len(), 1);
	assert!(bridge.forward_rules().await.is_empty());
}

#[tokio::test]
async fn install_replaces_stale_rule() {
	let fake = FakeWindows::with_rules(vec![rule("172.29.160.1", 9222, "127.0.0.1", 9333)]);
	let bridge = bridge(fake);
	let target = windows_loopback(9222);

	bridge.install_forward(9222, &target).await.unwrap();

	let mutations = bridge.shell.mutations();
	assert_eq!(mutations.len(), 2);
	assert!(mutations[0].contains("'delete'"), "remove must precede add");
	assert!(mutations[1].contains("'add'"));

	let rules = bridge.forward_rules().await;
	assert_eq!(rules, vec![rule("172.29.160.1", 9222, "127.0.0.1", 9222)]);
}

#[tokio::test]
async fn declined_elevation_is_reported() {
	let fake = FakeWindows {
		deny_elevation: true,
		..FakeWindows::default()
	};
	let bridge = bridge(fake);

	let err = bridge.install_forward(9222, &windows_loopback(9222)).await.unwrap_err();
	assert!(matches!(err, BridgeError::CommandFailed { .. }));
	assert!(bridge.forward_rules().await.is_empty());
}

#[tokio::test]
async fn listening_check_ignores_the_portproxy_listener() {
	let bridge = bridge(FakeWindows::default());
	assert!(bridge.is_listening(9333).await);
	assert!(!bridge.is_listening(9222).await, "only the forwarding rule listens on 9222");
	assert!(!bridge.is_listening(9444).await);
}
