use std::path::PathBuf;

use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use url::Url;

use crate::config::{CaptureMode, WatchConfig};
use crate::platform::{BridgeKind, Endpoint};
use crate::session::{ShutdownMode, TabSelector};

/// Help colors in cargo's style: green bold headers, cyan literals.
fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "pagewatch")]
#[command(about = "Watch a live browser tab's console and network, and dump them on demand")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON config file (default: <output>/pagewatch.json when present)
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Directory for dumps and live logs
	#[arg(short, long, value_name = "DIR")]
	pub output: Option<PathBuf>,

	/// Append every entry to <output>/live/ as it arrives
	#[arg(long)]
	pub realtime: bool,

	/// Start a new browser instead of joining a running one
	#[arg(long, conflicts_with = "endpoint")]
	pub launch: bool,

	/// Browser debugging endpoint, as PORT or HOST:PORT
	#[arg(long, value_name = "HOST:PORT", value_parser = parse_endpoint)]
	pub endpoint: Option<Endpoint>,

	/// URL to open in a launched browser (`localhost:3000` means `http://localhost:3000/`)
	#[arg(long, value_name = "URL", requires = "launch", value_parser = parse_launch_url)]
	pub url: Option<Url>,

	/// How to reach the browser
	#[arg(long, value_enum, default_value = "auto")]
	pub bridge: BridgeKind,

	/// Observe tab N of the listing (0-based)
	#[arg(long, value_name = "N", conflicts_with = "match_url")]
	pub tab: Option<usize>,

	/// Observe the first tab whose URL contains TEXT
	#[arg(long = "match", value_name = "TEXT")]
	pub match_url: Option<String>,

	/// Fail after the retry budget instead of diagnosing the connection
	#[arg(long)]
	pub no_diagnostics: bool,

	/// Stop the session after SECS seconds
	#[arg(long, value_name = "SECS")]
	pub timeout: Option<u64>,

	/// Leave the browser running on exit, even if this session launched it
	#[arg(long, conflicts_with = "close_browser")]
	pub keep_browser: bool,

	/// Close the browser on exit, even if this session joined it
	#[arg(long)]
	pub close_browser: bool,

	/// Write a final dump when the session ends
	#[arg(long)]
	pub dump_on_exit: bool,

	/// Print captured lines to stdout as they arrive
	#[arg(long)]
	pub echo: bool,

	/// Drop console messages matching REGEX (repeatable)
	#[arg(long = "ignore", value_name = "REGEX")]
	pub ignore: Vec<String>,

	/// Control socket path (default: <output>/control.sock)
	#[arg(long, value_name = "PATH")]
	pub control_socket: Option<PathBuf>,

	/// Do not read commands from stdin
	#[arg(long)]
	pub no_keyboard: bool,
}

fn parse_endpoint(value: &str) -> Result<Endpoint, String> {
	Endpoint::parse(value).ok_or_else(|| format!("expected PORT or HOST:PORT, got {value:?}"))
}

fn parse_launch_url(value: &str) -> Result<Url, String> {
	let has_scheme = ["http://", "https://", "file://", "data:", "about:"].iter().any(|scheme| value.starts_with(scheme));
	let candidate = if has_scheme { value.to_string() } else { format!("http://{value}") };
	Url::parse(&candidate).map_err(|e| format!("invalid URL {value:?}: {e}"))
}

impl Cli {
	/// Output directory before the config file is read.
	pub fn output_dir(&self) -> PathBuf {
		self.output.clone().unwrap_or_else(|| WatchConfig::default().output_dir)
	}

	/// Layers flags over `config`.
	pub fn apply(&self, config: &mut WatchConfig) {
		if let Some(output) = &self.output {
			config.output_dir = output.clone();
		}
		if self.realtime {
			config.mode = CaptureMode::Realtime;
		}
		config.ignore_patterns.extend(self.ignore.iter().cloned());
		if let Some(secs) = self.timeout {
			config.session_timeout_secs = Some(secs);
		}
		if let Some(path) = &self.control_socket {
			config.control_socket = Some(path.clone());
		}
		if self.keep_browser {
			config.shutdown = Some(ShutdownMode::LeaveRunning);
		} else if self.close_browser {
			config.shutdown = Some(ShutdownMode::CloseBrowser);
		}
	}

	pub fn tab_selector(&self) -> TabSelector {
		match (&self.tab, &self.match_url) {
			(Some(index), _) => TabSelector::Index(*index),
			(None, Some(text)) => TabSelector::UrlContains(text.clone()),
			(None, None) => TabSelector::First,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_override_config() {
		let cli = Cli::parse_from(["pagewatch", "-o", "out", "--realtime", "--ignore", "^noise", "--timeout", "30", "--keep-browser"]);
		let mut config = WatchConfig {
			ignore_patterns: vec!["^file".into()],
			..WatchConfig::default()
		};
		cli.apply(&mut config);
		assert_eq!(config.output_dir, PathBuf::from("out"));
		assert_eq!(config.mode, CaptureMode::Realtime);
		assert_eq!(config.ignore_patterns, vec!["^file".to_string(), "^noise".to_string()]);
		assert_eq!(config.session_timeout_secs, Some(30));
		assert_eq!(config.shutdown, Some(ShutdownMode::LeaveRunning));
	}

	#[test]
	fn endpoint_and_tab_selection() {
		let cli = Cli::parse_from(["pagewatch", "--endpoint", "172.20.0.1:9223", "--match", "localhost"]);
		assert_eq!(cli.endpoint, Some(Endpoint::new("172.20.0.1", 9223)));
		assert_eq!(cli.tab_selector(), TabSelector::UrlContains("localhost".into()));

		assert!(Cli::try_parse_from(["pagewatch", "--launch", "--endpoint", "9222"]).is_err());
		assert!(Cli::try_parse_from(["pagewatch", "--tab", "1", "--match", "x"]).is_err());
		assert!(Cli::try_parse_from(["pagewatch", "--endpoint", "nope:port"]).is_err());
	}

	#[test]
	fn launch_url_gets_a_scheme() {
		let cli = Cli::parse_from(["pagewatch", "--launch", "--url", "localhost:3000"]);
		assert_eq!(cli.url.map(String::from), Some("http://localhost:3000/".to_string()));

		let cli = Cli::parse_from(["pagewatch", "--launch", "--url", "https://example.com/app?x=1"]);
		assert_eq!(cli.url.unwrap().as_str(), "https://example.com/app?x=1");

		assert!(Cli::try_parse_from(["pagewatch", "--url", "https://example.com"]).is_err(), "--url needs --launch");
		assert!(Cli::try_parse_from(["pagewatch", "--launch", "--url", "http://[bad"]).is_err());
	}

	#[test]
	fn cli_definition_is_consistent() {
		use clap::CommandFactory;
		Cli::command().debug_assert();
	}
}
