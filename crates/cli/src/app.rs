//! Wires the subsystems together for one `pagewatch` invocation.

use std::io::IsTerminal;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::capture::{CaptureEngine, CaptureSettings};
use crate::cli::Cli;
use crate::config::WatchConfig;
use crate::connect::{CdpHandshaker, ConnectionIntent, ConnectionManager, ConnectionPolicy, TerminalOperator};
use crate::control::{self, ControlServer, keyboard};
use crate::error::{Result, WatchError};
use crate::monitor::{self, Monitor, MonitorOptions, MonitorOutcome};
use crate::platform::{PlatformBridge, select_bridge};
use crate::session::{SessionManager, ShutdownGuard, ShutdownMode};

/// Effective configuration: file (or defaults) with flags layered on top.
pub fn resolve_config(cli: &Cli) -> WatchConfig {
	let mut config = WatchConfig::load(cli.config.as_deref(), &cli.output_dir());
	cli.apply(&mut config);
	config
}

pub fn connection_policy(config: &WatchConfig) -> ConnectionPolicy {
	ConnectionPolicy {
		discovery_polls: config.repoll_attempts.max(1),
		discovery_interval: config.repoll_interval(),
		..ConnectionPolicy::default()
	}
}

pub fn connection_intent(cli: &Cli) -> ConnectionIntent {
	let mut intent = if cli.launch { ConnectionIntent::launch() } else { ConnectionIntent::join(cli.endpoint.clone()) };
	intent.diagnostics_enabled = !cli.no_diagnostics;
	intent
}

/// What a shutdown signal does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
	/// Ask the session loop to stop and clean up.
	Stop,
	/// Cleanup is already running; exit without waiting for it.
	Force,
}

/// Decides what a shutdown signal does, given whether cleanup has begun.
pub fn on_signal(guard: &ShutdownGuard, stop: &watch::Sender<bool>) -> SignalAction {
	if guard.has_fired() {
		return SignalAction::Force;
	}
	stop.send_replace(true);
	SignalAction::Stop
}

/// Connects, observes until the session ends, and cleans up. Every failure
/// after the connection exists releases it the same way a normal exit does.
pub async fn run(cli: Cli) -> Result<MonitorOutcome> {
	let config = resolve_config(&cli);
	let settings = CaptureSettings::from_config(&config)?;

	let bridge: Arc<dyn PlatformBridge> = Arc::from(select_bridge(cli.bridge, config.candidate_ports.clone()).await?);
	info!(target = "pagewatch.bridge", bridge = bridge.name(), host = %bridge.browser_host(), "platform bridge selected");
	let handshaker = CdpHandshaker::new().map_err(|err| WatchError::Config(format!("http client: {err}")))?;

	let manager = ConnectionManager::new(Arc::clone(&bridge), Arc::new(handshaker), Arc::new(TerminalOperator), config.resolved_profile_dir())
		.with_policy(connection_policy(&config))
		.with_launch_url(cli.url.as_ref().map(ToString::to_string));
	let connected = manager.connect(&connection_intent(&cli)).await?;
	info!(target = "pagewatch.connect", endpoint = %connected.endpoint, launched = connected.launched, "connected");

	let shutdown_mode = config.shutdown.unwrap_or_else(|| ShutdownMode::for_session(connected.launched));
	let mut session = SessionManager::new(connected.channel, config.notice_limit);
	let mut engine = CaptureEngine::new(settings);
	let selected = match session.discover().await {
		Ok(()) => session.select_initial(&cli.tab_selector(), &mut engine).await,
		Err(err) => Err(err),
	};
	match selected {
		Ok(tab) => eprintln!("observing {} ({})", tab.url, tab.title),
		Err(err) => {
			monitor::release(session, &mut engine, shutdown_mode, bridge.as_ref(), connected.forward_installed).await;
			return Err(err);
		}
	}

	let (commands_tx, commands_rx) = control::channel();
	let (stop_tx, stop_rx) = watch::channel(false);
	match ControlServer::bind(&config.resolved_control_socket()).await {
		Ok(server) => {
			eprintln!("control socket: {}", server.path().display());
			let commands = commands_tx.clone();
			tokio::spawn(async move {
				if let Err(err) = server.run(commands, stop_rx).await {
					warn!(target = "pagewatch.control", error = %err, "control socket stopped");
				}
			});
		}
		Err(err) => warn!(target = "pagewatch.control", error = %err, "control socket unavailable; keyboard only"),
	}

	let keys = (!cli.no_keyboard && std::io::stdin().is_terminal()).then(|| {
		eprintln!("{}", keyboard::HELP);
		keyboard::spawn(commands_tx.clone())
	});
	drop(commands_tx);

	let options = MonitorOptions {
		echo: cli.echo,
		dump_on_exit: cli.dump_on_exit,
		forward_installed: connected.forward_installed,
	};
	let monitor = Monitor::new(config, options, shutdown_mode, session, engine, bridge, commands_rx);

	let (signal_tx, mut signal_rx) = watch::channel(false);
	let signals = tokio::spawn(watch_signals(monitor.guard(), signal_tx));
	let outcome = monitor
		.run(async move {
			if signal_rx.wait_for(|stop| *stop).await.is_err() {
				std::future::pending::<()>().await;
			}
		})
		.await;

	signals.abort();
	let _ = stop_tx.send(true);
	if let Some(keys) = keys {
		keys.abort();
	}
	outcome
}

/// Forwards shutdown signals to the session loop. A signal that arrives while
/// cleanup is running exits the process at once.
async fn watch_signals(guard: Arc<ShutdownGuard>, stop: watch::Sender<bool>) {
	loop {
		shutdown_signal().await;
		if on_signal(&guard, &stop) == SignalAction::Force {
			warn!(target = "pagewatch.session", "signal received during cleanup; exiting without finishing it");
			std::process::exit(130);
		}
		info!(target = "pagewatch.session", "signal received; send another to exit immediately once cleanup starts");
	}
}

/// Resolves on Ctrl-C, or SIGTERM where there is one.
pub async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {}
					_ = sigterm.recv() => {}
				}
			}
			Err(err) => {
				warn!(target = "pagewatch.session", error = %err, "SIGTERM handler unavailable");
				let _ = tokio::signal::ctrl_c().await;
			}
		}
	}

	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
