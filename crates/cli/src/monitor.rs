//! The session loop.
//!
//! A single `select!` on the current-thread runtime drives page events,
//! queued capture effects, operator commands, tab notices, the stop signal
//! and the optional hard timeout. Whatever ends the loop, cleanup runs once
//! through the [`ShutdownGuard`], which the signal watcher shares to tell a
//! repeated signal during cleanup apart from the first one.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use colored::Colorize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::buffer::{self, CaptureBuffers, DumpOptions, DumpReport, Emission, LiveSink, LogStream, SnapshotSource};
use crate::capture::{CaptureEngine, CaptureError, CaptureOutput};
use crate::config::{CaptureMode, WatchConfig};
use crate::control::{Command, CommandReceiver, CommandReply, Verb, keyboard};
use crate::error::{Result, WatchError};
use crate::platform::PlatformBridge;
use crate::session::{SessionManager, ShutdownGuard, ShutdownMode, ShutdownTrigger, TabEvent};

/// Per-run switches that are not part of [`WatchConfig`].
#[derive(Debug, Clone, Default)]
pub struct MonitorOptions {
	/// Mirror captured lines to stdout.
	pub echo: bool,
	pub dump_on_exit: bool,
	/// Port of a forwarding rule this session installed.
	pub forward_installed: Option<u16>,
}

/// How the session ended.
#[derive(Debug)]
pub struct MonitorOutcome {
	pub trigger: ShutdownTrigger,
	pub final_dump: Option<DumpReport>,
}

enum Flow {
	Continue,
	Stop,
	Fail(CaptureError),
}

pub struct Monitor {
	config: WatchConfig,
	options: MonitorOptions,
	shutdown_mode: ShutdownMode,
	session: SessionManager,
	engine: CaptureEngine,
	buffers: CaptureBuffers,
	sink: Option<LiveSink>,
	bridge: Arc<dyn PlatformBridge>,
	commands: CommandReceiver,
	guard: Arc<ShutdownGuard>,
}

impl Monitor {
	/// Builds the loop state. Nothing can fail here; the realtime sink opens in [`Monitor::run`].
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		config: WatchConfig,
		options: MonitorOptions,
		shutdown_mode: ShutdownMode,
		session: SessionManager,
		engine: CaptureEngine,
		bridge: Arc<dyn PlatformBridge>,
		commands: CommandReceiver,
	) -> Self {
		let buffers = match config.mode {
			CaptureMode::Lazy => CaptureBuffers::new(),
			CaptureMode::Realtime => CaptureBuffers::bounded(config.realtime_memory_limit),
		};
		Self {
			config,
			options,
			shutdown_mode,
			session,
			engine,
			buffers,
			sink: None,
			bridge,
			commands,
			guard: Arc::new(ShutdownGuard::new()),
		}
	}

	/// The guard `finish` claims; shared with whoever handles repeated signals.
	pub fn guard(&self) -> Arc<ShutdownGuard> {
		Arc::clone(&self.guard)
	}

	/// Runs until a stop command, `stop` resolving, the timeout, loss of the
	/// browser, or a fatal capture error. Cleanup has finished when this returns,
	/// including when realtime mode cannot open `live/`.
	pub async fn run(mut self, stop: impl Future<Output = ()>) -> Result<MonitorOutcome> {
		if self.config.mode == CaptureMode::Realtime {
			match LiveSink::open(&self.config.output_dir) {
				Ok(sink) => {
					info!(target = "pagewatch.dump", dir = %sink.dir().display(), "realtime capture");
					self.sink = Some(sink);
				}
				Err(err) => {
					let err = WatchError::from(err);
					error!(target = "pagewatch.dump", error = %err, "realtime output unavailable");
					self.finish(&ShutdownTrigger::Fatal(err.to_string())).await;
					return Err(err);
				}
			}
		}

		tokio::pin!(stop);
		let deadline = self.config.session_timeout().map(|limit| Instant::now() + limit);
		let timeout = sleep_until(deadline);
		tokio::pin!(timeout);

		let (trigger, fatal) = loop {
			tokio::select! {
				output = self.engine.next() => match output {
					Ok(CaptureOutput::Emissions(emissions)) => self.record(&emissions),
					Ok(CaptureOutput::PageClosed { target_id }) => {
						warn!(target = "pagewatch.session", target_id = %target_id, "observed tab went away; pick another with `t`");
					}
					Err(err) if err.is_transient() => {
						debug!(target = "pagewatch.capture", error = %err, "transient capture error");
					}
					Err(err) => {
						error!(target = "pagewatch.capture", error = %err, "capture failed");
						break (ShutdownTrigger::Fatal(err.to_string()), Some(err));
					}
				},
				Some(command) = self.commands.recv() => match self.on_command(command).await {
					Flow::Continue => {}
					Flow::Stop => break (ShutdownTrigger::Operator, None),
					Flow::Fail(err) => break (ShutdownTrigger::Fatal(err.to_string()), Some(err)),
				},
				event = self.session.next_target_event() => match event {
					Some(event) => self.on_tab_event(&event),
					None => break (ShutdownTrigger::BrowserGone, None),
				},
				_ = &mut stop => break (ShutdownTrigger::Signal, None),
				_ = &mut timeout => break (ShutdownTrigger::Timeout, None),
			}
		};

		let final_dump = self.finish(&trigger).await;
		match fatal {
			Some(err) => Err(WatchError::Capture(err)),
			None => Ok(MonitorOutcome { trigger, final_dump }),
		}
	}

	/// Records every queued capture effect. Returns the first fatal error, if any.
	async fn settle(&mut self) -> Option<CaptureError> {
		let queued = self.engine.queued();
		while let Some(result) = self.engine.next_queued().await {
			match result {
				Ok(emissions) => self.record(&emissions),
				Err(err) if err.is_transient() => {
					debug!(target = "pagewatch.capture", error = %err, "transient capture error");
				}
				Err(err) => {
					error!(target = "pagewatch.capture", error = %err, "capture failed");
					return Some(err);
				}
			}
		}
		if queued > 0 {
			debug!(target = "pagewatch.capture", queued, "queued effects settled");
		}
		None
	}

	fn record(&mut self, emissions: &[Emission]) {
		for emission in emissions {
			self.buffers.apply(emission);
			if let Some(sink) = self.sink.as_mut() {
				sink.write(emission, &self.buffers);
			}
			if self.options.echo {
				echo(emission);
			}
		}
	}

	fn on_tab_event(&mut self, event: &pagewatch_protocol::CdpEvent) {
		match self.session.on_target_event(event, Utc::now()) {
			Some(TabEvent::Opened(notice)) => {
				eprintln!("{} {} (press t to list, <n> to switch)", "new tab:".bold(), notice.url);
			}
			Some(TabEvent::ActiveClosed { target_id }) => {
				if self.engine.attached_target() == Some(target_id.as_str()) {
					self.engine.detach();
				}
				eprintln!("{}", "observed tab closed; press t to pick another".yellow());
			}
			None => {}
		}
	}

	async fn on_command(&mut self, command: Command) -> Flow {
		let verb = command.verb.clone();
		debug!(target = "pagewatch.control", verb = verb.name(), "command");
		let (reply, flow) = match &verb {
			Verb::Dump => {
				let report = self.dump(true).await;
				(CommandReply::success(to_value(&report)), Flow::Continue)
			}
			Verb::Clear => {
				self.buffers.clear();
				(CommandReply::success(to_value(&self.buffers.stats())), Flow::Continue)
			}
			Verb::Status => (CommandReply::success(self.status()), Flow::Continue),
			Verb::ListTabs => match self.session.list().await {
				Ok(tabs) => (CommandReply::success(to_value(&tabs)), Flow::Continue),
				Err(err) => (CommandReply::failure(err.to_string()), Flow::Continue),
			},
			Verb::SwitchTab { index } => match self.session.switch(*index, &mut self.engine).await {
				Ok(target) => (CommandReply::success(json!({ "targetId": target.target_id, "url": target.url })), Flow::Continue),
				Err(err) => {
					warn!(target = "pagewatch.session", index = *index, error = %err, "tab switch failed");
					(CommandReply::failure(err.to_string()), Flow::Continue)
				}
			},
			// Events handled before the pause still land in the buffers.
			Verb::Pause => match self.settle().await {
				Some(err) => (CommandReply::failure(err.to_string()), Flow::Fail(err)),
				None => {
					self.engine.pause();
					info!(target = "pagewatch.capture", "capture paused");
					(CommandReply::success(json!({ "paused": true })), Flow::Continue)
				}
			},
			Verb::Resume => {
				self.engine.resume();
				info!(target = "pagewatch.capture", "capture resumed");
				(CommandReply::success(json!({ "paused": false })), Flow::Continue)
			}
			Verb::Stop => (CommandReply::done(), Flow::Stop),
		};
		if let Some(unclaimed) = command.respond(reply) {
			print_reply(&verb, &unclaimed);
		}
		flow
	}

	async fn dump(&mut self, with_page: bool) -> DumpReport {
		let page = self.session.active_page().filter(|_| with_page).map(|page| page as &dyn SnapshotSource);
		let options = DumpOptions {
			page,
			toggles: self.config.snapshots,
			dom_limit: self.config.dom_limit,
		};
		buffer::dump(&mut self.buffers, &self.config.output_dir, options, Utc::now()).await
	}

	fn status(&self) -> Value {
		let tab = self.session.active().map(|t| json!({ "targetId": t.target_id, "title": t.title, "url": t.url }));
		json!({
			"mode": self.config.mode,
			"paused": self.engine.is_paused(),
			"outputDir": self.config.output_dir,
			"tab": tab,
			"inFlight": self.engine.in_flight(),
			"buffers": self.buffers.stats(),
			"liveWriteFailures": self.sink.as_ref().map(LiveSink::failures),
			"newTabs": self.session.notices().collect::<Vec<_>>(),
		})
	}

	/// Stops capture, optionally dumps, and releases the browser per the shutdown mode.
	async fn finish(mut self, trigger: &ShutdownTrigger) -> Option<DumpReport> {
		if !self.guard.begin() {
			return None;
		}
		info!(target = "pagewatch.session", reason = trigger.describe(), "shutting down");
		self.engine.pause();
		self.commands.close();
		// Detaching cuts queued page I/O short, so settling cannot stall the exit.
		self.engine.detach();
		if let Some(err) = self.settle().await {
			debug!(target = "pagewatch.capture", error = %err, "queued effect failed during shutdown");
		}

		// Snapshots need a live page; logs and details are worth keeping regardless.
		let final_dump = if self.options.dump_on_exit {
			Some(self.dump(*trigger != ShutdownTrigger::BrowserGone).await)
		} else {
			None
		};

		let Monitor {
			session,
			mut engine,
			options,
			shutdown_mode,
			bridge,
			..
		} = self;
		release(session, &mut engine, shutdown_mode, bridge.as_ref(), options.forward_installed).await;
		final_dump
	}
}

/// Releases the browser side of a session per `mode`. Closing the browser also
/// removes the forwarding rule this session installed, if any.
pub async fn release(session: SessionManager, engine: &mut CaptureEngine, mode: ShutdownMode, bridge: &dyn PlatformBridge, forward_installed: Option<u16>) {
	let close_browser = mode == ShutdownMode::CloseBrowser;
	session.shutdown(engine, close_browser).await;
	if !close_browser {
		return;
	}
	if let Some(port) = forward_installed {
		match bridge.remove_forward(port).await {
			Ok(()) => info!(target = "pagewatch.bridge", port, "forwarding rule removed"),
			Err(err) => warn!(target = "pagewatch.bridge", port, error = %err, "removing forwarding rule failed"),
		}
	}
}

fn sleep_until(deadline: Option<Instant>) -> impl Future<Output = ()> {
	async move {
		match deadline {
			Some(deadline) => tokio::time::sleep_until(deadline).await,
			None => std::future::pending().await,
		}
	}
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
	serde_json::to_value(value).unwrap_or(Value::Null)
}

fn echo(emission: &Emission) {
	let Emission::Line { stream, text } = emission else {
		if let Emission::ConsoleCleared { marker } = emission {
			println!("{}", marker.dimmed());
		}
		return;
	};
	let styled = match stream {
		LogStream::Network if text.contains(" ✗ ") => text.red(),
		LogStream::Network => text.cyan(),
		LogStream::Console if text.contains("] [error] ") || text.contains("] [pageerror] ") => text.red(),
		LogStream::Console if text.contains("] [warn] ") => text.yellow(),
		LogStream::Console if text.starts_with("=====") => text.magenta().bold(),
		LogStream::Console => text.normal(),
	};
	println!("{styled}");
}

/// Keyboard replies go to stderr in a compact form.
fn print_reply(verb: &Verb, reply: &CommandReply) {
	if let Some(error) = &reply.error {
		eprintln!("{} {error}", format!("{}:", verb.name()).red());
		return;
	}
	match (verb, &reply.data) {
		(Verb::ListTabs, Some(Value::Array(tabs))) => {
			for tab in tabs {
				let marker = if tab["active"].as_bool().unwrap_or(false) { "*" } else { " " };
				eprintln!("{marker} [{}] {}  {}", tab["index"], tab["title"].as_str().unwrap_or_default(), tab["url"].as_str().unwrap_or_default().dimmed());
			}
		}
		(Verb::Dump, Some(report)) => {
			let failed = report["artifacts"].as_array().map(|a| a.iter().filter(|x| x["status"] == "failed").count()).unwrap_or(0);
			eprintln!("{} {} ({failed} failed)", "dumped to".green(), report["outputDir"].as_str().unwrap_or_default());
		}
		(_, Some(data)) => eprintln!("{}: {}", verb.name().green(), serde_json::to_string_pretty(data).unwrap_or_default()),
		(_, None) => eprintln!("{}", verb.name().green()),
	}
	if matches!(verb, Verb::Status) {
		eprintln!("{}", keyboard::HELP.dimmed());
	}
}
