//! Event capture and correlation engine.
//!
//! The engine owns the subscription to one page's event stream. Each event is
//! decoded and passed to a pure handler ([`handlers`]); the resulting effect is
//! queued in arrival order so page I/O (argument resolution, body fetches)
//! overlaps while the buffers still see emissions in arrival order.
//!
//! At most one page is attached at any time: [`CaptureEngine::attach`] detaches
//! the previous page before subscribing to the next. Effects queued before a
//! detach still complete, without the page: console arguments fall back to the
//! preformatted text and bodies become a note, so every handled event keeps
//! its line and detail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::{self, BoxFuture};
use futures::stream::FuturesOrdered;
use pagewatch_protocol::{CdpEvent, PageEvent};
use pagewatch_runtime::{EventStream, PageHandle};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod correlate;
pub mod handlers;
pub mod render;

pub use correlate::{Correlator, InFlightRequest, RequestToken};
pub use handlers::{BodyOutcome, CaptureSettings, CaptureState, Effect, PendingBody, PendingConsole};

use crate::buffer::Emission;
use crate::config::WatchConfig;

/// Page operations the engine needs to finish an effect.
#[async_trait]
pub trait PageOps: Send + Sync {
	async fn resolve_value(&self, object_id: &str) -> pagewatch_runtime::Result<Value>;
	async fn response_body(&self, request_id: &str) -> pagewatch_runtime::Result<String>;
}

#[async_trait]
impl PageOps for PageHandle {
	async fn resolve_value(&self, object_id: &str) -> pagewatch_runtime::Result<Value> {
		PageHandle::resolve_value(self, object_id).await
	}

	async fn response_body(&self, request_id: &str) -> pagewatch_runtime::Result<String> {
		PageHandle::response_body(self, request_id).await
	}
}

#[derive(Debug, Error)]
pub enum CaptureError {
	/// The page navigated away or closed. Never ends the session.
	#[error("page context went away: {0}")]
	Transient(#[source] pagewatch_runtime::Error),

	#[error("capture failed: {0}")]
	Fatal(#[source] pagewatch_runtime::Error),

	#[error("malformed {method} event: {source}")]
	Malformed {
		method: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid ignore pattern {pattern:?}: {source}")]
	InvalidPattern {
		pattern: String,
		#[source]
		source: regex_lite::Error,
	},
}

impl CaptureError {
	pub fn classify(err: pagewatch_runtime::Error) -> Self {
		if err.is_stale_context() { CaptureError::Transient(err) } else { CaptureError::Fatal(err) }
	}

	pub fn is_transient(&self) -> bool {
		matches!(self, CaptureError::Transient(_))
	}
}

impl CaptureSettings {
	pub fn from_config(config: &WatchConfig) -> Result<Self, CaptureError> {
		CaptureSettings::new(&config.ignore_patterns, &config.hot_reload_markers, config.body_limit)
			.map_err(|(pattern, source)| CaptureError::InvalidPattern { pattern, source })
	}
}

/// What [`CaptureEngine::next`] produced.
#[derive(Debug)]
pub enum CaptureOutput {
	/// Emissions of one event, in order.
	Emissions(Vec<Emission>),
	/// The attached page's event stream ended; the engine has detached.
	PageClosed { target_id: String },
}

type PendingEmissions = BoxFuture<'static, Result<Vec<Emission>, CaptureError>>;

const DETACHED_NOTE: &str = "body unavailable: page detached";

struct AttachedPage {
	target_id: String,
	ops: Arc<dyn PageOps>,
	events: EventStream,
	/// Dropped on detach, which cuts queued page I/O short.
	attached: watch::Sender<()>,
}

/// What a queued effect may still use of the page it came from.
struct PageLink {
	ops: Arc<dyn PageOps>,
	detached: watch::Receiver<()>,
}

/// Resolves once the page behind `detached` is detached.
async fn page_detached(detached: &mut watch::Receiver<()>) {
	while detached.changed().await.is_ok() {}
}

pub struct CaptureEngine {
	settings: CaptureSettings,
	state: CaptureState,
	page: Option<AttachedPage>,
	pending: FuturesOrdered<PendingEmissions>,
	attaches: u64,
	detaches: u64,
}

impl CaptureEngine {
	pub fn new(settings: CaptureSettings) -> Self {
		Self {
			settings,
			state: CaptureState::default(),
			page: None,
			pending: FuturesOrdered::new(),
			attaches: 0,
			detaches: 0,
		}
	}

	/// Starts recording `events` from `target_id`, detaching any previous page first.
	pub fn attach(&mut self, target_id: impl Into<String>, ops: Arc<dyn PageOps>, events: EventStream) {
		self.detach();
		let target_id = target_id.into();
		info!(target = "pagewatch.capture", target_id = %target_id, "capture attached");
		let (attached, _) = watch::channel(());
		self.page = Some(AttachedPage {
			target_id,
			ops,
			events,
			attached,
		});
		self.attaches += 1;
		debug_assert!(self.active_attachments() <= 1);
	}

	/// Drops the subscription and in-flight correlation. Queued effects stay
	/// queued and finish without the page. Returns false when nothing was attached.
	pub fn detach(&mut self) -> bool {
		let Some(page) = self.page.take() else {
			return false;
		};
		drop(page.attached);
		self.state.correlator.clear();
		self.detaches += 1;
		if !self.pending.is_empty() {
			debug!(target = "pagewatch.capture", queued = self.pending.len(), "queued effects finish without the page");
		}
		info!(target = "pagewatch.capture", target_id = %page.target_id, "capture detached");
		true
	}

	pub fn is_attached(&self) -> bool {
		self.page.is_some()
	}

	pub fn attached_target(&self) -> Option<&str> {
		self.page.as_ref().map(|p| p.target_id.as_str())
	}

	/// Attach count minus detach count; 0 or 1.
	pub fn active_attachments(&self) -> u64 {
		self.attaches - self.detaches
	}

	pub fn pause(&mut self) {
		self.state.paused = true;
	}

	pub fn resume(&mut self) {
		self.state.paused = false;
	}

	pub fn is_paused(&self) -> bool {
		self.state.paused
	}

	pub fn in_flight(&self) -> usize {
		self.state.correlator.len()
	}

	/// Decodes `event`, runs its handler and queues the effect.
	pub fn handle(&mut self, event: &CdpEvent, now: DateTime<Utc>) -> Result<(), CaptureError> {
		if self.state.paused {
			return Ok(());
		}
		let Some(decoded) = PageEvent::from_event(event) else {
			return Ok(());
		};
		let page_event = decoded.map_err(|source| CaptureError::Malformed {
			method: event.method.clone(),
			source,
		})?;
		let effect = handlers::dispatch(page_event, &mut self.state, &self.settings, now);
		self.enqueue(effect);
		Ok(())
	}

	fn enqueue(&mut self, effect: Effect) {
		let link = self.page.as_ref().map(|p| PageLink {
			ops: Arc::clone(&p.ops),
			detached: p.attached.subscribe(),
		});
		let work: PendingEmissions = match effect {
			Effect::Skip => return,
			Effect::Emit(emissions) => Box::pin(future::ready(Ok(emissions))),
			Effect::ResolveConsole(pending) => Box::pin(resolve_console(link, pending)),
			Effect::FetchBody(pending) => Box::pin(fetch_body(link, pending, self.settings.body_limit)),
		};
		self.pending.push_back(work);
	}

	pub fn queued(&self) -> usize {
		self.pending.len()
	}

	/// Next completed queued effect, without pulling page events. `None` when the queue is empty.
	pub async fn next_queued(&mut self) -> Option<Result<Vec<Emission>, CaptureError>> {
		self.pending.next().await
	}

	/// Next batch of emissions, pulling page events as needed.
	///
	/// Queued effects are completed first. Without an attached page and with
	/// nothing queued this never resolves. Cancel-safe.
	pub async fn next(&mut self) -> Result<CaptureOutput, CaptureError> {
		loop {
			let Some(page) = self.page.as_mut() else {
				return match self.pending.next().await {
					Some(result) => result.map(CaptureOutput::Emissions),
					None => future::pending().await,
				};
			};

			let event = tokio::select! {
				biased;
				Some(result) = self.pending.next(), if !self.pending.is_empty() => {
					return result.map(CaptureOutput::Emissions);
				}
				event = page.events.recv() => event,
			};

			match event {
				Some(event) => self.handle(&event, Utc::now())?,
				None => {
					let target_id = page.target_id.clone();
					self.detach();
					return Ok(CaptureOutput::PageClosed { target_id });
				}
			}
		}
	}

	/// Completes every queued effect.
	pub async fn drain(&mut self) -> Result<Vec<Emission>, CaptureError> {
		let mut out = Vec::new();
		while let Some(result) = self.pending.next().await {
			out.extend(result?);
		}
		Ok(out)
	}
}

async fn resolve_console(link: Option<PageLink>, pending: PendingConsole) -> Result<Vec<Emission>, CaptureError> {
	let Some(PageLink { ops, mut detached }) = link else {
		return Ok(handlers::render_console(&pending, None));
	};
	let rendered = tokio::select! {
		biased;
		rendered = resolve_args(ops.as_ref(), &pending) => rendered,
		_ = page_detached(&mut detached) => {
			debug!(target = "pagewatch.capture", "page detached, using preformatted text");
			None
		}
	};
	Ok(handlers::render_console(&pending, rendered))
}

/// Rendered arguments, or `None` when any of them could not be resolved.
async fn resolve_args(ops: &dyn PageOps, pending: &PendingConsole) -> Option<Vec<String>> {
	let mut rendered = Vec::with_capacity(pending.args.len());
	for arg in &pending.args {
		let Some(object_id) = arg.object_id.as_deref().filter(|_| arg.needs_resolution()) else {
			rendered.push(arg.preformatted());
			continue;
		};
		match ops.resolve_value(object_id).await {
			Ok(value) => rendered.push(render::render_value(&value)),
			Err(err) => {
				if err.is_stale_context() {
					debug!(target = "pagewatch.capture", error = %err, "argument gone, using preformatted text");
				} else {
					warn!(target = "pagewatch.capture", error = %err, "argument resolution failed, using preformatted text");
				}
				return None;
			}
		}
	}
	Some(rendered)
}

async fn fetch_body(link: Option<PageLink>, pending: PendingBody, limit: usize) -> Result<Vec<Emission>, CaptureError> {
	let Some(PageLink { ops, mut detached }) = link else {
		return Ok(handlers::render_body(pending, BodyOutcome::Unavailable(DETACHED_NOTE.into())));
	};
	let fetched = tokio::select! {
		biased;
		result = ops.response_body(pending.token.as_str()) => Some(result),
		_ = page_detached(&mut detached) => None,
	};
	let outcome = match fetched {
		None => BodyOutcome::Unavailable(DETACHED_NOTE.into()),
		Some(Ok(body)) => BodyOutcome::Text(render::truncate_body(body, limit)),
		Some(Err(err)) if err.is_stale_context() || err.is_timeout() => {
			debug!(target = "pagewatch.capture", id = pending.id, error = %err, "response body unavailable");
			BodyOutcome::Unavailable(format!("body unavailable: {err}"))
		}
		Some(Err(err)) => return Err(CaptureError::classify(err)),
	};
	Ok(handlers::render_body(pending, outcome))
}
