//! One pure handler per event class.
//!
//! A handler takes the decoded event, the mutable [`CaptureState`], the
//! immutable [`CaptureSettings`] and the arrival time, and returns an
//! [`Effect`]. Correlation state changes happen here, at arrival. Work that
//! needs the page (argument resolution, body fetch) is described by the
//! effect and finished later by [`render_console`] / [`render_body`].

use chrono::{DateTime, Utc};
use pagewatch_protocol::events::Headers;
use pagewatch_protocol::{ConsoleApiCalled, ExceptionThrown, LoadingFailed, LoadingFinished, PageEvent, RemoteObject, RequestWillBeSent, ResponseReceived};
use regex_lite::Regex;

use super::correlate::{Correlator, InFlightRequest, RequestToken};
use super::render;
use crate::buffer::{Emission, FailureMeta, RequestDetail, RequestMeta, ResponseMeta};

/// Immutable per-session capture options.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
	ignore: Vec<Regex>,
	/// Lowercased.
	hot_reload_markers: Vec<String>,
	pub body_limit: usize,
}

impl CaptureSettings {
	pub fn new(ignore_patterns: &[String], hot_reload_markers: &[String], body_limit: usize) -> Result<Self, (String, regex_lite::Error)> {
		let ignore = ignore_patterns
			.iter()
			.map(|pattern| Regex::new(pattern).map_err(|e| (pattern.clone(), e)))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Self {
			ignore,
			hot_reload_markers: hot_reload_markers.iter().map(|m| m.to_lowercase()).collect(),
			body_limit,
		})
	}

	pub fn is_ignored(&self, text: &str) -> bool {
		self.ignore.iter().any(|re| re.is_match(text))
	}

	pub fn is_hot_reload(&self, text: &str) -> bool {
		if self.hot_reload_markers.is_empty() {
			return false;
		}
		let lower = text.to_lowercase();
		self.hot_reload_markers.iter().any(|marker| lower.contains(marker.as_str()))
	}
}

impl Default for CaptureSettings {
	fn default() -> Self {
		Self {
			ignore: Vec::new(),
			hot_reload_markers: Vec::new(),
			body_limit: 64 * 1024,
		}
	}
}

/// Mutable capture state. The pause flag has a single writer: the session's command handling.
#[derive(Debug, Default)]
pub struct CaptureState {
	pub paused: bool,
	pub correlator: Correlator,
}

/// Console message whose arguments must be resolved in the page.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConsole {
	pub now: DateTime<Utc>,
	pub level: String,
	pub args: Vec<RemoteObject>,
	/// Preformatted text used when resolution fails.
	pub fallback: String,
	pub hot_reload: bool,
}

/// Completed request whose text body must be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBody {
	pub now: DateTime<Utc>,
	pub id: u64,
	pub token: RequestToken,
	pub url: String,
	pub status: i64,
	pub status_text: String,
	pub headers: Headers,
	pub duration: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyOutcome {
	Text(String),
	/// Reason the body could not be read.
	Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
	Skip,
	Emit(Vec<Emission>),
	ResolveConsole(PendingConsole),
	FetchBody(PendingBody),
}

pub fn dispatch(event: PageEvent, state: &mut CaptureState, settings: &CaptureSettings, now: DateTime<Utc>) -> Effect {
	match event {
		PageEvent::Console(event) => on_console(event, state, settings, now),
		PageEvent::Exception(event) => on_exception(event, state, now),
		PageEvent::RequestStarted(event) => on_request_started(event, state, now),
		PageEvent::ResponseReceived(event) => on_response(event, state),
		PageEvent::RequestFinished(event) => on_finished(event, state, now),
		PageEvent::RequestFailed(event) => on_failed(event, state, now),
		PageEvent::TargetCreated(_) | PageEvent::TargetDestroyed(_) => Effect::Skip,
	}
}

pub fn on_console(event: ConsoleApiCalled, state: &mut CaptureState, settings: &CaptureSettings, now: DateTime<Utc>) -> Effect {
	if state.paused {
		return Effect::Skip;
	}
	if event.kind == "clear" {
		return Effect::Emit(vec![Emission::ConsoleCleared {
			marker: render::clear_marker(now),
		}]);
	}

	let fallback = event.preformatted_text();
	if settings.is_ignored(&fallback) {
		return Effect::Skip;
	}
	let pending = PendingConsole {
		now,
		hot_reload: settings.is_hot_reload(&fallback),
		level: event.kind,
		fallback,
		args: event.args,
	};
	if pending.args.iter().any(RemoteObject::needs_resolution) {
		Effect::ResolveConsole(pending)
	} else {
		let rendered = pending.args.iter().map(RemoteObject::preformatted).collect();
		Effect::Emit(render_console(&pending, Some(rendered)))
	}
}

/// Final console emissions. `None` renders the preformatted fallback.
pub fn render_console(pending: &PendingConsole, rendered_args: Option<Vec<String>>) -> Vec<Emission> {
	let text = rendered_args.map(|args| args.join(" ")).unwrap_or_else(|| pending.fallback.clone());
	let mut out = Vec::with_capacity(2);
	if pending.hot_reload {
		out.push(Emission::console(render::hot_reload_separator(pending.now)));
	}
	out.push(Emission::console(render::console_line(pending.now, &pending.level, &text)));
	out
}

pub fn on_exception(event: ExceptionThrown, state: &mut CaptureState, now: DateTime<Utc>) -> Effect {
	if state.paused {
		return Effect::Skip;
	}
	Effect::Emit(vec![Emission::console(render::page_error_line(now, &event.exception_details.message()))])
}

pub fn on_request_started(event: RequestWillBeSent, state: &mut CaptureState, now: DateTime<Utc>) -> Effect {
	if state.paused {
		return Effect::Skip;
	}
	let token = RequestToken::new(event.request_id);
	let mut out = Vec::with_capacity(4);

	// A redirect reuses the request id: close the previous hop first.
	if let Some(redirect) = event.redirect_response {
		if let Some(previous) = state.correlator.finish(&token) {
			let duration = previous.duration_ms(event.timestamp);
			out.push(Emission::network(render::completion_line(now, previous.id, redirect.status, &previous.url, duration)));
			out.push(Emission::DetailCompleted {
				id: previous.id,
				response: ResponseMeta {
					status: redirect.status,
					status_text: redirect.status_text,
					headers: redirect.headers,
					body: None,
					body_note: Some("redirect".into()),
					duration,
				},
			});
		}
	}

	let resource_type = event.resource_type.unwrap_or_else(|| "Other".into());
	let id = state.correlator.start(
		token,
		InFlightRequest {
			id: 0,
			method: event.request.method.clone(),
			url: event.request.url.clone(),
			started: now,
			started_at: event.timestamp,
			resource_type: resource_type.clone(),
			response: None,
		},
	);
	out.push(Emission::network(render::request_line(now, id, &event.request.method, &event.request.url)));
	out.push(Emission::DetailCreated(RequestDetail {
		id,
		timestamp: render::iso(now),
		method: event.request.method,
		resource_type,
		url: event.request.url,
		request: RequestMeta {
			headers: event.request.headers,
			post_data: event.request.post_data,
		},
		response: None,
		failed: None,
	}));
	Effect::Emit(out)
}

/// Response metadata is intermediate: stored for the terminal event, never a line.
pub fn on_response(event: ResponseReceived, state: &mut CaptureState) -> Effect {
	if state.paused {
		return Effect::Skip;
	}
	state.correlator.record_response(&RequestToken::new(event.request_id), event.response);
	Effect::Skip
}

pub fn on_finished(event: LoadingFinished, state: &mut CaptureState, now: DateTime<Utc>) -> Effect {
	if state.paused {
		return Effect::Skip;
	}
	let token = RequestToken::new(event.request_id);
	let Some(request) = state.correlator.finish(&token) else {
		return Effect::Emit(vec![Emission::network(render::unmatched_completion_line(now, &token))]);
	};

	let duration = request.duration_ms(event.timestamp);
	let Some(response) = request.response else {
		let meta = ResponseMeta {
			status: 0,
			status_text: String::new(),
			headers: Headers::new(),
			body: None,
			body_note: Some("no response metadata".into()),
			duration,
		};
		return Effect::Emit(vec![
			Emission::network(render::completion_line(now, request.id, 0, &request.url, duration)),
			Emission::DetailCompleted { id: request.id, response: meta },
		]);
	};

	let content_type = response.content_type();
	let pending = PendingBody {
		now,
		id: request.id,
		token,
		url: request.url,
		status: response.status,
		status_text: response.status_text,
		headers: response.headers,
		duration,
	};
	if render::is_textual(&content_type) {
		Effect::FetchBody(pending)
	} else {
		Effect::Emit(render_body(pending, BodyOutcome::Unavailable(render::binary_note(&content_type))))
	}
}

/// Final completion emissions once the body is known (or known to be absent).
pub fn render_body(pending: PendingBody, outcome: BodyOutcome) -> Vec<Emission> {
	let (body, body_note) = match outcome {
		BodyOutcome::Text(body) => (Some(body), None),
		BodyOutcome::Unavailable(note) => (None, Some(note)),
	};
	vec![
		Emission::network(render::completion_line(pending.now, pending.id, pending.status, &pending.url, pending.duration)),
		Emission::DetailCompleted {
			id: pending.id,
			response: ResponseMeta {
				status: pending.status,
				status_text: pending.status_text,
				headers: pending.headers,
				body,
				body_note,
				duration: pending.duration,
			},
		},
	]
}

pub fn on_failed(event: LoadingFailed, state: &mut CaptureState, now: DateTime<Utc>) -> Effect {
	if state.paused {
		return Effect::Skip;
	}
	let token = RequestToken::new(event.request_id);
	let Some(request) = state.correlator.finish(&token) else {
		return Effect::Emit(vec![Emission::network(render::unmatched_failure_line(now, &token, &event.error_text))]);
	};
	let duration = request.duration_ms(event.timestamp);
	Effect::Emit(vec![
		Emission::network(render::failure_line(now, request.id, &request.url, &event.error_text, duration)),
		Emission::DetailFailed {
			id: request.id,
			failed: FailureMeta {
				error_text: event.error_text,
				canceled: event.canceled,
				duration,
			},
		},
	])
}
