//! Session and tab lifecycle.
//!
//! The [`SessionManager`] owns the control channel for the whole session,
//! lists the observable tabs, and moves the capture engine between them.
//! Tabs belong to the browser: the manager only keeps the [`PageHandle`] of
//! the tab being observed, and that handle holds the connection weakly.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pagewatch_protocol::{CdpEvent, PageEvent, TargetInfo};
use pagewatch_runtime::{ControlChannel, EventStream, PageHandle};
use serde::Serialize;
use tracing::{debug, info, warn};

mod filter;
pub mod shutdown;

pub use shutdown::{ShutdownGuard, ShutdownMode, ShutdownTrigger};

use crate::capture::CaptureEngine;
use crate::error::{Result, WatchError};

/// Which tab to observe first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TabSelector {
	#[default]
	First,
	Index(usize),
	UrlContains(String),
}

/// A tab opened after the session started. Reported, never attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTabNotice {
	pub target_id: String,
	pub url: String,
	pub title: String,
	pub seen_at: DateTime<Utc>,
}

/// Tab changes the session loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
	Opened(NewTabNotice),
	/// The observed tab closed.
	ActiveClosed { target_id: String },
}

/// Tab entry as shown by `list-tabs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSummary {
	pub index: usize,
	pub target_id: String,
	pub title: String,
	pub url: String,
	pub active: bool,
}

pub struct SessionManager {
	channel: ControlChannel,
	target_events: EventStream,
	/// Result of the last [`SessionManager::list`]; `switch` indexes into it.
	listed: Vec<TargetInfo>,
	active: Option<(TargetInfo, PageHandle)>,
	known: HashSet<String>,
	notices: VecDeque<NewTabNotice>,
	notice_limit: usize,
}

impl SessionManager {
	/// Takes ownership of `channel`. Nothing is sent until [`SessionManager::discover`].
	pub fn new(channel: ControlChannel, notice_limit: usize) -> Self {
		let target_events = channel.target_events();
		Self {
			channel,
			target_events,
			listed: Vec::new(),
			active: None,
			known: HashSet::new(),
			notices: VecDeque::new(),
			notice_limit: notice_limit.max(1),
		}
	}

	/// Records the existing targets and turns on target discovery. A failure
	/// leaves the manager intact so [`SessionManager::shutdown`] can still run.
	pub async fn discover(&mut self) -> Result<()> {
		let existing = self.channel.targets().await?;
		self.channel.discover_targets().await?;
		self.known.extend(existing.iter().map(|t| t.target_id.clone()));
		debug!(target = "pagewatch.session", targets = existing.len(), "target discovery enabled");
		Ok(())
	}

	/// [`SessionManager::new`] followed by [`SessionManager::discover`].
	pub async fn start(channel: ControlChannel, notice_limit: usize) -> Result<Self> {
		let mut session = Self::new(channel, notice_limit);
		session.discover().await?;
		Ok(session)
	}

	pub fn channel(&self) -> &ControlChannel {
		&self.channel
	}

	/// Observable tabs in browser order. Remembered for [`SessionManager::switch`].
	pub async fn list(&mut self) -> Result<Vec<TabSummary>> {
		let raw = self.channel.targets().await?;
		for target in &raw {
			self.known.insert(target.target_id.clone());
		}
		self.listed = filter::user_pages(raw);
		let active = self.active_target_id();
		Ok(self
			.listed
			.iter()
			.enumerate()
			.map(|(index, t)| TabSummary {
				index,
				target_id: t.target_id.clone(),
				title: t.title.clone(),
				url: t.url.clone(),
				active: active == Some(t.target_id.as_str()),
			})
			.collect())
	}

	/// Lists the tabs and observes the one `selector` picks.
	pub async fn select_initial(&mut self, selector: &TabSelector, engine: &mut CaptureEngine) -> Result<TargetInfo> {
		let tabs = self.list().await?;
		if tabs.is_empty() {
			return Err(WatchError::NoPages);
		}
		let index = match selector {
			TabSelector::First => 0,
			TabSelector::Index(index) => *index,
			TabSelector::UrlContains(needle) => {
				filter::find_by_url(&self.listed, needle).ok_or_else(|| WatchError::NoMatchingTab(needle.clone()))?
			}
		};
		self.switch(index, engine).await
	}

	/// Moves capture to tab `index` of the last listing.
	///
	/// The engine is detached from the previous tab before the new tab is
	/// attached, so at no point are two tabs observed.
	pub async fn switch(&mut self, index: usize, engine: &mut CaptureEngine) -> Result<TargetInfo> {
		let target = self.listed.get(index).cloned().ok_or(WatchError::NoSuchTab {
			index,
			count: self.listed.len(),
		})?;

		engine.detach();
		self.release_active().await;

		let page = self.channel.attach(&target).await?;
		let events = page.events()?;
		page.enable_capture().await?;
		engine.attach(target.target_id.clone(), Arc::new(page.clone()), events);
		info!(target = "pagewatch.session", index, url = %target.url, "observing tab");
		self.active = Some((target.clone(), page));
		Ok(target)
	}

	/// Ends the browser session of the observed tab. Stale failures are expected
	/// when the tab already closed and are not reported.
	async fn release_active(&mut self) {
		let Some((target, page)) = self.active.take() else {
			return;
		};
		match page.detach().await {
			Ok(()) => debug!(target = "pagewatch.session", target_id = %target.target_id, "detached previous tab"),
			Err(err) if err.is_stale_context() || err.is_timeout() => {
				debug!(target = "pagewatch.session", target_id = %target.target_id, error = %err, "previous tab already gone")
			}
			Err(err) => warn!(target = "pagewatch.session", target_id = %target.target_id, error = %err, "detaching previous tab failed"),
		}
	}

	pub fn active(&self) -> Option<&TargetInfo> {
		self.active.as_ref().map(|(target, _)| target)
	}

	pub fn active_page(&self) -> Option<&PageHandle> {
		self.active.as_ref().map(|(_, page)| page)
	}

	fn active_target_id(&self) -> Option<&str> {
		self.active().map(|t| t.target_id.as_str())
	}

	/// Next browser-level event; `None` once the connection is gone. Cancel-safe.
	pub async fn next_target_event(&mut self) -> Option<CdpEvent> {
		self.target_events.recv().await
	}

	/// Folds a browser-level event into the tab state.
	pub fn on_target_event(&mut self, event: &CdpEvent, now: DateTime<Utc>) -> Option<TabEvent> {
		match PageEvent::from_event(event)? {
			Ok(PageEvent::TargetCreated(created)) => {
				let info = created.target_info;
				if !self.known.insert(info.target_id.clone()) || !info.is_page() {
					return None;
				}
				let notice = NewTabNotice {
					target_id: info.target_id,
					url: info.url,
					title: info.title,
					seen_at: now,
				};
				info!(target = "pagewatch.session", url = %notice.url, "new tab opened (not attached)");
				if self.notices.len() == self.notice_limit {
					self.notices.pop_front();
				}
				self.notices.push_back(notice.clone());
				Some(TabEvent::Opened(notice))
			}
			Ok(PageEvent::TargetDestroyed(destroyed)) => {
				self.known.remove(&destroyed.target_id);
				if self.active_target_id() != Some(destroyed.target_id.as_str()) {
					return None;
				}
				self.active = None;
				info!(target = "pagewatch.session", target_id = %destroyed.target_id, "observed tab closed");
				Some(TabEvent::ActiveClosed {
					target_id: destroyed.target_id,
				})
			}
			Ok(_) => None,
			Err(err) => {
				debug!(target = "pagewatch.session", method = %event.method, error = %err, "ignoring undecodable target event");
				None
			}
		}
	}

	/// New-tab notices, oldest first.
	pub fn notices(&self) -> impl Iterator<Item = &NewTabNotice> {
		self.notices.iter()
	}

	/// Detaches capture, optionally closes the browser, and releases the channel.
	pub async fn shutdown(mut self, engine: &mut CaptureEngine, close_browser: bool) {
		engine.detach();
		if close_browser {
			self.active = None;
			if let Err(err) = self.channel.close_browser().await {
				warn!(target = "pagewatch.session", error = %err, "closing the browser failed");
			}
		} else {
			self.release_active().await;
		}
		self.channel.close();
		info!(target = "pagewatch.session", close_browser, "control channel released");
	}
}
