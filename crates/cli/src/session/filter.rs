use pagewatch_protocol::TargetInfo;
use tracing::debug;

/// URL prefixes of browser-internal pages nobody wants to observe.
const INTERNAL_SCHEMES: &[&str] = &["chrome://", "chrome-untrusted://", "devtools://", "chrome-extension://", "edge://", "brave://"];

/// Whether `target` is a tab a user opened.
pub(crate) fn is_user_page(target: &TargetInfo) -> bool {
	if !target.is_page() {
		return false;
	}
	let url = target.url.to_ascii_lowercase();
	if INTERNAL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
		return false;
	}
	!url.starts_with("about:") || url == "about:blank"
}

/// User pages in browser order.
///
/// Falls back to every page-typed target (then to the raw list) when the filter
/// would leave nothing from a non-empty list.
pub(crate) fn user_pages(raw: Vec<TargetInfo>) -> Vec<TargetInfo> {
	if raw.iter().any(is_user_page) {
		return raw.into_iter().filter(is_user_page).collect();
	}
	if raw.iter().any(TargetInfo::is_page) {
		debug!(target = "pagewatch.session", "only internal pages open, listing them anyway");
		return raw.into_iter().filter(TargetInfo::is_page).collect();
	}
	if !raw.is_empty() {
		debug!(target = "pagewatch.session", count = raw.len(), "no page targets, listing raw targets");
	}
	raw
}

/// Index of the first target whose URL contains `needle`, case-insensitively.
pub(crate) fn find_by_url(targets: &[TargetInfo], needle: &str) -> Option<usize> {
	let needle = needle.to_lowercase();
	targets.iter().position(|t| t.url.to_lowercase().contains(&needle))
}
