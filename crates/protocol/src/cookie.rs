//! Cookies as returned by `Network.getCookies`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
	Strict,
	Lax,
	None,
}

/// A browser cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
	pub name: String,
	pub value: String,
	pub domain: String,
	#[serde(default)]
	pub path: String,
	/// Unix timestamp in seconds (-1 means session cookie).
	#[serde(default)]
	pub expires: f64,
	#[serde(default)]
	pub http_only: bool,
	#[serde(default)]
	pub secure: bool,
	#[serde(default)]
	pub session: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub same_site: Option<SameSite>,
}

/// `Network.getCookies` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CookieList {
	#[serde(default)]
	pub cookies: Vec<Cookie>,
}

impl CookieList {
	/// Groups cookies by domain with the leading dot stripped, preserving browser order within a domain.
	pub fn by_domain(self) -> BTreeMap<String, Vec<Cookie>> {
		let mut grouped: BTreeMap<String, Vec<Cookie>> = BTreeMap::new();
		for cookie in self.cookies {
			let domain = cookie.domain.trim_start_matches('.').to_string();
			grouped.entry(domain).or_default().push(cookie);
		}
		grouped
	}
}
