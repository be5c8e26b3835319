//! Reachability checks shared by the bridges and the handshaker.

use std::time::Duration;

use pagewatch_protocol::VersionInfo;
use tokio::net::TcpStream;

use super::Endpoint;

/// Per-request timeout for `/json/version`.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(400);

pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
	reqwest::Client::builder().timeout(timeout).no_proxy().build()
}

/// Fetches `/json/version` from `endpoint`.
pub async fn fetch_version(client: &reqwest::Client, endpoint: &Endpoint) -> Result<VersionInfo, String> {
	let response = client.get(endpoint.version_url()).send().await.map_err(|e| e.to_string())?;
	if !response.status().is_success() {
		return Err(format!("unexpected status {}", response.status()));
	}
	response.json::<VersionInfo>().await.map_err(|e| format!("invalid /json/version payload: {e}"))
}

/// Whether a TCP connection to `host:port` succeeds within `timeout`.
pub async fn tcp_open(host: &str, port: u16, timeout: Duration) -> bool {
	matches!(tokio::time::timeout(timeout, TcpStream::connect((host, port))).await, Ok(Ok(_)))
}
