//! Capture → dump → status, through the public API and an in-memory browser.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pagewatch_cli::buffer::{self, CaptureBuffers, DumpOptions};
use pagewatch_cli::capture::{CaptureEngine, CaptureOutput, CaptureSettings, PageOps};
use pagewatch_cli::config::SnapshotToggles;
use pagewatch_protocol::CdpEvent;
use pagewatch_runtime::{Connection, EventFilter, memory_pair};
use serde_json::{Value, json};
use tempfile::TempDir;

struct Bodies(HashMap<String, String>);

#[async_trait]
impl PageOps for Bodies {
	async fn resolve_value(&self, _object_id: &str) -> pagewatch_runtime::Result<Value> {
		Ok(Value::Null)
	}

	async fn response_body(&self, request_id: &str) -> pagewatch_runtime::Result<String> {
		Ok(self.0.get(request_id).cloned().unwrap_or_default())
	}
}

fn event(method: &str, params: Value) -> CdpEvent {
	CdpEvent::new(method, params, Some("S1"))
}

fn page_events() -> Vec<CdpEvent> {
	vec![
		event("Runtime.consoleAPICalled", json!({ "type": "log", "args": [{ "type": "string", "value": "booted" }] })),
		event(
			"Network.requestWillBeSent",
			json!({ "requestId": "r1", "timestamp": 10.0, "type": "Fetch", "request": { "url": "https://a/x.json", "method": "GET", "headers": {} } }),
		),
		event(
			"Network.responseReceived",
			json!({ "requestId": "r1", "timestamp": 10.01, "response": { "url": "https://a/x.json", "status": 200, "statusText": "OK", "headers": { "content-type": "application/json" }, "mimeType": "application/json" } }),
		),
		event("Network.loadingFinished", json!({ "requestId": "r1", "timestamp": 10.02 })),
		event(
			"Network.requestWillBeSent",
			json!({ "requestId": "r2", "timestamp": 10.03, "request": { "url": "https://a/pending", "method": "POST", "headers": {}, "postData": "q=1" } }),
		),
		event("Runtime.consoleAPICalled", json!({ "type": "clear", "args": [] })),
		event("Runtime.consoleAPICalled", json!({ "type": "warning", "args": [{ "type": "string", "value": "after clear" }] })),
	]
}

#[tokio::test]
async fn captured_session_dumps_and_resets() {
	let (parts, peer) = memory_pair();
	let connection = Connection::open(parts);
	let mut engine = CaptureEngine::new(CaptureSettings::default());
	let page = Bodies(HashMap::from([("r1".to_string(), r#"{"k":1}"#.to_string())]));
	engine.attach("T1", Arc::new(page), connection.subscribe(EventFilter::Session("S1".into())));

	let events = page_events();
	for event in &events {
		peer.emit(event.clone());
	}

	let mut buffers = CaptureBuffers::new();
	let mut applied = 0;
	while buffers.stats().console < 2 || buffers.stats().network < 3 {
		match engine.next().await.unwrap() {
			CaptureOutput::Emissions(emissions) => {
				for emission in &emissions {
					buffers.apply(emission);
				}
				applied += 1;
			}
			CaptureOutput::PageClosed { .. } => panic!("page closed early"),
		}
	}
	assert!(applied >= 5);

	let stats = buffers.stats();
	assert_eq!(stats.requests, 2);
	assert_eq!(stats.pending_requests, 1);
	let console: Vec<_> = buffers.console_lines().collect();
	assert!(console[0].ends_with("--- console cleared ---"));
	assert!(console[1].ends_with("[warn] after clear"));

	let dir = TempDir::new().unwrap();
	let options = DumpOptions {
		page: None,
		toggles: SnapshotToggles::default(),
		dom_limit: 1024,
	};
	let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
	let report = buffer::dump(&mut buffers, dir.path(), options, now).await;
	assert!(report.is_complete(), "{:?}", report.artifacts);
	assert_eq!(report.counts.requests, 2);

	let network = std::fs::read_to_string(dir.path().join("network.log")).unwrap();
	let lines: Vec<_> = network.lines().collect();
	assert_eq!(lines.len(), 3);
	assert!(lines[0].contains(" → 1 GET https://a/x.json"));
	assert!(lines[1].contains(" ← 1 200 https://a/x.json (20ms)"));
	assert!(lines[2].contains(" → 2 POST https://a/pending"));

	let completed: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join("requests/1.json")).unwrap()).unwrap();
	assert_eq!(completed["response"]["status"], 200);
	assert_eq!(completed["response"]["body"], r#"{"k":1}"#);
	assert_eq!(completed["resourceType"], "Fetch");

	let pending: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join("requests/2.json")).unwrap()).unwrap();
	assert_eq!(pending["request"]["postData"], "q=1");
	assert!(pending.get("response").is_none() && pending.get("failed").is_none());

	let after = buffers.stats();
	assert_eq!((after.console, after.network, after.requests), (0, 0, 0));

	connection.close();
	assert!(matches!(engine.next().await.unwrap(), CaptureOutput::PageClosed { .. }));
	assert_eq!(engine.active_attachments(), 0);
}
