use pagewatch_protocol::CdpEvent;
use serde_json::json;

use super::*;

#[tokio::test]
async fn memory_pair_delivers_commands_in_order() {
	let (parts, mut peer) = memory_pair();

	for id in 1..=3u64 {
		parts.outgoing.send(json!({ "id": id, "method": format!("M.{id}"), "params": {} })).unwrap();
	}

	for id in 1..=3u64 {
		let cmd = peer.next_command().await.unwrap();
		assert_eq!(cmd.id, id);
		assert_eq!(cmd.method, format!("M.{id}"));
	}
	assert!(peer.try_next_command().is_none());
}

#[tokio::test]
async fn memory_peer_events_carry_session() {
	let (mut parts, peer) = memory_pair();

	peer.emit(CdpEvent::new("Network.loadingFinished", json!({ "requestId": "1" }), Some("S1")));
	peer.emit(CdpEvent::new("Target.targetCreated", json!({}), None));

	let scoped = parts.incoming.recv().await.unwrap();
	assert_eq!(scoped["sessionId"], "S1");
	let browser = parts.incoming.recv().await.unwrap();
	assert!(browser.get("sessionId").is_none());
}

#[tokio::test]
async fn dropping_peer_closes_incoming() {
	let (mut parts, peer) = memory_pair();
	peer.respond(1, json!({}));
	drop(peer);

	assert_eq!(parts.incoming.recv().await.unwrap()["id"], 1);
	assert!(parts.incoming.recv().await.is_none());
}

#[tokio::test]
async fn websocket_connect_to_closed_port_fails_fast() {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	let port = listener.local_addr().unwrap().port();
	drop(listener);

	let err = connect_websocket(&format!("ws://127.0.0.1:{port}/devtools/browser/x"), Duration::from_secs(2))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::ConnectionFailed { .. } | Error::HandshakeTimeout { .. }));
}
