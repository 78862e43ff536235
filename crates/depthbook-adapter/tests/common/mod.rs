/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for depthbook-adapter tests

#![allow(dead_code)]

use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wiremock::MockServer;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Depth snapshot body in the venue's REST format
pub fn snapshot_body(last_update_id: u64) -> serde_json::Value {
    serde_json::json!({
        "lastUpdateId": last_update_id,
        "bids": [["50000.00", "1.0"]],
        "asks": [["50010.00", "2.0"]]
    })
}

/// Depth update text in the venue's stream format
pub fn depth_update(first: u64, last: u64) -> String {
    serde_json::json!({
        "e": "depthUpdate",
        "E": 1_700_000_000_000i64,
        "s": "BTCUSDT",
        "U": first,
        "u": last,
        "b": [["49990.00", "0.5"]],
        "a": []
    })
    .to_string()
}

/// Local WebSocket server. Each accepted connection receives the batch of
/// messages sent on the returned channel, then is closed by the server.
pub async fn spawn_ws_server() -> (String, mpsc::UnboundedSender<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Vec<String>>();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                continue;
            };
            let Some(batch) = batch_rx.recv().await else {
                break;
            };
            for text in batch {
                if ws.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws.close(None).await;
        }
    });

    (format!("ws://{addr}/ws"), batch_tx)
}
