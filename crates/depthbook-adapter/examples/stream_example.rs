/*
[INPUT]:  Symbol identifier and stream speed
[OUTPUT]: Decoded diff events printed for a few seconds
[POS]:    Examples - WebSocket stream handling
[UPDATE]: When the stream transport API changes
*/

use depthbook_adapter::*;
use tokio::time::{Duration, sleep};

/// Example: read raw diffs and decode them
#[tokio::main]
async fn main() {
    println!("=== Depth Stream Example ===\n");

    let ws = DepthWebSocket::new(Market::Spot, StreamSpeed::Fast);
    println!("Opening {}", ws.stream_url("BTCUSDT"));

    let mut handle = match ws.open("BTCUSDT") {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to open stream: {}", e);
            return;
        }
    };

    let deadline = sleep(Duration::from_secs(5));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = handle.recv() => match event {
                Some(StreamEvent::Message(raw)) => match decode_diff(&raw) {
                    Ok(diff) => println!(
                        "U={} u={} bids={} asks={}",
                        diff.first_update_id,
                        diff.final_update_id,
                        diff.bid_changes.len(),
                        diff.ask_changes.len()
                    ),
                    Err(e) => println!("✗ dropped: {}", e),
                },
                Some(other) => println!("transport: {:?}", other),
                None => break,
            },
        }
    }

    println!("\n✓ Stream example complete");
}
