/*
[INPUT]:  Symbol identifier (e.g., "BTCUSDT") and depth limit
[OUTPUT]: One full-depth snapshot printed to stdout
[POS]:    Examples - public snapshot query
[UPDATE]: When the snapshot endpoint changes
*/

use depthbook_adapter::*;

/// Example: fetch a depth snapshot (no authentication required)
#[tokio::main]
async fn main() {
    println!("=== Depth Snapshot Example ===\n");

    let client = match DepthClient::for_market(Market::Spot, ClientConfig::default()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return;
        }
    };

    let symbol = "BTCUSDT";
    println!("Fetching depth snapshot for {}...", symbol);
    match client.fetch_depth_snapshot(symbol, 20).await {
        Ok(snapshot) => {
            println!("✓ lastUpdateId: {}", snapshot.sequence);
            for level in snapshot.asks.iter().take(5).rev() {
                println!("  ask {:>14} {:>14}", level.price, level.quantity);
            }
            for level in snapshot.bids.iter().take(5) {
                println!("  bid {:>14} {:>14}", level.price, level.quantity);
            }
        }
        Err(e) => println!("✗ Error: {} (kind {:?})", e, e.kind()),
    }
}
