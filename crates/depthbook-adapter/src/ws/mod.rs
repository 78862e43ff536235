/*
[INPUT]:  Stream configuration and per-symbol subscriptions
[OUTPUT]: Raw diff messages and decoded diff events
[POS]:    WebSocket layer - real-time depth streams
[UPDATE]: When adding new streams or changing connection logic
*/

pub mod client;
pub mod message;

pub use client::{DepthWebSocket, StreamConfig};
pub use message::decode_diff;
