/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public depth adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod backoff;
pub mod http;
pub mod transport;
pub mod types;
pub mod ws;

pub use backoff::backoff_delay;

// Re-export commonly used types from http
pub use http::{ClientConfig, DepthClient, DepthError, ErrorKind, Result};

// Re-export transport seams
pub use transport::{DiffTransport, SnapshotSource, StreamEvent, StreamHandle};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{DepthWebSocket, StreamConfig, decode_diff};
