/*
[INPUT]:  HTTP client configuration and depth endpoints
[OUTPUT]: HTTP responses and typed snapshot results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod public;

pub use error::{DEFAULT_RATE_LIMIT_DELAY_SECS, DepthError, ErrorKind, Result};

pub use client::{ClientConfig, DepthClient};
