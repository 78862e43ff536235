/*
[INPUT]:  Venue selection and stream options
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - enums shared by REST, stream and replica layers
[UPDATE]: When adding venues, stream speeds or book sides
*/

use serde::{Deserialize, Serialize};

const SPOT_REST_BASE_URL: &str = "https://api.binance.com";
const SPOT_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443/ws";
const FUTURES_REST_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_STREAM_BASE_URL: &str = "wss://fstream.binance.com/ws";

/// Book side. Bids are sorted best (highest) first, asks best (lowest) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// Venue the replica is built against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    #[default]
    Spot,
    Futures,
}

impl Market {
    pub fn rest_base_url(self) -> &'static str {
        match self {
            Market::Spot => SPOT_REST_BASE_URL,
            Market::Futures => FUTURES_REST_BASE_URL,
        }
    }

    pub fn stream_base_url(self) -> &'static str {
        match self {
            Market::Spot => SPOT_STREAM_BASE_URL,
            Market::Futures => FUTURES_STREAM_BASE_URL,
        }
    }

    /// REST path of the full-depth snapshot endpoint.
    pub fn depth_path(self) -> &'static str {
        match self {
            Market::Spot => "/api/v3/depth",
            Market::Futures => "/fapi/v1/depth",
        }
    }

    /// Snapshot limits accepted by the venue, ascending.
    pub fn allowed_depth_limits(self) -> &'static [u32] {
        match self {
            Market::Spot => &[5, 10, 20, 50, 100, 500, 1000, 5000],
            Market::Futures => &[5, 10, 20, 50, 100, 500, 1000],
        }
    }

    /// Smallest allowed snapshot limit covering `wanted` levels.
    ///
    /// Falls back to the venue maximum when `wanted` exceeds every allowed value.
    pub fn snapshot_limit_for(self, wanted: u32) -> u32 {
        let limits = self.allowed_depth_limits();
        limits
            .iter()
            .copied()
            .find(|limit| *limit >= wanted)
            .unwrap_or(limits[limits.len() - 1])
    }
}

/// Push cadence of the diff stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamSpeed {
    #[default]
    #[serde(rename = "100ms")]
    Fast,
    #[serde(rename = "1000ms", alias = "1s")]
    Standard,
}

impl StreamSpeed {
    /// Stream name suffix, e.g. `btcusdt@depth@100ms`.
    pub fn stream_suffix(self) -> &'static str {
        match self {
            StreamSpeed::Fast => "@depth@100ms",
            StreamSpeed::Standard => "@depth",
        }
    }
}
