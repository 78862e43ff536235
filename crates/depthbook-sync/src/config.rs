/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed and validated replica configuration
[POS]:    Configuration layer - market, symbols, depth and retry setup
[UPDATE]: When adding new configuration options
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};

use depthbook_adapter::{ClientConfig, Market, StreamConfig, StreamSpeed};

use crate::error::SyncError;
use crate::hub::HubConfig;
use crate::reconcile::DEFAULT_MAX_BUFFERED_EVENTS;
use crate::resync::RetryPolicy;

/// Top-level configuration for the depth watcher
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Venue: "spot" or "futures"
    #[serde(default)]
    pub market: Market,
    /// Symbols to replicate (e.g. "BTCUSDT")
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Levels per side exposed in views
    #[serde(default = "default_depth")]
    pub depth: u32,
    /// Minimum levels requested in the REST snapshot
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: u32,
    /// Stream cadence: "100ms" or "1000ms"
    #[serde(default)]
    pub stream_speed: StreamSpeed,
    /// Override for the REST base URL (mirrors, test servers)
    #[serde(default)]
    pub rest_base_url: Option<String>,
    /// Override for the stream base URL
    #[serde(default)]
    pub ws_base_url: Option<String>,
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Snapshot refetch policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Stream reconnect policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_reconnects: default_max_reconnects(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_depth() -> u32 {
    20
}

fn default_snapshot_depth() -> u32 {
    100
}

fn default_snapshot_timeout_ms() -> u64 {
    10_000
}

fn default_max_buffered_events() -> usize {
    DEFAULT_MAX_BUFFERED_EVENTS
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_consecutive_failures() -> u32 {
    8
}

fn default_max_reconnects() -> u32 {
    10
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            market: Market::default(),
            symbols: Vec::new(),
            depth: default_depth(),
            snapshot_depth: default_snapshot_depth(),
            stream_speed: StreamSpeed::default(),
            rest_base_url: None,
            ws_base_url: None,
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            max_buffered_events: default_max_buffered_events(),
            retry: RetryConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.symbols.is_empty() {
            return Err(SyncError::Config("at least one symbol is required".to_string()));
        }
        if let Some(symbol) = self.symbols.iter().find(|symbol| symbol.trim().is_empty()) {
            return Err(SyncError::Config(format!("invalid symbol {symbol:?}")));
        }
        if self.depth == 0 {
            return Err(SyncError::Config("depth must be at least 1".to_string()));
        }
        if self.snapshot_timeout_ms == 0 || self.transport.request_timeout_ms == 0 {
            return Err(SyncError::Config("timeouts must be positive".to_string()));
        }
        if self.max_buffered_events == 0 {
            return Err(SyncError::Config("max_buffered_events must be positive".to_string()));
        }
        if self.retry.max_consecutive_failures == 0 {
            return Err(SyncError::Config(
                "retry.max_consecutive_failures must be positive".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(SyncError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rest_base_url(&self) -> &str {
        self.rest_base_url
            .as_deref()
            .unwrap_or_else(|| self.market.rest_base_url())
    }

    pub fn ws_base_url(&self) -> &str {
        self.ws_base_url
            .as_deref()
            .unwrap_or_else(|| self.market.stream_base_url())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            max_consecutive_failures: self.retry.max_consecutive_failures,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.transport.request_timeout_ms),
            ..ClientConfig::default()
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            max_reconnects: self.transport.max_reconnects,
            ..StreamConfig::default()
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            market: self.market,
            snapshot_depth: self.snapshot_depth,
            snapshot_timeout: Duration::from_millis(self.snapshot_timeout_ms),
            max_buffered_events: self.max_buffered_events,
            retry: self.retry_policy(),
        }
    }
}
