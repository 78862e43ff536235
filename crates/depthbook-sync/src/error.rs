/*
[INPUT]:  Adapter errors and reconciliation failures
[OUTPUT]: SyncError taxonomy surfaced by the replica
[POS]:    Error handling layer - replica-level failures
[UPDATE]: When adding new failure modes to reconciliation or the hub
*/

use std::time::Duration;

use thiserror::Error;

use depthbook_adapter::{DepthError, ErrorKind};

#[derive(Error, Debug)]
pub enum SyncError {
    /// Snapshot fetch or stream failure (network, rate limit, malformed payload)
    #[error("transport error: {0}")]
    Transport(#[from] DepthError),

    /// A diff event does not continue from the expected update id
    #[error(
        "sequence gap: expected update {expected}, got {first_update_id}..={final_update_id}"
    )]
    SequenceGap {
        expected: u64,
        first_update_id: u64,
        final_update_id: u64,
    },

    /// No buffered event bridges the snapshot into the stream
    #[error("snapshot {snapshot_sequence} is stale relative to buffered update {first_buffered}")]
    StaleSnapshot {
        snapshot_sequence: u64,
        first_buffered: u64,
    },

    /// Retry budget exhausted; the subscription is dead
    #[error("resync failed after {attempts} attempts: {last_error}")]
    FatalResyncFailure { attempts: u32, last_error: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Server-mandated wait carried by a rate-limited transport error.
    pub fn server_delay(&self) -> Option<Duration> {
        match self {
            SyncError::Transport(err) => err.retry_delay().map(Duration::from_secs),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::Transport(err) if err.kind() == ErrorKind::RateLimited)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::FatalResyncFailure { .. } | SyncError::Config(_))
    }

    /// Whether another snapshot fetch could clear this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(err) => err.is_retryable(),
            other => !other.is_fatal(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
