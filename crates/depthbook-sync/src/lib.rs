/*
[INPUT]:  Public API exports for depthbook-sync crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod book;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod reconcile;
pub mod resync;

// Re-export main types for convenience
pub use book::{BookLevel, Ladder, OrderBookStore, OrderBookView, ViewLevel, base_asset};
pub use config::SyncConfig;
pub use error::SyncError;
pub use hub::{HubConfig, OrderBookHub, Subscription, SubscriptionId, SubscriptionStatus};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use reconcile::{ReconciliationBuffer, Step, SyncState};
pub use resync::{Resynchronizer, RetryDecision, RetryPolicy};
