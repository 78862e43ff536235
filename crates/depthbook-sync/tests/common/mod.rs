/*
[INPUT]:  Test scenarios for the replica hub
[OUTPUT]: Channel-backed fake transports, payload builders and wait helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for depthbook-sync tests

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use depthbook_adapter::{
    DepthError, DiffTransport, PriceLevel, Snapshot, SnapshotSource, StreamEvent, StreamHandle,
};
use depthbook_sync::{
    HubConfig, OrderBookView, RetryPolicy, Subscription, SubscriptionStatus, SyncError,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// Snapshot source answering each fetch with the next scripted result.
///
/// A fetch with nothing scripted waits until the test pushes a result.
pub struct ScriptedSnapshots {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Snapshot, DepthError>>>,
    calls: AtomicUsize,
}

impl ScriptedSnapshots {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<Snapshot, DepthError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(Self {
            rx: tokio::sync::Mutex::new(rx),
            calls: AtomicUsize::new(0),
        });
        (source, tx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshots {
    async fn fetch_snapshot(&self, _symbol: &str, _depth: u32) -> depthbook_adapter::Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(result) => result,
            None => Err(DepthError::Config("snapshot script closed".to_string())),
        }
    }
}

/// Snapshot source whose fetches never complete.
#[derive(Default)]
pub struct HangingSnapshots {
    calls: AtomicUsize,
}

impl HangingSnapshots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for HangingSnapshots {
    async fn fetch_snapshot(&self, _symbol: &str, _depth: u32) -> depthbook_adapter::Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Drive `next_view` until the subscription yields something other than a view.
pub async fn wait_for_outcome(
    subscription: &mut Subscription,
) -> Option<Result<Arc<OrderBookView>, SyncError>> {
    tokio::time::timeout(WAIT, async {
        loop {
            match subscription.next_view().await {
                Some(Ok(_)) => continue,
                other => return other,
            }
        }
    })
    .await
    .expect("outcome in time")
}

/// Diff transport whose streams are fed by the test.
#[derive(Default)]
pub struct ChannelTransport {
    streams: Mutex<Vec<(String, mpsc::Sender<StreamEvent>)>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sender of the `index`-th opened stream.
    pub fn stream(&self, index: usize) -> mpsc::Sender<StreamEvent> {
        self.streams.lock().expect("streams lock")[index].1.clone()
    }

    pub fn opened_symbols(&self) -> Vec<String> {
        self.streams
            .lock()
            .expect("streams lock")
            .iter()
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }
}

impl DiffTransport for ChannelTransport {
    fn open(&self, symbol: &str) -> depthbook_adapter::Result<StreamHandle> {
        let (tx, rx) = mpsc::channel(256);
        self.streams
            .lock()
            .expect("streams lock")
            .push((symbol.to_string(), tx));
        Ok(StreamHandle::from_receiver(rx))
    }
}

/// Hub config with millisecond backoff so retry paths run fast.
pub fn fast_hub_config(max_consecutive_failures: u32) -> HubConfig {
    HubConfig {
        snapshot_timeout: Duration::from_secs(30),
        retry: RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            max_consecutive_failures,
        },
        ..HubConfig::default()
    }
}

pub fn dec(raw: &str) -> Decimal {
    Decimal::from_str(raw).expect("decimal")
}

pub fn level(price: &str, quantity: &str) -> PriceLevel {
    PriceLevel::new(dec(price), dec(quantity))
}

pub fn snapshot(sequence: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Snapshot {
    Snapshot {
        symbol: "BTCUSDT".to_string(),
        bids: bids.iter().map(|(p, q)| level(p, q)).collect(),
        asks: asks.iter().map(|(p, q)| level(p, q)).collect(),
        sequence,
    }
}

/// Depth update text in the venue's stream format.
pub fn depth_update(first: u64, last: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> String {
    serde_json::json!({
        "e": "depthUpdate",
        "E": 1_700_000_000_000i64,
        "s": "BTCUSDT",
        "U": first,
        "u": last,
        "b": bids,
        "a": asks
    })
    .to_string()
}

pub async fn send_update(
    stream: &mpsc::Sender<StreamEvent>,
    first: u64,
    last: u64,
    bids: &[(&str, &str)],
    asks: &[(&str, &str)],
) {
    stream
        .send(StreamEvent::Message(depth_update(first, last, bids, asks)))
        .await
        .expect("stream open");
}

/// Wait for the first view matching `predicate`.
pub async fn wait_for_view<F>(subscription: &mut Subscription, predicate: F) -> Arc<OrderBookView>
where
    F: Fn(&OrderBookView) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match subscription.next_view().await {
                Some(Ok(view)) if predicate(&view) => return view,
                Some(Ok(_)) => continue,
                Some(Err(err)) => panic!("subscription failed: {err}"),
                None => panic!("subscription ended"),
            }
        }
    })
    .await
    .expect("view in time")
}

/// Wait until the subscription reports `status`.
pub async fn wait_for_status(subscription: &Subscription, status: SubscriptionStatus) {
    let mut updates = subscription.status_updates();
    tokio::time::timeout(WAIT, updates.wait_for(|current| *current == status))
        .await
        .expect("status in time")
        .expect("status channel open");
}

/// Poll `condition` until it holds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition in time");
}
