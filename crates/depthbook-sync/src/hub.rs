/*
[INPUT]:  Snapshot source + diff transport, per-symbol subscriptions
[OUTPUT]: Latest-per-subscription book views via `watch` + status notifications
[POS]:    Sync layer - single-writer replica workers and the subscription API
[UPDATE]: When changing subscription lifecycle, resync triggers or shutdown semantics
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use depthbook_adapter::{
    DepthError, DiffTransport, Market, Snapshot, SnapshotSource, StreamEvent, StreamHandle,
    decode_diff,
};

use crate::book::{OrderBookStore, OrderBookView};
use crate::error::SyncError;
use crate::metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::reconcile::{DEFAULT_MAX_BUFFERED_EVENTS, ReconciliationBuffer, Step, SyncState};
use crate::resync::{Resynchronizer, RetryDecision, RetryPolicy};

pub type SubscriptionId = u64;

/// Lifecycle of one subscription as seen by its reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Stream opened, first snapshot requested.
    Connecting,
    /// Events are being held until the snapshot lands.
    Buffering,
    /// Views reflect a confirmed-consistent book.
    Live,
    /// Continuity lost; refetching. `attempt` counts consecutive failures.
    Resyncing { attempt: u32 },
    /// Terminal. The reader must resubscribe.
    Failed { reason: String, attempts: u32 },
    /// Unsubscribed or hub shut down.
    Closed,
}

impl SubscriptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Failed { .. } | SubscriptionStatus::Closed)
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub market: Market,
    /// Minimum snapshot levels; the effective limit also covers the view depth.
    pub snapshot_depth: u32,
    pub snapshot_timeout: Duration,
    pub max_buffered_events: usize,
    pub retry: RetryPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            market: Market::Spot,
            snapshot_depth: 100,
            snapshot_timeout: Duration::from_secs(10),
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Reader side of one subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    symbol: String,
    views: watch::Receiver<Arc<OrderBookView>>,
    status: watch::Receiver<SubscriptionStatus>,
    metrics: Arc<SyncMetrics>,
    finished: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Last published view; never blocks.
    pub fn latest(&self) -> Arc<OrderBookView> {
        self.views.borrow().clone()
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Independent receiver for fan-out to other readers.
    pub fn views(&self) -> watch::Receiver<Arc<OrderBookView>> {
        self.views.clone()
    }

    pub fn status_updates(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wait for the next published view.
    ///
    /// Returns `Some(Err(FatalResyncFailure))` once when the subscription
    /// fails, and `None` after it has ended.
    pub async fn next_view(&mut self) -> Option<Result<Arc<OrderBookView>, SyncError>> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(outcome) = self.terminal_outcome() {
                self.finished = true;
                return outcome;
            }

            tokio::select! {
                biased;
                changed = self.status.changed() => {
                    if changed.is_err() {
                        self.finished = true;
                        return self.terminal_outcome().flatten();
                    }
                }
                changed = self.views.changed() => {
                    if changed.is_err() {
                        self.finished = true;
                        return self.terminal_outcome().flatten();
                    }
                    return Some(Ok(self.views.borrow_and_update().clone()));
                }
            }
        }
    }

    fn terminal_outcome(&self) -> Option<Option<Result<Arc<OrderBookView>, SyncError>>> {
        match &*self.status.borrow() {
            SubscriptionStatus::Failed { reason, attempts } => {
                Some(Some(Err(SyncError::FatalResyncFailure {
                    attempts: *attempts,
                    last_error: reason.clone(),
                })))
            }
            SubscriptionStatus::Closed => Some(None),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct WorkerHandle {
    symbol: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one replica worker per subscription.
///
/// Each worker is the only writer of its book; readers get immutable views.
pub struct OrderBookHub {
    config: HubConfig,
    snapshots: Arc<dyn SnapshotSource>,
    transport: Arc<dyn DiffTransport>,
    workers: HashMap<SubscriptionId, WorkerHandle>,
    next_id: SubscriptionId,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for OrderBookHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookHub")
            .field("config", &self.config)
            .field("subscriptions", &self.workers.len())
            .finish()
    }
}

impl OrderBookHub {
    pub fn new(
        config: HubConfig,
        snapshots: Arc<dyn SnapshotSource>,
        transport: Arc<dyn DiffTransport>,
    ) -> Self {
        Self {
            config,
            snapshots,
            transport,
            workers: HashMap::new(),
            next_id: 1,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start replicating `symbol`; views carry the best `depth` levels per side.
    pub fn subscribe(&mut self, symbol: &str, depth: usize) -> Result<Subscription, SyncError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(SyncError::Config("symbol must not be empty".to_string()));
        }
        if depth == 0 {
            return Err(SyncError::Config("depth must be at least 1".to_string()));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(SyncError::Config(
                "OrderBookHub::subscribe requires a Tokio runtime".to_string(),
            ));
        }

        let wanted = u32::try_from(depth).unwrap_or(u32::MAX).max(self.config.snapshot_depth);
        let snapshot_limit = self.config.market.snapshot_limit_for(wanted);
        let stream = self.transport.open(&symbol)?;

        let id = self.next_id;
        self.next_id += 1;

        let (views_tx, views_rx) = watch::channel(Arc::new(OrderBookView::empty(&symbol)));
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
        let metrics = Arc::new(SyncMetrics::default());
        let cancel = self.shutdown.child_token();

        let worker = SyncWorker::new(
            WorkerSetup {
                symbol: symbol.clone(),
                view_depth: depth,
                snapshot_limit,
                snapshot_timeout: self.config.snapshot_timeout,
                max_buffered_events: self.config.max_buffered_events,
                retry: self.config.retry.clone(),
            },
            self.snapshots.clone(),
            stream,
            views_tx,
            status_tx,
            metrics.clone(),
            cancel.clone(),
        );

        info!(id, %symbol, depth, snapshot_limit, "subscribing order book");
        let task = tokio::spawn(worker.run());
        self.workers.insert(
            id,
            WorkerHandle {
                symbol: symbol.clone(),
                cancel,
                task,
            },
        );

        Ok(Subscription {
            id,
            symbol,
            views: views_rx,
            status: status_rx,
            metrics,
            finished: false,
        })
    }

    /// Tear down one subscription: closes its stream and discards its book.
    ///
    /// Returns `false` for an unknown id.
    pub async fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(handle) = self.workers.remove(&id) else {
            return false;
        };
        handle.cancel.cancel();
        if let Err(err) = handle.task.await
            && !err.is_cancelled()
        {
            warn!(id, symbol = %handle.symbol, error = %err, "sync worker ended abnormally");
        }
        info!(id, symbol = %handle.symbol, "unsubscribed order book");
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.workers.len()
    }

    /// Trigger a graceful shutdown of every worker.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn shutdown_and_wait(&mut self) {
        self.shutdown();
        for (id, handle) in self.workers.drain() {
            if let Err(err) = handle.task.await
                && !err.is_cancelled()
            {
                warn!(id, symbol = %handle.symbol, error = %err, "sync worker ended abnormally");
            }
        }
    }
}

impl Drop for OrderBookHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerSetup {
    symbol: String,
    view_depth: usize,
    snapshot_limit: u32,
    snapshot_timeout: Duration,
    max_buffered_events: usize,
    retry: RetryPolicy,
}

#[derive(Debug)]
struct SnapshotOutcome {
    generation: u64,
    result: Result<Snapshot, SyncError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Cancelled,
    Failed,
}

/// Single writer for one symbol's book.
struct SyncWorker {
    symbol: String,
    view_depth: usize,
    snapshot_limit: u32,
    snapshot_timeout: Duration,
    snapshots: Arc<dyn SnapshotSource>,
    stream: StreamHandle,
    store: OrderBookStore,
    buffer: ReconciliationBuffer,
    resync: Resynchronizer,
    views: watch::Sender<Arc<OrderBookView>>,
    status: watch::Sender<SubscriptionStatus>,
    metrics: Arc<SyncMetrics>,
    cancel: CancellationToken,
    generation: u64,
    snapshot_tx: mpsc::Sender<SnapshotOutcome>,
    snapshot_rx: mpsc::Receiver<SnapshotOutcome>,
    fetch_task: Option<JoinHandle<()>>,
}

impl SyncWorker {
    fn new(
        setup: WorkerSetup,
        snapshots: Arc<dyn SnapshotSource>,
        stream: StreamHandle,
        views: watch::Sender<Arc<OrderBookView>>,
        status: watch::Sender<SubscriptionStatus>,
        metrics: Arc<SyncMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(4);
        Self {
            store: OrderBookStore::new(&setup.symbol, setup.snapshot_limit as usize),
            buffer: ReconciliationBuffer::new(setup.max_buffered_events),
            resync: Resynchronizer::new(setup.retry),
            symbol: setup.symbol,
            view_depth: setup.view_depth,
            snapshot_limit: setup.snapshot_limit,
            snapshot_timeout: setup.snapshot_timeout,
            snapshots,
            stream,
            views,
            status,
            metrics,
            cancel,
            generation: 0,
            snapshot_tx,
            snapshot_rx,
            fetch_task: None,
        }
    }

    async fn run(mut self) {
        self.request_snapshot(Duration::ZERO);

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(symbol = %self.symbol, "sync worker cancelled");
                    break WorkerExit::Cancelled;
                }
                Some(outcome) = self.snapshot_rx.recv() => {
                    if let Some(exit) = self.handle_snapshot(outcome) {
                        break exit;
                    }
                }
                event = self.stream.recv() => {
                    let exit = match event {
                        Some(event) => self.handle_stream_event(event),
                        None => Some(self.fail(SyncError::Transport(DepthError::WebSocket(
                            "diff stream ended".to_string(),
                        )))),
                    };
                    if let Some(exit) = exit {
                        break exit;
                    }
                }
            }
        };

        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        self.stream.close();
        self.store.reset();
        if exit == WorkerExit::Cancelled {
            self.set_status(SubscriptionStatus::Closed);
        }
        debug!(symbol = %self.symbol, ?exit, "sync worker stopped");
    }

    fn handle_stream_event(&mut self, event: StreamEvent) -> Option<WorkerExit> {
        match event {
            StreamEvent::Connected => {
                debug!(symbol = %self.symbol, "diff stream connected");
                None
            }
            StreamEvent::Message(raw) => {
                let event = match decode_diff(&raw) {
                    Ok(event) => event,
                    Err(_) => {
                        self.metrics.record_malformed();
                        return None;
                    }
                };
                if !event.symbol.is_empty() && event.symbol != self.symbol {
                    debug!(symbol = %self.symbol, event_symbol = %event.symbol, "dropping event for another symbol");
                    return None;
                }
                let step = self.buffer.on_diff(event, &mut self.store);
                self.handle_step(step)
            }
            StreamEvent::Disconnected { reason } => {
                warn!(symbol = %self.symbol, %reason, "diff stream disconnected; view is stale");
                self.publish_stale();
                None
            }
            StreamEvent::Reconnected { attempts } => {
                warn!(symbol = %self.symbol, attempts, "diff stream reconnected; resyncing");
                self.metrics.record_resync();
                self.buffer.force_resync();
                self.buffer.restart();
                self.publish_stale();
                self.set_status(SubscriptionStatus::Resyncing {
                    attempt: self.resync.consecutive_failures(),
                });
                self.request_snapshot(Duration::ZERO);
                None
            }
            StreamEvent::Closed { reason } => Some(self.fail(SyncError::Transport(
                DepthError::WebSocket(format!("diff stream closed: {reason}")),
            ))),
        }
    }

    fn handle_snapshot(&mut self, outcome: SnapshotOutcome) -> Option<WorkerExit> {
        if outcome.generation != self.generation {
            debug!(
                symbol = %self.symbol,
                generation = outcome.generation,
                current = self.generation,
                "ignoring superseded snapshot"
            );
            return None;
        }
        self.fetch_task = None;

        match outcome.result {
            Ok(snapshot) => {
                debug!(symbol = %self.symbol, sequence = snapshot.sequence, buffered = self.buffer.buffered(), "snapshot received");
                let step = self.buffer.on_snapshot(&snapshot, &mut self.store);
                self.handle_step(step)
            }
            Err(err) => {
                self.metrics.record_snapshot_failure();
                warn!(symbol = %self.symbol, error = %err, "snapshot fetch failed");
                self.schedule_refetch(err)
            }
        }
    }

    fn handle_step(&mut self, step: Step) -> Option<WorkerExit> {
        match step {
            Step::Buffered => {
                self.metrics.record_buffered();
                if self.buffer.state() == SyncState::Buffering
                    && *self.status.borrow() == SubscriptionStatus::Connecting
                {
                    self.set_status(SubscriptionStatus::Buffering);
                }
                None
            }
            Step::Applied { count } => {
                self.metrics.record_applied(count);
                if self.buffer.is_synced() && *self.status.borrow() != SubscriptionStatus::Live {
                    self.resync.on_success();
                    info!(symbol = %self.symbol, sequence = self.store.sequence(), replayed = count, "order book live");
                    self.set_status(SubscriptionStatus::Live);
                }
                self.publish();
                None
            }
            Step::Dropped => {
                self.metrics.record_stale_dropped();
                None
            }
            Step::Gap(err) => {
                self.metrics.record_gap();
                self.metrics.record_resync();
                warn!(symbol = %self.symbol, error = %err, "sequence gap; resyncing");
                self.publish_stale();
                self.schedule_refetch(err)
            }
            Step::StaleSnapshot(err) => {
                warn!(symbol = %self.symbol, error = %err, "snapshot too old for buffered events; refetching");
                self.schedule_refetch(err)
            }
        }
    }

    fn schedule_refetch(&mut self, err: SyncError) -> Option<WorkerExit> {
        match self.resync.on_failure(&err) {
            RetryDecision::Retry { attempt, delay } => {
                debug!(symbol = %self.symbol, attempt, ?delay, "scheduling snapshot refetch");
                self.buffer.restart();
                self.set_status(SubscriptionStatus::Resyncing { attempt });
                self.request_snapshot(delay);
                None
            }
            RetryDecision::GiveUp(fatal) => Some(self.fail(fatal)),
        }
    }

    fn request_snapshot(&mut self, delay: Duration) {
        self.generation += 1;
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }

        let generation = self.generation;
        let snapshots = self.snapshots.clone();
        let symbol = self.symbol.clone();
        let limit = self.snapshot_limit;
        let timeout = self.snapshot_timeout;
        let tx = self.snapshot_tx.clone();

        self.fetch_task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = match tokio::time::timeout(timeout, snapshots.fetch_snapshot(&symbol, limit)).await {
                Ok(Ok(snapshot)) => Ok(snapshot),
                Ok(Err(err)) => Err(SyncError::from(err)),
                Err(_) => Err(SyncError::from(DepthError::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                })),
            };
            let _ = tx.send(SnapshotOutcome { generation, result }).await;
        }));
    }

    fn fail(&mut self, err: SyncError) -> WorkerExit {
        let attempts = match &err {
            SyncError::FatalResyncFailure { attempts, .. } => *attempts,
            _ => self.resync.consecutive_failures(),
        };
        let reason = match err {
            SyncError::FatalResyncFailure { last_error, .. } => last_error,
            other => other.to_string(),
        };
        error!(symbol = %self.symbol, attempts, %reason, "order book subscription failed");
        self.publish_stale();
        self.set_status(SubscriptionStatus::Failed { reason, attempts });
        WorkerExit::Failed
    }

    fn publish(&self) {
        let stale = !self.buffer.is_synced();
        self.views
            .send_replace(Arc::new(self.store.view(self.view_depth, stale)));
    }

    /// Re-publish the last view flagged stale, keeping its contents.
    fn publish_stale(&self) {
        self.views.send_if_modified(|view| {
            if view.stale {
                return false;
            }
            *view = Arc::new(view.marked_stale());
            true
        });
    }

    fn set_status(&self, status: SubscriptionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription_for_test() -> (
        Subscription,
        watch::Sender<Arc<OrderBookView>>,
        watch::Sender<SubscriptionStatus>,
    ) {
        let (views_tx, views_rx) = watch::channel(Arc::new(OrderBookView::empty("BTCUSDT")));
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
        let subscription = Subscription {
            id: 1,
            symbol: "BTCUSDT".to_string(),
            views: views_rx,
            status: status_rx,
            metrics: Arc::new(SyncMetrics::default()),
            finished: false,
        };
        (subscription, views_tx, status_tx)
    }

    #[tokio::test]
    async fn next_view_returns_latest_published() {
        let (mut subscription, views_tx, _status_tx) = subscription_for_test();

        let mut view = OrderBookView::empty("BTCUSDT");
        view.sequence = 42;
        view.stale = false;
        views_tx.send_replace(Arc::new(view.clone()));

        let next = subscription.next_view().await.expect("view").expect("ok");
        assert_eq!(*next, view);
        assert_eq!(subscription.latest().sequence, 42);
    }

    #[tokio::test]
    async fn next_view_surfaces_failure_once() {
        let (mut subscription, _views_tx, status_tx) = subscription_for_test();

        status_tx.send_replace(SubscriptionStatus::Failed {
            reason: "snapshot unavailable".to_string(),
            attempts: 3,
        });

        match subscription.next_view().await {
            Some(Err(SyncError::FatalResyncFailure { attempts, last_error })) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "snapshot unavailable");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(subscription.next_view().await.is_none());
    }

    #[tokio::test]
    async fn next_view_ends_when_worker_drops_senders() {
        let (mut subscription, views_tx, status_tx) = subscription_for_test();
        status_tx.send_replace(SubscriptionStatus::Closed);
        drop(views_tx);
        drop(status_tx);
        assert!(subscription.next_view().await.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(SubscriptionStatus::Closed.is_terminal());
        assert!(
            SubscriptionStatus::Failed {
                reason: String::new(),
                attempts: 1
            }
            .is_terminal()
        );
        assert!(!SubscriptionStatus::Resyncing { attempt: 2 }.is_terminal());
    }
}
