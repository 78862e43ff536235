/*
[INPUT]:  Decoded diff events and snapshots, in arrival order
[OUTPUT]: Gap-free event application against the store; gap / stale-snapshot signals
[POS]:    Replica layer - snapshot/stream reconciliation state machine
[UPDATE]: When changing buffering, bridging or continuity rules
*/

use std::collections::VecDeque;

use tracing::{debug, warn};

use depthbook_adapter::{DiffEvent, Snapshot};

use crate::book::OrderBookStore;
use crate::error::SyncError;

pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No snapshot requested results yet and nothing buffered.
    AwaitingSnapshot,
    /// Holding events until a compatible snapshot arrives.
    Buffering,
    /// Store is consistent; events apply directly.
    Synced,
    /// Continuity broke; waiting for a fresh snapshot request.
    Resyncing,
}

/// Outcome of feeding one input to the buffer.
#[derive(Debug)]
pub enum Step {
    /// Event held until a snapshot lands.
    Buffered,
    /// `count` events reached the store.
    Applied { count: usize },
    /// Event already represented in the store.
    Dropped,
    /// Continuity broke. Buffer cleared, state is `Resyncing`.
    Gap(SyncError),
    /// Snapshot discarded; a newer one is needed. Buffer kept.
    StaleSnapshot(SyncError),
}

impl Step {
    pub fn applied(&self) -> usize {
        match self {
            Step::Applied { count } => *count,
            _ => 0,
        }
    }

    pub fn needs_snapshot(&self) -> bool {
        matches!(self, Step::Gap(_) | Step::StaleSnapshot(_))
    }
}

/// Holds diff events until a compatible snapshot is available, then hands a
/// strictly continuous sequence to the store.
#[derive(Debug)]
pub struct ReconciliationBuffer {
    state: SyncState,
    pending: VecDeque<DiffEvent>,
    max_buffered: usize,
    evicted: u64,
}

impl Default for ReconciliationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED_EVENTS)
    }
}

impl ReconciliationBuffer {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            state: SyncState::AwaitingSnapshot,
            pending: VecDeque::new(),
            max_buffered: max_buffered.max(1),
            evicted: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Events dropped from the front because the buffer was full.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Feed one decoded event.
    pub fn on_diff(&mut self, event: DiffEvent, store: &mut OrderBookStore) -> Step {
        match self.state {
            SyncState::AwaitingSnapshot | SyncState::Buffering | SyncState::Resyncing => {
                self.push(event);
                if self.state == SyncState::AwaitingSnapshot {
                    self.state = SyncState::Buffering;
                }
                Step::Buffered
            }
            SyncState::Synced => {
                let sequence = store.sequence();
                if event.final_update_id <= sequence {
                    debug!(
                        symbol = %store.symbol(),
                        sequence,
                        final_update_id = event.final_update_id,
                        "dropping already-applied event"
                    );
                    return Step::Dropped;
                }
                if event.covers(sequence + 1) {
                    store.apply_event(&event);
                    return Step::Applied { count: 1 };
                }
                self.enter_resync();
                Step::Gap(SyncError::SequenceGap {
                    expected: sequence + 1,
                    first_update_id: event.first_update_id,
                    final_update_id: event.final_update_id,
                })
            }
        }
    }

    /// Feed a freshly fetched snapshot.
    ///
    /// On success the store is reseeded, the bridging event and every
    /// continuous follower are applied, and the state becomes `Synced`.
    pub fn on_snapshot(&mut self, snapshot: &Snapshot, store: &mut OrderBookStore) -> Step {
        if self.state == SyncState::Synced {
            debug!(
                symbol = %store.symbol(),
                snapshot_sequence = snapshot.sequence,
                "ignoring snapshot while synced"
            );
            return Step::Dropped;
        }

        let last = snapshot.sequence;
        self.pending.retain(|event| event.final_update_id > last);

        if self.pending.is_empty() {
            store.reset();
            store.apply_snapshot(snapshot);
            self.state = SyncState::Synced;
            return Step::Applied { count: 0 };
        }

        let Some(bridge) = self.pending.iter().position(|event| event.covers(last + 1)) else {
            let first_buffered = self
                .pending
                .front()
                .map(|event| event.first_update_id)
                .unwrap_or_default();
            return Step::StaleSnapshot(SyncError::StaleSnapshot {
                snapshot_sequence: last,
                first_buffered,
            });
        };

        if bridge > 0 {
            debug!(
                symbol = %store.symbol(),
                skipped = bridge,
                "skipping buffered events ahead of the bridging event"
            );
        }

        let mut replay: VecDeque<DiffEvent> = self.pending.drain(..).skip(bridge).collect();
        store.reset();
        store.apply_snapshot(snapshot);

        let mut applied = 0usize;
        while let Some(event) = replay.pop_front() {
            if applied > 0 && event.first_update_id != store.sequence() + 1 {
                let expected = store.sequence() + 1;
                self.enter_resync();
                return Step::Gap(SyncError::SequenceGap {
                    expected,
                    first_update_id: event.first_update_id,
                    final_update_id: event.final_update_id,
                });
            }
            store.apply_event(&event);
            applied += 1;
        }

        self.state = SyncState::Synced;
        Step::Applied { count: applied }
    }

    /// Drop everything and wait for a new snapshot (e.g. after a reconnect).
    pub fn force_resync(&mut self) {
        self.enter_resync();
    }

    /// A new snapshot request has been issued; resume buffering.
    pub fn restart(&mut self) {
        self.state = if self.pending.is_empty() {
            SyncState::AwaitingSnapshot
        } else {
            SyncState::Buffering
        };
    }

    fn enter_resync(&mut self) {
        self.pending.clear();
        self.state = SyncState::Resyncing;
    }

    fn push(&mut self, event: DiffEvent) {
        if self.pending.len() >= self.max_buffered {
            self.pending.pop_front();
            self.evicted += 1;
            if self.evicted == 1 || self.evicted % 1_000 == 0 {
                warn!(
                    symbol = %event.symbol,
                    max_buffered = self.max_buffered,
                    evicted = self.evicted,
                    "reconciliation buffer full; evicting oldest event"
                );
            }
        }
        self.pending.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthbook_adapter::{PriceLevel, Side};
    use rust_decimal::Decimal;

    fn lvl(price: i64, quantity: i64) -> PriceLevel {
        PriceLevel::new(Decimal::from(price), Decimal::from(quantity))
    }

    fn event(first: u64, last: u64, bids: Vec<PriceLevel>) -> DiffEvent {
        DiffEvent {
            symbol: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            previous_final_update_id: None,
            event_time: None,
            bid_changes: bids,
            ask_changes: Vec::new(),
        }
    }

    fn snapshot(sequence: u64) -> Snapshot {
        Snapshot {
            symbol: "BTCUSDT".to_string(),
            bids: vec![lvl(100, 1)],
            asks: vec![lvl(101, 1)],
            sequence,
        }
    }

    fn store() -> OrderBookStore {
        OrderBookStore::new("BTCUSDT", 100)
    }

    #[test]
    fn events_before_snapshot_are_buffered() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();
        assert_eq!(buffer.state(), SyncState::AwaitingSnapshot);

        assert!(matches!(buffer.on_diff(event(1, 2, vec![]), &mut store), Step::Buffered));
        assert_eq!(buffer.state(), SyncState::Buffering);
        assert_eq!(buffer.buffered(), 1);
        assert!(!store.is_seeded());
    }

    #[test]
    fn snapshot_bridges_into_buffered_events() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();

        buffer.on_diff(event(45, 49, vec![lvl(90, 9)]), &mut store);
        buffer.on_diff(event(50, 52, vec![lvl(99, 2)]), &mut store);
        buffer.on_diff(event(53, 55, vec![lvl(98, 3)]), &mut store);

        let step = buffer.on_snapshot(&snapshot(50), &mut store);
        assert_eq!(step.applied(), 2);
        assert_eq!(buffer.state(), SyncState::Synced);
        assert_eq!(store.sequence(), 55);
        assert_eq!(store.ladder(Side::Bid).quantity_at(Decimal::from(90)), None);

        let mut direct = self::store();
        direct.apply_snapshot(&snapshot(50));
        direct.apply_event(&event(50, 52, vec![lvl(99, 2)]));
        direct.apply_event(&event(53, 55, vec![lvl(98, 3)]));
        assert_eq!(store.view(100, false), direct.view(100, false));
    }

    #[test]
    fn snapshot_newer_than_all_buffered_events_syncs_empty() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();
        buffer.on_diff(event(1, 10, vec![]), &mut store);

        let step = buffer.on_snapshot(&snapshot(20), &mut store);
        assert!(matches!(step, Step::Applied { count: 0 }));
        assert!(buffer.is_synced());
        assert_eq!(store.sequence(), 20);
    }

    #[test]
    fn stale_snapshot_is_rejected_and_buffer_kept() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();
        buffer.on_diff(event(60, 62, vec![]), &mut store);

        let step = buffer.on_snapshot(&snapshot(50), &mut store);
        match step {
            Step::StaleSnapshot(SyncError::StaleSnapshot {
                snapshot_sequence,
                first_buffered,
            }) => {
                assert_eq!(snapshot_sequence, 50);
                assert_eq!(first_buffered, 60);
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(buffer.buffered(), 1);
        assert!(!store.is_seeded());

        let step = buffer.on_snapshot(&snapshot(61), &mut store);
        assert_eq!(step.applied(), 1);
        assert_eq!(store.sequence(), 62);
    }

    #[test]
    fn replay_continuity_break_enters_resync() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();
        buffer.on_diff(event(10, 12, vec![]), &mut store);
        buffer.on_diff(event(14, 15, vec![]), &mut store);

        let step = buffer.on_snapshot(&snapshot(10), &mut store);
        match step {
            Step::Gap(SyncError::SequenceGap { expected, first_update_id, .. }) => {
                assert_eq!(expected, 13);
                assert_eq!(first_update_id, 14);
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(buffer.state(), SyncState::Resyncing);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn synced_gap_resyncs_once_without_applying() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();
        buffer.on_snapshot(&snapshot(100), &mut store);

        let before = store.view(10, false);
        let step = buffer.on_diff(event(103, 105, vec![lvl(50, 1)]), &mut store);
        assert!(step.needs_snapshot());
        assert_eq!(buffer.state(), SyncState::Resyncing);
        assert_eq!(store.view(10, false), before);

        assert!(matches!(
            buffer.on_diff(event(106, 107, vec![]), &mut store),
            Step::Buffered
        ));
        assert_eq!(buffer.state(), SyncState::Resyncing);
        buffer.restart();
        assert_eq!(buffer.state(), SyncState::Buffering);
    }

    #[test]
    fn synced_applies_overlapping_and_drops_old() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();
        buffer.on_snapshot(&snapshot(100), &mut store);

        assert!(matches!(buffer.on_diff(event(90, 100, vec![]), &mut store), Step::Dropped));
        assert_eq!(buffer.on_diff(event(99, 103, vec![]), &mut store).applied(), 1);
        assert_eq!(store.sequence(), 103);
        assert_eq!(buffer.on_diff(event(104, 104, vec![]), &mut store).applied(), 1);
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let mut buffer = ReconciliationBuffer::new(2);
        let mut store = store();
        buffer.on_diff(event(1, 1, vec![]), &mut store);
        buffer.on_diff(event(2, 2, vec![]), &mut store);
        buffer.on_diff(event(3, 3, vec![]), &mut store);
        assert_eq!(buffer.buffered(), 2);
        assert_eq!(buffer.evicted(), 1);

        let step = buffer.on_snapshot(&snapshot(0), &mut store);
        assert!(matches!(step, Step::StaleSnapshot(_)));
    }

    #[test]
    fn force_resync_clears_state() {
        let mut buffer = ReconciliationBuffer::default();
        let mut store = store();
        buffer.on_snapshot(&snapshot(5), &mut store);
        buffer.force_resync();
        assert_eq!(buffer.state(), SyncState::Resyncing);
        buffer.restart();
        assert_eq!(buffer.state(), SyncState::AwaitingSnapshot);
    }
}
