/*
[INPUT]:  Snapshots and per-side level change sets (already sequenced)
[OUTPUT]: Sorted bid/ask ladders with cumulative depth; immutable views
[POS]:    Replica layer - authoritative in-memory order book (single writer)
[UPDATE]: When changing ladder layout, retention or view fields
*/

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::trace;

use depthbook_adapter::{DiffEvent, PriceLevel, Side, Snapshot};

/// One stored level. `cumulative` is the sum of quantities at or better than `price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub cumulative: Decimal,
}

/// One side of the book, best price at index 0.
///
/// Bids descend, asks ascend. Prices are unique and every stored quantity is
/// positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    side: Side,
    levels: Vec<BookLevel>,
}

impl Ladder {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: Vec::new(),
        }
    }

    pub fn levels(&self) -> &[BookLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn best(&self) -> Option<&BookLevel> {
        self.levels.first()
    }

    /// Sum of all stored quantities.
    pub fn total(&self) -> Decimal {
        self.levels
            .last()
            .map(|level| level.cumulative)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn quantity_at(&self, price: Decimal) -> Option<Decimal> {
        self.search(price)
            .ok()
            .map(|index| self.levels[index].quantity)
    }

    /// Apply a change set: zero removes, positive inserts or replaces.
    ///
    /// Cumulative values are recomputed once, from the lowest touched index.
    /// Returns that index, or `None` when nothing changed.
    pub fn apply_changes(&mut self, changes: &[PriceLevel]) -> Option<usize> {
        let mut dirty_from: Option<usize> = None;

        for change in changes {
            let touched = match self.search(change.price) {
                Ok(index) if change.is_removal() => {
                    self.levels.remove(index);
                    Some(index)
                }
                Ok(index) => {
                    if self.levels[index].quantity == change.quantity {
                        None
                    } else {
                        self.levels[index].quantity = change.quantity;
                        Some(index)
                    }
                }
                Err(_) if change.is_removal() => None,
                Err(index) => {
                    self.levels.insert(
                        index,
                        BookLevel {
                            price: change.price,
                            quantity: change.quantity,
                            cumulative: Decimal::ZERO,
                        },
                    );
                    Some(index)
                }
            };

            if let Some(index) = touched {
                dirty_from = Some(dirty_from.map_or(index, |current| current.min(index)));
            }
        }

        if let Some(start) = dirty_from {
            self.recompute_cumulative_from(start);
        }
        dirty_from
    }

    /// Keep only the best `max_levels`. Retained cumulative values are unaffected.
    pub fn truncate(&mut self, max_levels: usize) {
        self.levels.truncate(max_levels);
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Invariants: strict ordering, positive quantities, running-sum cumulative.
    pub fn is_consistent(&self) -> bool {
        let mut running = Decimal::ZERO;
        for (index, level) in self.levels.iter().enumerate() {
            if level.quantity <= Decimal::ZERO {
                return false;
            }
            if index > 0 && self.compare(&self.levels[index - 1].price, &level.price) != Ordering::Less {
                return false;
            }
            running += level.quantity;
            if level.cumulative != running {
                return false;
            }
        }
        true
    }

    fn search(&self, price: Decimal) -> Result<usize, usize> {
        self.levels
            .binary_search_by(|level| self.compare(&level.price, &price))
    }

    /// Ordering of `a` relative to `b` in ladder order (`Less` = closer to best).
    fn compare(&self, a: &Decimal, b: &Decimal) -> Ordering {
        match self.side {
            Side::Bid => b.cmp(a),
            Side::Ask => a.cmp(b),
        }
    }

    fn recompute_cumulative_from(&mut self, start: usize) {
        let mut running = match start {
            0 => Decimal::ZERO,
            _ => self.levels[start - 1].cumulative,
        };
        for level in &mut self.levels[start..] {
            running += level.quantity;
            level.cumulative = running;
        }
    }
}

/// Authoritative replica for one symbol.
///
/// Owned by exactly one writer. Readers receive [`OrderBookView`] copies.
#[derive(Debug, Clone)]
pub struct OrderBookStore {
    symbol: String,
    bids: Ladder,
    asks: Ladder,
    sequence: u64,
    max_levels: usize,
    seeded: bool,
    updated_at: Option<DateTime<Utc>>,
}

impl OrderBookStore {
    pub fn new(symbol: impl Into<String>, max_levels: usize) -> Self {
        Self {
            symbol: symbol.into(),
            bids: Ladder::new(Side::Bid),
            asks: Ladder::new(Side::Ask),
            sequence: 0,
            max_levels: max_levels.max(1),
            seeded: false,
            updated_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Last applied update id (the snapshot's id until an event lands).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Whether a snapshot has been applied since creation or the last reset.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn ladder(&self, side: Side) -> &Ladder {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn ladder_mut(&mut self, side: Side) -> &mut Ladder {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Replace both ladders with the snapshot's levels.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        for side in [Side::Bid, Side::Ask] {
            let max_levels = self.max_levels;
            let ladder = self.ladder_mut(side);
            ladder.clear();
            ladder.apply_changes(snapshot.levels(side));
            ladder.truncate(max_levels);
        }
        self.sequence = snapshot.sequence;
        self.seeded = true;
        self.updated_at = Some(Utc::now());
        debug_assert!(self.is_consistent());
    }

    /// Apply one side's change set and trim to the retention depth.
    ///
    /// Does not touch `sequence`; see [`OrderBookStore::apply_event`].
    pub fn apply_level_changes(&mut self, side: Side, changes: &[PriceLevel]) {
        let max_levels = self.max_levels;
        let ladder = self.ladder_mut(side);
        let dirty = ladder.apply_changes(changes);
        ladder.truncate(max_levels);
        trace!(side = side.as_str(), changes = changes.len(), ?dirty, "level changes applied");
    }

    /// Apply both sides of an event, then advance `sequence` to its final id.
    pub fn apply_event(&mut self, event: &DiffEvent) {
        debug_assert!(event.final_update_id >= self.sequence);
        for side in [Side::Bid, Side::Ask] {
            self.apply_level_changes(side, event.changes(side));
        }
        self.sequence = event.final_update_id;
        self.updated_at = event.event_time.or_else(|| Some(Utc::now()));
        debug_assert!(self.is_consistent());
    }

    /// Drop all state; the next snapshot seeds from scratch.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.sequence = 0;
        self.seeded = false;
        self.updated_at = None;
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.best().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.best().map(|level| level.price)
    }

    /// `best_ask - best_bid`, when both sides are present.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// `spread / best_ask * 100`.
    pub fn spread_percent(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let best_ask = self.best_ask()?;
        spread
            .checked_div(best_ask)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
    }

    pub fn is_consistent(&self) -> bool {
        self.bids.is_consistent()
            && self.asks.is_consistent()
            && self.bids.len() <= self.max_levels
            && self.asks.len() <= self.max_levels
    }

    /// Copy out the best `top_n` levels per side.
    pub fn view(&self, top_n: usize, stale: bool) -> OrderBookView {
        OrderBookView {
            symbol: self.symbol.clone(),
            bids: view_levels(&self.bids, top_n),
            asks: view_levels(&self.asks, top_n),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread: self.spread(),
            spread_percent: self.spread_percent(),
            sequence: self.sequence,
            stale,
            updated_at: self.updated_at,
        }
    }
}

fn view_levels(ladder: &Ladder, top_n: usize) -> Vec<ViewLevel> {
    ladder
        .levels()
        .iter()
        .take(top_n)
        .map(|level| ViewLevel {
            price: level.price,
            amount: level.quantity,
            cumulative: level.cumulative,
        })
        .collect()
}

/// Row of a published view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewLevel {
    pub price: Decimal,
    pub amount: Decimal,
    pub cumulative: Decimal,
}

impl ViewLevel {
    /// Share of `total` reached at this row, in percent (depth bar width).
    pub fn depth_percent(&self, total: Decimal) -> Decimal {
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.cumulative
            .checked_div(total)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Immutable, versioned copy of the book handed to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBookView {
    pub symbol: String,
    pub bids: Vec<ViewLevel>,
    pub asks: Vec<ViewLevel>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub spread_percent: Option<Decimal>,
    pub sequence: u64,
    /// Set while no confirmed-consistent state backs this view.
    pub stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderBookView {
    /// Placeholder published before the first snapshot lands.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            best_bid: None,
            best_ask: None,
            spread: None,
            spread_percent: None,
            sequence: 0,
            stale: true,
            updated_at: None,
        }
    }

    pub fn levels(&self, side: Side) -> &[ViewLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Cumulative amount at the deepest shown bid.
    pub fn bid_total(&self) -> Decimal {
        self.bids.last().map(|level| level.cumulative).unwrap_or(Decimal::ZERO)
    }

    /// Cumulative amount at the deepest shown ask.
    pub fn ask_total(&self) -> Decimal {
        self.asks.last().map(|level| level.cumulative).unwrap_or(Decimal::ZERO)
    }

    pub fn marked_stale(&self) -> Self {
        Self {
            stale: true,
            ..self.clone()
        }
    }
}

const QUOTE_ASSETS: [&str; 7] = ["FDUSD", "USDT", "USDC", "BUSD", "BTC", "ETH", "BNB"];

/// Base asset label for a symbol, e.g. `BTCUSDT` -> `BTC`.
///
/// Unknown quotes (or a symbol that is only a quote) return the symbol unchanged.
pub fn base_asset(symbol: &str) -> &str {
    QUOTE_ASSETS
        .iter()
        .find_map(|quote| {
            symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
        })
        .unwrap_or(symbol)
}
