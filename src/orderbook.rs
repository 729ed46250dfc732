//! Order book engine - snapshot-plus-diff sync with integrity verification

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::core::{Error, PriceLevel, Symbol, now_ms};
use crate::valr_api::model::{BookDiff, BookSnapshot, WireLevel};

/// Levels covered by the integrity checksum, per side.
pub const CHECKSUM_DEPTH: usize = 25;

/// Sync status of one instrument's book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    SnapshotPending,
    Synced,
    Resyncing,
}

/// In-memory L2 book for a single instrument.
/// Bids iterate highest-first, asks lowest-first. Quantity zero removes a level.
pub struct InstrumentBook {
    pub symbol: Symbol,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    pub sequence: u64,
    pub checksum: u32,
    pub updated_at: u64,
}

impl InstrumentBook {
    fn from_snapshot(symbol: Symbol, snap: &BookSnapshot) -> Self {
        let mut book = Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence: snap.sequence,
            checksum: 0,
            updated_at: now_ms(),
        };
        apply_levels(&mut book.bids, &snap.bids);
        apply_levels(&mut book.asks, &snap.asks);
        book.checksum = book.compute_checksum();
        book
    }

    fn apply_diff(&mut self, diff: &BookDiff) {
        apply_levels(&mut self.bids, &diff.bids);
        apply_levels(&mut self.asks, &diff.asks);
        self.sequence = diff.sequence;
        self.checksum = self.compute_checksum();
        self.updated_at = now_ms();
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.iter().next_back().map(|(p, q)| PriceLevel { price: *p, quantity: *q })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, q)| PriceLevel { price: *p, quantity: *q })
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Top-of-book view: bids highest-first, asks lowest-first.
    pub fn levels(&self, depth: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(p, q)| PriceLevel { price: *p, quantity: *q })
            .collect();
        let asks = self
            .asks
            .iter()
            .take(depth)
            .map(|(p, q)| PriceLevel { price: *p, quantity: *q })
            .collect();
        (bids, asks)
    }

    /// Integrity checksum: lower 32 bits of SHA-256 over the canonical
    /// top-25 string, bids highest-first then asks lowest-first, each level
    /// rendered `price:quantity` with trailing zeros stripped.
    pub fn compute_checksum(&self) -> u32 {
        let mut canonical = String::new();
        for (p, q) in self.bids.iter().rev().take(CHECKSUM_DEPTH) {
            canonical.push_str(&format!("{}:{}|", p.normalize(), q.normalize()));
        }
        for (p, q) in self.asks.iter().take(CHECKSUM_DEPTH) {
            canonical.push_str(&format!("{}:{}|", p.normalize(), q.normalize()));
        }
        let digest = Sha256::digest(canonical.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

fn apply_levels(side: &mut BTreeMap<Decimal, Decimal>, levels: &[WireLevel]) {
    for level in levels {
        if level.quantity.is_zero() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.quantity);
        }
    }
}

/// Read-only book view handed to the strategy layer.
#[derive(Debug, Clone)]
pub struct BookView {
    pub symbol: Symbol,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub sequence: u64,
    pub updated_at: u64,
}

/// Per-instrument book state machine.
///
/// A diff only applies at `sequence == book.sequence + 1`. Stale or duplicate
/// diffs are dropped silently - expected under at-least-once delivery. A gap
/// or checksum mismatch discards the book and requests a fresh snapshot: a
/// brief resync window beats fabricating state across a gap.
pub struct BookEngine {
    state: HashMap<Symbol, SyncState>,
    books: HashMap<Symbol, InstrumentBook>,
}

impl BookEngine {
    pub fn new() -> Self {
        Self {
            state: HashMap::new(),
            books: HashMap::new(),
        }
    }

    pub fn sync_state(&self, symbol: &Symbol) -> SyncState {
        self.state.get(symbol).copied().unwrap_or(SyncState::Uninitialized)
    }

    pub fn book(&self, symbol: &Symbol) -> Option<&InstrumentBook> {
        self.books.get(symbol)
    }

    pub fn view(&self, symbol: &Symbol, depth: usize) -> Option<BookView> {
        let book = self.books.get(symbol)?;
        let (bids, asks) = book.levels(depth);
        Some(BookView {
            symbol: symbol.clone(),
            bids,
            asks,
            sequence: book.sequence,
            updated_at: book.updated_at,
        })
    }

    /// Seed (or re-seed) an instrument's book from a snapshot.
    pub fn on_snapshot(&mut self, symbol: &Symbol, snap: &BookSnapshot) {
        let book = InstrumentBook::from_snapshot(symbol.clone(), snap);
        info!("{} book synced at sequence {}", symbol, book.sequence);
        self.books.insert(symbol.clone(), book);
        self.state.insert(symbol.clone(), SyncState::Synced);
    }

    /// Apply one diff. Returns the symbol when a fresh snapshot must be
    /// requested (first sighting, sequence gap, or checksum mismatch).
    pub fn on_diff(&mut self, symbol: &Symbol, diff: &BookDiff) -> Option<Symbol> {
        match self.sync_state(symbol) {
            SyncState::Uninitialized => {
                // First diff for an instrument with no book: ask for a snapshot.
                self.state.insert(symbol.clone(), SyncState::SnapshotPending);
                Some(symbol.clone())
            }
            SyncState::SnapshotPending | SyncState::Resyncing => {
                // Snapshot in flight; diffs before it seed are useless.
                debug!("{} diff {} dropped while awaiting snapshot", symbol, diff.sequence);
                None
            }
            SyncState::Synced => {
                let book = self.books.get_mut(symbol).expect("synced book exists");

                if diff.sequence <= book.sequence {
                    // Duplicate or stale - expected under at-least-once delivery.
                    debug!("{} stale diff {} <= {}", symbol, diff.sequence, book.sequence);
                    return None;
                }

                if diff.sequence != book.sequence + 1 {
                    let gap = Error::SequenceGap {
                        pair: symbol.to_string(),
                        current: book.sequence,
                        received: diff.sequence,
                    };
                    warn!("{} - resyncing", gap);
                    return self.start_resync(symbol);
                }

                book.apply_diff(diff);

                if let Some(venue_checksum) = diff.checksum {
                    if venue_checksum != book.checksum {
                        warn!(
                            "{} checksum mismatch at sequence {} (venue {:08x}, local {:08x}) - resyncing",
                            symbol, book.sequence, venue_checksum, book.checksum
                        );
                        return self.start_resync(symbol);
                    }
                }

                None
            }
        }
    }

    /// Instrument delisted or session torn down.
    pub fn drop_instrument(&mut self, symbol: &Symbol) {
        self.books.remove(symbol);
        self.state.remove(symbol);
    }

    fn start_resync(&mut self, symbol: &Symbol) -> Option<Symbol> {
        self.books.remove(symbol);
        self.state.insert(symbol.clone(), SyncState::Resyncing);
        Some(symbol.clone())
    }
}

impl Default for BookEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn sym() -> Symbol {
        Symbol::new("BTC-ZAR")
    }

    fn level(price: i64, qty: &str) -> WireLevel {
        WireLevel {
            price: Decimal::from(price),
            quantity: qty.parse().unwrap(),
            order_count: None,
        }
    }

    fn snapshot(seq: u64) -> BookSnapshot {
        BookSnapshot {
            bids: vec![level(100, "1.0"), level(99, "2.0")],
            asks: vec![level(101, "1.5"), level(102, "3.0")],
            sequence: seq,
        }
    }

    fn diff(seq: u64, bids: Vec<WireLevel>, asks: Vec<WireLevel>) -> BookDiff {
        BookDiff {
            bids,
            asks,
            sequence: seq,
            checksum: None,
        }
    }

    fn synced_engine() -> BookEngine {
        let mut engine = BookEngine::new();
        engine.on_snapshot(&sym(), &snapshot(100));
        engine
    }

    #[test]
    fn test_first_diff_requests_snapshot() {
        let mut engine = BookEngine::new();
        let request = engine.on_diff(&sym(), &diff(5, vec![], vec![]));
        assert_eq!(request, Some(sym()));
        assert_eq!(engine.sync_state(&sym()), SyncState::SnapshotPending);
        // While pending, further diffs are dropped without a second request.
        assert_eq!(engine.on_diff(&sym(), &diff(6, vec![], vec![])), None);
    }

    #[test]
    fn test_sequential_diff_applies() {
        let mut engine = synced_engine();
        let request = engine.on_diff(&sym(), &diff(101, vec![level(100, "0.5")], vec![]));
        assert_eq!(request, None);
        let book = engine.book(&sym()).unwrap();
        assert_eq!(book.sequence, 101);
        assert_eq!(book.best_bid().unwrap().quantity.to_string(), "0.5");
    }

    #[test]
    fn test_zero_quantity_removes_level() {
        let mut engine = synced_engine();
        engine.on_diff(&sym(), &diff(101, vec![level(100, "0")], vec![]));
        let book = engine.book(&sym()).unwrap();
        assert_eq!(book.best_bid().unwrap().price, Decimal::from(99));
    }

    #[test]
    fn test_duplicate_or_stale_diff_is_noop() {
        let mut engine = synced_engine();
        let before = engine.book(&sym()).unwrap().checksum;
        assert_eq!(engine.on_diff(&sym(), &diff(100, vec![level(100, "9")], vec![])), None);
        assert_eq!(engine.on_diff(&sym(), &diff(50, vec![level(100, "9")], vec![])), None);
        let book = engine.book(&sym()).unwrap();
        assert_eq!(book.sequence, 100);
        assert_eq!(book.checksum, before);
        assert_eq!(book.best_bid().unwrap().quantity.to_string(), "1.0");
    }

    #[test]
    fn test_gap_forces_resync_and_ignores_stale_diffs() {
        let mut engine = synced_engine();
        // Book at 100; diff 102 arrives.
        let request = engine.on_diff(&sym(), &diff(102, vec![], vec![]));
        assert_eq!(request, Some(sym()));
        assert_eq!(engine.sync_state(&sym()), SyncState::Resyncing);
        assert!(engine.book(&sym()).is_none());

        // Stale diffs received before the fresh snapshot are ignored.
        assert_eq!(engine.on_diff(&sym(), &diff(99, vec![], vec![])), None);

        // Fresh snapshot resets the sequence.
        engine.on_snapshot(&sym(), &snapshot(200));
        assert_eq!(engine.sync_state(&sym()), SyncState::Synced);
        assert_eq!(engine.book(&sym()).unwrap().sequence, 200);
    }

    #[test]
    fn test_batch_vs_incremental_determinism() {
        // Applying diffs one by one must equal applying their union.
        let mut incremental = synced_engine();
        incremental.on_diff(&sym(), &diff(101, vec![level(100, "0.7")], vec![]));
        incremental.on_diff(&sym(), &diff(102, vec![level(98, "4.0")], vec![level(101, "0")]));
        incremental.on_diff(&sym(), &diff(103, vec![], vec![level(103, "2.2")]));

        let mut batch = synced_engine();
        batch.on_diff(
            &sym(),
            &diff(
                101,
                vec![level(100, "0.7"), level(98, "4.0")],
                vec![level(101, "0"), level(103, "2.2")],
            ),
        );

        let a = incremental.book(&sym()).unwrap();
        let b = batch.book(&sym()).unwrap();
        assert_eq!(a.levels(10), b.levels(10));
        assert_eq!(a.compute_checksum(), b.compute_checksum());
    }

    #[test]
    fn test_checksum_mismatch_forces_resync() {
        let mut engine = synced_engine();
        let bad = BookDiff {
            bids: vec![level(100, "0.5")],
            asks: vec![],
            sequence: 101,
            checksum: Some(0xDEAD_BEEF),
        };
        let request = engine.on_diff(&sym(), &bad);
        assert_eq!(request, Some(sym()));
        assert_eq!(engine.sync_state(&sym()), SyncState::Resyncing);
    }

    #[test]
    fn test_matching_checksum_keeps_book_synced() {
        let mut engine = synced_engine();

        // Compute the expected checksum by replaying the same diff elsewhere.
        let mut shadow = synced_engine();
        shadow.on_diff(&sym(), &diff(101, vec![level(100, "0.5")], vec![]));
        let expected = shadow.book(&sym()).unwrap().checksum;

        let good = BookDiff {
            bids: vec![level(100, "0.5")],
            asks: vec![],
            sequence: 101,
            checksum: Some(expected),
        };
        assert_eq!(engine.on_diff(&sym(), &good), None);
        assert_eq!(engine.sync_state(&sym()), SyncState::Synced);
    }

    #[test]
    fn test_level_ordering() {
        let engine = synced_engine();
        let (bids, asks) = engine.book(&sym()).unwrap().levels(10);
        assert!(bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(asks.windows(2).all(|w| w[0].price < w[1].price));
    }

    #[test]
    fn test_drop_instrument() {
        let mut engine = synced_engine();
        engine.drop_instrument(&sym());
        assert_eq!(engine.sync_state(&sym()), SyncState::Uninitialized);
        assert!(engine.book(&sym()).is_none());
    }
}
