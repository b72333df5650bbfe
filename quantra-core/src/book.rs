//! Per-venue order book view backed by sorted price levels.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::{Price, Quantity, Side};

/// Total-ordered price key so `f64` prices can live in a `BTreeMap`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Px(pub f64);

impl Eq for Px {}

impl PartialOrd for Px {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Px {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Aggregated ladder for one `(symbol, venue)` pair.
///
/// Bids iterate highest-first, asks lowest-first. A quantity of zero removes
/// the level, mirroring venue depth-delta semantics.
#[derive(Clone, Debug, Default)]
pub struct BookView {
    bids: BTreeMap<Reverse<Px>, Quantity>,
    asks: BTreeMap<Px, Quantity>,
}

impl BookView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the book with explicit bid/ask snapshots.
    pub fn load_snapshot(&mut self, bids: &[(Price, Quantity)], asks: &[(Price, Quantity)]) {
        self.bids.clear();
        self.asks.clear();
        self.apply_deltas(bids, asks);
    }

    /// Overwrite a single price level; zero (or negative) removes it.
    pub fn apply_level(&mut self, side: Side, price: Price, quantity: Quantity) {
        match side {
            Side::Buy => {
                if quantity <= 0.0 {
                    self.bids.remove(&Reverse(Px(price)));
                } else {
                    self.bids.insert(Reverse(Px(price)), quantity);
                }
            }
            Side::Sell => {
                if quantity <= 0.0 {
                    self.asks.remove(&Px(price));
                } else {
                    self.asks.insert(Px(price), quantity);
                }
            }
        }
    }

    /// Apply a batch of bid/ask level overwrites.
    pub fn apply_deltas(&mut self, bids: &[(Price, Quantity)], asks: &[(Price, Quantity)]) {
        for &(price, qty) in bids {
            self.apply_level(Side::Buy, price, qty);
        }
        for &(price, qty) in asks {
            self.apply_level(Side::Sell, price, qty);
        }
    }

    /// Highest bid level, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.iter().next().map(|(px, qty)| ((px.0).0, *qty))
    }

    /// Lowest ask level, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.iter().next().map(|(px, qty)| (px.0, *qty))
    }

    /// Arithmetic mean of best bid and best ask.
    #[must_use]
    pub fn mid(&self) -> Option<Price> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some((bid + ask) / 2.0)
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some(ask - bid)
    }

    /// Number of resting bid levels.
    #[must_use]
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Number of resting ask levels.
    #[must_use]
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Iterate bids in descending price order.
    pub fn bids(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.bids.iter().map(|(px, qty)| ((px.0).0, *qty))
    }

    /// Iterate asks in ascending price order.
    pub fn asks(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.asks.iter().map(|(px, qty)| (px.0, *qty))
    }

    /// Owned bid levels up to `depth`.
    #[must_use]
    pub fn bid_levels(&self, depth: usize) -> Vec<(Price, Quantity)> {
        self.bids().take(depth).collect()
    }

    /// Owned ask levels up to `depth`.
    #[must_use]
    pub fn ask_levels(&self, depth: usize) -> Vec<(Price, Quantity)> {
        self.asks().take(depth).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book() -> BookView {
        let mut book = BookView::new();
        book.load_snapshot(
            &[(100.0, 2.0), (99.5, 5.0), (99.0, 1.0)],
            &[(100.5, 1.5), (101.0, 4.0)],
        );
        book
    }

    #[test]
    fn best_levels_and_mid() {
        let book = sample_book();
        assert_eq!(book.best_bid(), Some((100.0, 2.0)));
        assert_eq!(book.best_ask(), Some((100.5, 1.5)));
        assert_eq!(book.mid(), Some(100.25));
        assert!((book.spread().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_quantity_removes_a_level() {
        let mut book = sample_book();
        book.apply_level(Side::Buy, 100.0, 0.0);
        assert_eq!(book.best_bid(), Some((99.5, 5.0)));
        assert_eq!(book.bid_depth(), 2);
    }

    #[test]
    fn iteration_orders_are_price_sorted() {
        let book = sample_book();
        let bids: Vec<f64> = book.bids().map(|(p, _)| p).collect();
        let asks: Vec<f64> = book.asks().map(|(p, _)| p).collect();
        assert_eq!(bids, vec![100.0, 99.5, 99.0]);
        assert_eq!(asks, vec![100.5, 101.0]);
    }

    #[test]
    fn empty_book_has_no_mid() {
        let book = BookView::new();
        assert!(book.best_bid().is_none());
        assert!(book.mid().is_none());
        assert!(book.is_empty());
    }
}
