//! Per-venue depth books and the shared market data cache.
//!
//! Books are updated by the feed listener tasks and read by the strategy loop.
//! Every accessor returns `0` when the answer is unknown (empty side, not
//! enough depth); callers treat `0` as "do not trade".

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::trace;

use crate::exchange::{BookSide, BookUpdate, PriceLevel, Venue};
use crate::utils::decimal::weighted_average;

/// Price-level book for one venue.
#[derive(Debug, Default, Clone)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a snapshot (clear-then-fill) or delta (upsert, zero size deletes).
    ///
    /// Levels are last-write-wins, so duplicated or reordered deltas for the
    /// same price simply leave the most recently applied size in place.
    pub fn apply(&mut self, update: &BookUpdate, at: DateTime<Utc>) {
        match update {
            BookUpdate::Snapshot { bids, asks } => {
                self.bids.clear();
                self.asks.clear();
                Self::upsert_all(&mut self.bids, bids);
                Self::upsert_all(&mut self.asks, asks);
            }
            BookUpdate::Delta { bids, asks } => {
                Self::upsert_all(&mut self.bids, bids);
                Self::upsert_all(&mut self.asks, asks);
            }
        }
        self.last_update = Some(at);
    }

    fn upsert_all(side: &mut BTreeMap<Decimal, Decimal>, levels: &[PriceLevel]) {
        for level in levels {
            if level.price <= Decimal::ZERO {
                continue;
            }
            if level.size <= Decimal::ZERO {
                side.remove(&level.price);
            } else {
                side.insert(level.price, level.size);
            }
        }
    }

    /// Drop all levels (e.g., after a feed disconnect).
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update = None;
    }

    /// Top of book, or zero when the side is empty.
    pub fn best(&self, side: BookSide) -> Decimal {
        let top = match side {
            BookSide::Bid => self.bids.keys().next_back(),
            BookSide::Ask => self.asks.keys().next(),
        };
        top.copied().unwrap_or(Decimal::ZERO)
    }

    /// Levels from the top of the given side.
    pub fn levels(&self, side: BookSide) -> Vec<PriceLevel> {
        match side {
            BookSide::Bid => self
                .bids
                .iter()
                .rev()
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
            BookSide::Ask => self
                .asks
                .iter()
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
        }
    }

    /// Total visible size on a side.
    pub fn depth(&self, side: BookSide) -> Decimal {
        match side {
            BookSide::Bid => self.bids.values().copied().sum(),
            BookSide::Ask => self.asks.values().copied().sum(),
        }
    }

    /// Volume-weighted price to fill `quantity` against `side`.
    ///
    /// Returns zero if the visible depth cannot fill the whole quantity.
    pub fn vwap(&self, quantity: Decimal, side: BookSide) -> Decimal {
        if quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let levels: Box<dyn Iterator<Item = (&Decimal, &Decimal)>> = match side {
            BookSide::Bid => Box::new(self.bids.iter().rev()),
            BookSide::Ask => Box::new(self.asks.iter()),
        };

        let mut remaining = quantity;
        let mut takes = Vec::new();
        for (price, size) in levels {
            let take = remaining.min(*size);
            takes.push((*price, take));
            remaining -= take;
            if remaining <= Decimal::ZERO {
                return weighted_average(&takes);
            }
        }

        trace!(%quantity, ?side, "Insufficient depth for VWAP");
        Decimal::ZERO
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }
}

/// Books for both venues, shared between feed tasks and the strategy loop.
#[derive(Debug, Default)]
pub struct MarketDataCache {
    maker: RwLock<OrderBook>,
    hedge: RwLock<OrderBook>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, venue: Venue) -> &RwLock<OrderBook> {
        match venue {
            Venue::Maker => &self.maker,
            Venue::Hedge => &self.hedge,
        }
    }

    pub fn apply(&self, venue: Venue, update: &BookUpdate) {
        self.book(venue).write().apply(update, Utc::now());
    }

    pub fn clear(&self, venue: Venue) {
        self.book(venue).write().clear();
    }

    pub fn best(&self, venue: Venue, side: BookSide) -> Decimal {
        self.book(venue).read().best(side)
    }

    /// `(bid, ask)`, zero for an empty side.
    pub fn best_prices(&self, venue: Venue) -> (Decimal, Decimal) {
        let book = self.book(venue).read();
        (book.best(BookSide::Bid), book.best(BookSide::Ask))
    }

    pub fn vwap(&self, venue: Venue, quantity: Decimal, side: BookSide) -> Decimal {
        self.book(venue).read().vwap(quantity, side)
    }

    /// Whether the venue's book has received an update within `max_age`.
    pub fn is_fresh(&self, venue: Venue, max_age: Duration, now: DateTime<Utc>) -> bool {
        match self.book(venue).read().last_update() {
            Some(at) => now - at <= max_age,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lvl(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply(
            &BookUpdate::Snapshot {
                bids: vec![lvl(dec!(100), dec!(1)), lvl(dec!(99), dec!(2))],
                asks: vec![lvl(dec!(101), dec!(1)), lvl(dec!(102), dec!(3))],
            },
            Utc::now(),
        );
        book
    }

    #[test]
    fn test_best_prices() {
        let book = sample_book();
        assert_eq!(book.best(BookSide::Bid), dec!(100));
        assert_eq!(book.best(BookSide::Ask), dec!(101));
        assert_eq!(OrderBook::new().best(BookSide::Bid), Decimal::ZERO);
    }

    #[test]
    fn test_snapshot_replaces_book() {
        let mut book = sample_book();
        book.apply(
            &BookUpdate::Snapshot {
                bids: vec![lvl(dec!(95), dec!(1))],
                asks: vec![],
            },
            Utc::now(),
        );
        assert_eq!(book.best(BookSide::Bid), dec!(95));
        assert_eq!(book.best(BookSide::Ask), Decimal::ZERO);
        assert_eq!(book.levels(BookSide::Bid).len(), 1);
    }

    #[test]
    fn test_delta_upsert_and_delete() {
        let mut book = sample_book();
        book.apply(
            &BookUpdate::Delta {
                bids: vec![lvl(dec!(100), Decimal::ZERO), lvl(dec!(99.5), dec!(4))],
                asks: vec![lvl(dec!(101), dec!(5))],
            },
            Utc::now(),
        );
        assert_eq!(book.best(BookSide::Bid), dec!(99.5));
        assert_eq!(book.levels(BookSide::Ask)[0], lvl(dec!(101), dec!(5)));
    }

    #[test]
    fn test_duplicate_deltas_are_idempotent() {
        let mut book = sample_book();
        let delta = BookUpdate::Delta {
            bids: vec![lvl(dec!(99), dec!(7))],
            asks: vec![],
        };
        book.apply(&delta, Utc::now());
        book.apply(&delta, Utc::now());
        assert_eq!(book.depth(BookSide::Bid), dec!(8));
    }

    #[test]
    fn test_vwap_walks_levels() {
        let book = sample_book();
        // 1 @ 101 + 1 @ 102
        assert_eq!(book.vwap(dec!(2), BookSide::Ask), dec!(101.5));
        // Fits in the top level
        assert_eq!(book.vwap(dec!(0.5), BookSide::Bid), dec!(100));
        // 1 @ 100 + 2 @ 99 = 298 / 3
        let vwap = book.vwap(dec!(3), BookSide::Bid);
        assert!(vwap > dec!(99.33) && vwap < dec!(99.34));
    }

    #[test]
    fn test_vwap_insufficient_depth_returns_zero() {
        let book = sample_book();
        assert_eq!(book.vwap(dec!(4.0001), BookSide::Ask), Decimal::ZERO);
        assert_eq!(book.vwap(dec!(10), BookSide::Bid), Decimal::ZERO);
        assert_eq!(OrderBook::new().vwap(dec!(0.01), BookSide::Ask), Decimal::ZERO);
    }

    #[test]
    fn test_cache_freshness() {
        let cache = MarketDataCache::new();
        let now = Utc::now();
        assert!(!cache.is_fresh(Venue::Maker, Duration::seconds(5), now));

        cache.apply(
            Venue::Maker,
            &BookUpdate::Delta {
                bids: vec![lvl(dec!(10), dec!(1))],
                asks: vec![],
            },
        );
        assert!(cache.is_fresh(Venue::Maker, Duration::seconds(5), Utc::now()));
        assert!(!cache.is_fresh(
            Venue::Maker,
            Duration::seconds(5),
            Utc::now() + Duration::seconds(60)
        ));
        assert_eq!(cache.best_prices(Venue::Maker), (dec!(10), Decimal::ZERO));
        assert_eq!(cache.best_prices(Venue::Hedge), (Decimal::ZERO, Decimal::ZERO));
    }
}
