//! Market data for both venues.
//!
//! Maintains best bid/ask and full depth per venue from streamed snapshot and
//! delta messages, and answers VWAP queries for the spread evaluator and the
//! hedge executor.

mod book;

pub use book::{MarketDataCache, OrderBook};
