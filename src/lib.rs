//! # Spread Arb
//!
//! Two-venue spread arbitrage: rest a post-only maker order on one venue and
//! hedge each fill with a taker order on the other, in layers gated by a
//! threshold ladder.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `market`: Order books and the shared market data cache
//! - `exchange`: Venue traits, WebSocket depth feeds, paper venues
//! - `strategy`: Spread evaluation, maker order control, hedging, the engine
//! - `risk`: Position ledger, circuit breaker, reconciliation
//! - `alerts`: Operator alerts and webhook delivery
//! - `persistence`: SQLite trade journal
//! - `utils`: Shared utilities and decimal arithmetic

pub mod alerts;
pub mod config;
pub mod exchange;
pub mod market;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
