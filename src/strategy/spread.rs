//! Spread evaluation against the layered threshold ladder.
//!
//! Long direction (buy maker / sell hedge to open):
//! - open spread  = hedge VWAP to sell - maker best ask
//! - close spread = maker best bid - hedge VWAP to buy
//!
//! Short direction mirrors both.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::{CostConfig, LadderConfig};
use crate::exchange::{BookSide, OrderSide, Venue};
use crate::market::MarketDataCache;

/// Which way the maker leg opens a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Long on the maker venue, short on the hedge venue.
    #[default]
    Long,
    /// Short on the maker venue, long on the hedge venue.
    Short,
}

impl Direction {
    /// Maker side that opens a layer.
    pub fn open_side(self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Maker side that closes a layer.
    pub fn close_side(self) -> OrderSide {
        self.open_side().opposite()
    }

    /// +1 for long, -1 for short; converts signed venue positions.
    pub fn sign(self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Open/close thresholds with a per-layer add-on step.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdLadder {
    pub open_threshold: Decimal,
    pub close_threshold: Decimal,
    pub add_on_step: Decimal,
    pub max_layers: usize,
}

impl ThresholdLadder {
    pub fn new(config: &LadderConfig) -> Self {
        Self {
            open_threshold: config.open_threshold,
            close_threshold: config.close_threshold,
            add_on_step: config.add_on_step,
            max_layers: config.max_layers,
        }
    }

    /// Spread required to open layer `k` (0-indexed).
    pub fn required_open(&self, layer: usize) -> Decimal {
        self.open_threshold + Decimal::from(layer) * self.add_on_step
    }
}

/// Current spreads; `None` where a price was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpreadSnapshot {
    pub open_spread: Option<Decimal>,
    pub close_spread: Option<Decimal>,
    /// Maker reference price used for the breakeven floor
    pub reference_price: Decimal,
}

/// What the strategy should do this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Open { quantity: Decimal, spread: Decimal },
    Close { quantity: Decimal, spread: Decimal },
    Hold,
    /// Prices missing, stale or too thin to evaluate.
    NoData,
}

/// Derives spreads from the cache and applies the ladder.
#[derive(Debug, Clone)]
pub struct SpreadEvaluator {
    direction: Direction,
    ladder: ThresholdLadder,
    costs: CostConfig,
    max_book_age: Duration,
}

impl SpreadEvaluator {
    pub fn new(
        direction: Direction,
        ladder: &LadderConfig,
        costs: CostConfig,
        max_book_age_ms: u64,
    ) -> Self {
        Self {
            direction,
            ladder: ThresholdLadder::new(ladder),
            costs,
            max_book_age: Duration::milliseconds(max_book_age_ms as i64),
        }
    }

    /// Round-trip cost floor at `price`.
    pub fn breakeven_spread(&self, price: Decimal) -> Decimal {
        price * (self.costs.maker_fee + self.costs.hedge_fee + self.costs.slippage_buffer)
            + self.costs.fixed_cost
            + self.costs.min_profit_margin
    }

    /// Effective open requirement for the next layer.
    pub fn required_open(&self, layer_count: usize, price: Decimal) -> Decimal {
        self.ladder
            .required_open(layer_count)
            .max(self.breakeven_spread(price))
    }

    /// Compute open and close spreads for `quantity`.
    pub fn spreads(&self, cache: &MarketDataCache, quantity: Decimal) -> SpreadSnapshot {
        let now = Utc::now();
        if !cache.is_fresh(Venue::Maker, self.max_book_age, now)
            || !cache.is_fresh(Venue::Hedge, self.max_book_age, now)
        {
            return SpreadSnapshot::default();
        }

        let (maker_bid, maker_ask) = cache.best_prices(Venue::Maker);
        let hedge_sell = cache.vwap(Venue::Hedge, quantity, BookSide::Bid);
        let hedge_buy = cache.vwap(Venue::Hedge, quantity, BookSide::Ask);

        let diff = |a: Decimal, b: Decimal| {
            if a > Decimal::ZERO && b > Decimal::ZERO {
                Some(a - b)
            } else {
                None
            }
        };

        match self.direction {
            Direction::Long => SpreadSnapshot {
                open_spread: diff(hedge_sell, maker_ask),
                close_spread: diff(maker_bid, hedge_buy),
                reference_price: maker_ask,
            },
            Direction::Short => SpreadSnapshot {
                open_spread: diff(maker_bid, hedge_buy),
                close_spread: diff(hedge_sell, maker_ask),
                reference_price: maker_bid,
            },
        }
    }

    /// Apply the ladder to a snapshot. Closing wins over opening.
    pub fn decide(
        &self,
        spreads: &SpreadSnapshot,
        layer_count: usize,
        open_quantity: Decimal,
        order_quantity: Decimal,
    ) -> Decision {
        if spreads.open_spread.is_none() && spreads.close_spread.is_none() {
            return Decision::NoData;
        }

        if layer_count > 0 {
            if let Some(close_spread) = spreads.close_spread {
                if close_spread > self.ladder.close_threshold {
                    return Decision::Close {
                        quantity: order_quantity.min(open_quantity),
                        spread: close_spread,
                    };
                }
            }
        }

        if layer_count < self.ladder.max_layers {
            if let Some(open_spread) = spreads.open_spread {
                let required = self.required_open(layer_count, spreads.reference_price);
                if open_spread > required {
                    return Decision::Open {
                        quantity: order_quantity,
                        spread: open_spread,
                    };
                }
                debug!(
                    %open_spread,
                    %required,
                    layer_count,
                    "Open spread below ladder requirement"
                );
            }
        }

        Decision::Hold
    }

    /// Spreads plus decision in one call.
    pub fn evaluate(
        &self,
        cache: &MarketDataCache,
        layer_count: usize,
        open_quantity: Decimal,
        order_quantity: Decimal,
    ) -> (SpreadSnapshot, Decision) {
        let spreads = self.spreads(cache, order_quantity);
        let decision = self.decide(&spreads, layer_count, open_quantity, order_quantity);
        (spreads, decision)
    }
}
