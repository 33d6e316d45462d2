//! Venue-neutral order and market data types shared by the core and transports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that offsets this one.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Book side consumed by a taker order on this side.
    pub fn taker_book_side(self) -> BookSide {
        match self {
            OrderSide::Buy => BookSide::Ask,
            OrderSide::Sell => BookSide::Bid,
        }
    }

    /// Book side a resting (maker) order on this side joins.
    pub fn maker_book_side(self) -> BookSide {
        match self {
            OrderSide::Buy => BookSide::Bid,
            OrderSide::Sell => BookSide::Ask,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static CLIENT_REF_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Client-side reference attached to a hedge order.
///
/// The same reference is reused when a hedge is resubmitted after a transient
/// error so the venue can de-duplicate it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientRef(pub String);

impl ClientRef {
    /// Generate a process-unique reference with the given prefix.
    pub fn generate(prefix: &str) -> Self {
        let seq = CLIENT_REF_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Post-only limit order request for the maker venue.
#[derive(Debug, Clone, PartialEq)]
pub struct MakerOrderRequest {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// Fill notification delivered by the maker venue transport.
#[derive(Debug, Clone, PartialEq)]
pub struct MakerFill {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl MakerFill {
    pub fn new(order_id: OrderId, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            order_id,
            side,
            quantity,
            price,
            timestamp: Utc::now(),
        }
    }
}

/// Order events pushed by the maker venue transport.
#[derive(Debug, Clone, PartialEq)]
pub enum MakerEvent {
    Fill(MakerFill),
    /// Cancelled or expired without (further) fills.
    Closed(OrderId),
}

/// Price-protected taker order for the hedge venue.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeOrder {
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Worst acceptable execution price; the venue must not fill beyond it.
    pub worst_price: Decimal,
    pub client_ref: ClientRef,
}

/// Acknowledgement of an accepted hedge order.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeAck {
    pub client_ref: ClientRef,
    /// Average fill price when the venue reports it synchronously.
    pub fill_price: Option<Decimal>,
}

/// Net position reported by a venue. Positive quantity is long.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VenuePosition {
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

impl VenuePosition {
    pub fn flat() -> Self {
        Self::default()
    }
}

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Decoded depth message.
#[derive(Debug, Clone, PartialEq)]
pub enum BookUpdate {
    /// Replace the whole book.
    Snapshot {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
    /// Upsert levels; a zero size removes the level.
    Delta {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
}
