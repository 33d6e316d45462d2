//! Venue-agnostic traits for the two legs of the arbitrage.
//!
//! The maker venue hosts the resting order, the hedge venue receives the
//! offsetting taker order. Transports implement these traits and decode their
//! vendor responses into [`ExchangeError`] before returning.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ExchangeResult;
use super::types::{HedgeAck, HedgeOrder, MakerOrderRequest, OrderId, OrderSide, VenuePosition};

/// Venue identifier for the two legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Maker,
    Hedge,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Maker => write!(f, "maker"),
            Venue::Hedge => write!(f, "hedge"),
        }
    }
}

impl Venue {
    /// Short code for display (2 chars).
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::Maker => "MK",
            Venue::Hedge => "HG",
        }
    }
}

/// Order management on the venue hosting the resting order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MakerVenue: Send + Sync {
    /// Place a post-only limit order.
    async fn place_maker_order(&self, request: MakerOrderRequest) -> ExchangeResult<OrderId>;

    /// Request cancellation. Completion is reported separately by the transport.
    async fn cancel_order(&self, order_id: &OrderId) -> ExchangeResult<()>;

    /// Place a marketable limit order that crosses the book (rollback only).
    async fn place_aggressive_order(
        &self,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> ExchangeResult<OrderId>;

    /// Net position on this venue; positive is long.
    async fn get_net_position(&self) -> ExchangeResult<VenuePosition>;
}

/// Order management on the venue receiving hedge orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HedgeVenue: Send + Sync {
    /// Submit a price-protected taker order.
    async fn submit_hedge_order(&self, order: HedgeOrder) -> ExchangeResult<HedgeAck>;

    /// Average fill price for a previously submitted order, once known.
    async fn get_order_fill_price(&self, client_ref: &str) -> ExchangeResult<Option<Decimal>>;

    /// Net position on this venue; positive is long.
    async fn get_net_position(&self) -> ExchangeResult<VenuePosition>;
}
