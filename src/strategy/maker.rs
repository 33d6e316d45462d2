//! Single-flight maker order lifecycle.
//!
//! `Idle -> Submitting -> Placed -> Cancelling -> Idle`, with a fill returning
//! to `Idle` from any active state. Transitions happen under one short lock
//! that is never held across a venue call.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::exchange::{ExchangeError, MakerOrderRequest, MakerVenue, OrderId, OrderSide};
use crate::strategy::PlaceError;
use crate::utils::decimal::{ceil_to_tick, floor_to_tick};

/// Filled order ids remembered for late fill / stale cancel detection.
const FILLED_HISTORY: usize = 64;

/// The order currently resting on the maker venue.
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MakerOrderState {
    Idle,
    /// Placement request in flight; no order id yet.
    Submitting {
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        started_at: DateTime<Utc>,
    },
    Placed(RestingOrder),
    Cancelling {
        order: RestingOrder,
        requested_at: DateTime<Utc>,
    },
}

impl MakerOrderState {
    pub fn name(&self) -> &'static str {
        match self {
            MakerOrderState::Idle => "idle",
            MakerOrderState::Submitting { .. } => "submitting",
            MakerOrderState::Placed(_) => "placed",
            MakerOrderState::Cancelling { .. } => "cancelling",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, MakerOrderState::Idle)
    }
}

/// Why a resting order is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaseReason {
    Timeout,
    /// Top of book moved away by more than the allowed drift.
    PriceDrift,
    /// Book now trades through the resting price.
    WouldCross,
    /// Earlier cancel was never confirmed.
    CancelRetry,
}

/// How a fill relates to the controller's state.
#[derive(Debug, Clone, PartialEq)]
pub enum FillDisposition {
    /// Fill for the active order. `remaining` is still resting on the venue.
    Active { remaining: Decimal },
    /// Fill for an order the controller already released.
    Late,
}

#[derive(Debug)]
struct Inner {
    state: MakerOrderState,
    filled: VecDeque<OrderId>,
}

impl Inner {
    fn remember_fill(&mut self, order_id: &OrderId) {
        if !self.filled.contains(order_id) {
            self.filled.push_back(order_id.clone());
            while self.filled.len() > FILLED_HISTORY {
                self.filled.pop_front();
            }
        }
    }
}

pub struct MakerOrderController {
    venue: Arc<dyn MakerVenue>,
    timeout: Duration,
    max_drift: Decimal,
    tick_size: Decimal,
    inner: Mutex<Inner>,
}

impl MakerOrderController {
    pub fn new(venue: Arc<dyn MakerVenue>, config: &ExecutionConfig, tick_size: Decimal) -> Self {
        Self {
            venue,
            timeout: Duration::seconds(config.order_timeout_secs as i64),
            max_drift: config.max_price_drift,
            tick_size,
            inner: Mutex::new(Inner {
                state: MakerOrderState::Idle,
                filled: VecDeque::new(),
            }),
        }
    }

    pub fn state(&self) -> MakerOrderState {
        self.inner.lock().state.clone()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().state.is_idle()
    }

    /// Price at which a maker order on `side` joins the top of book.
    pub fn quote_price(&self, side: OrderSide, best_bid: Decimal, best_ask: Decimal) -> Option<Decimal> {
        let price = match side {
            OrderSide::Buy => floor_to_tick(best_bid, self.tick_size),
            OrderSide::Sell => ceil_to_tick(best_ask, self.tick_size),
        };
        (price > Decimal::ZERO).then_some(price)
    }

    /// Place a post-only order. Refused unless the controller is idle.
    #[instrument(skip(self), fields(side = %request.side, quantity = %request.quantity, price = %request.price))]
    pub async fn place(&self, request: MakerOrderRequest) -> Result<OrderId, PlaceError> {
        if request.price <= Decimal::ZERO {
            return Err(PlaceError::NoPrice);
        }

        {
            let mut inner = self.inner.lock();
            if !inner.state.is_idle() {
                return Err(PlaceError::Busy {
                    state: inner.state.name(),
                });
            }
            inner.state = MakerOrderState::Submitting {
                side: request.side,
                quantity: request.quantity,
                price: request.price,
                started_at: Utc::now(),
            };
        }

        let result = self.venue.place_maker_order(request.clone()).await;

        let mut inner = self.inner.lock();
        match result {
            Ok(order_id) => {
                if inner.filled.contains(&order_id) {
                    info!(%order_id, "Maker order filled before placement was acknowledged");
                    inner.state = MakerOrderState::Idle;
                } else {
                    info!(%order_id, "Maker order placed");
                    inner.state = MakerOrderState::Placed(RestingOrder {
                        order_id: order_id.clone(),
                        side: request.side,
                        quantity: request.quantity,
                        price: request.price,
                        placed_at: Utc::now(),
                    });
                }
                Ok(order_id)
            }
            Err(e) => {
                warn!(error = %e, "Maker order placement failed");
                inner.state = MakerOrderState::Idle;
                Err(PlaceError::Venue(e))
            }
        }
    }

    /// Decide whether the resting order should be cancelled.
    pub fn chase_reason(
        &self,
        now: DateTime<Utc>,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> Option<ChaseReason> {
        let inner = self.inner.lock();
        match &inner.state {
            MakerOrderState::Placed(order) => self.evaluate_resting(order, now, best_bid, best_ask),
            MakerOrderState::Cancelling { requested_at, .. } if now - *requested_at > self.timeout => {
                Some(ChaseReason::CancelRetry)
            }
            _ => None,
        }
    }

    fn evaluate_resting(
        &self,
        order: &RestingOrder,
        now: DateTime<Utc>,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> Option<ChaseReason> {
        if now - order.placed_at > self.timeout {
            return Some(ChaseReason::Timeout);
        }

        match order.side {
            OrderSide::Buy => {
                if best_ask > Decimal::ZERO && best_ask <= order.price {
                    return Some(ChaseReason::WouldCross);
                }
                if best_bid > Decimal::ZERO && best_bid - order.price > self.max_drift {
                    return Some(ChaseReason::PriceDrift);
                }
            }
            OrderSide::Sell => {
                if best_bid > Decimal::ZERO && best_bid >= order.price {
                    return Some(ChaseReason::WouldCross);
                }
                if best_ask > Decimal::ZERO && order.price - best_ask > self.max_drift {
                    return Some(ChaseReason::PriceDrift);
                }
            }
        }
        None
    }

    /// Cancel the resting order if it timed out or the book moved past it.
    pub async fn chase(
        &self,
        now: DateTime<Utc>,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> Option<ChaseReason> {
        let reason = self.chase_reason(now, best_bid, best_ask)?;
        debug!(?reason, "Chasing maker order");
        self.cancel_active().await;
        Some(reason)
    }

    /// Fire-and-forget cancel of the active order. Returns the id cancelled.
    pub async fn cancel_active(&self) -> Option<OrderId> {
        let order_id = {
            let mut inner = self.inner.lock();
            let order = match &inner.state {
                MakerOrderState::Placed(order) => order.clone(),
                MakerOrderState::Cancelling { order, .. } => order.clone(),
                _ => return None,
            };
            let order_id = order.order_id.clone();
            inner.state = MakerOrderState::Cancelling {
                order,
                requested_at: Utc::now(),
            };
            order_id
        };

        match self.venue.cancel_order(&order_id).await {
            Ok(()) => debug!(%order_id, "Cancel requested"),
            Err(ExchangeError::NotFound(_)) => {
                debug!(%order_id, "Order already gone on cancel");
                self.on_closed(&order_id);
            }
            Err(e) => {
                // Stays in Cancelling; the next chase retries after the timeout.
                warn!(%order_id, error = %e, "Cancel request failed");
            }
        }
        Some(order_id)
    }

    /// Best-effort cancel for an order the controller no longer tracks.
    pub async fn cancel_remainder(&self, order_id: &OrderId) {
        match self.venue.cancel_order(order_id).await {
            Ok(()) | Err(ExchangeError::NotFound(_)) => {
                debug!(%order_id, "Remainder cancel sent")
            }
            Err(e) => warn!(%order_id, error = %e, "Remainder cancel failed"),
        }
    }

    /// Record a fill. The fill is real exposure regardless of disposition.
    pub fn on_fill(&self, order_id: &OrderId, quantity: Decimal) -> FillDisposition {
        let mut inner = self.inner.lock();
        let already_filled = inner.filled.contains(order_id);
        inner.remember_fill(order_id);

        let active = match &inner.state {
            MakerOrderState::Placed(order) if &order.order_id == order_id => Some(order.quantity),
            MakerOrderState::Cancelling { order, .. } if &order.order_id == order_id => {
                debug!(%order_id, "Fill arrived after cancel request");
                Some(order.quantity)
            }
            MakerOrderState::Submitting {
                quantity: requested,
                ..
            } if !already_filled => {
                // Placement response still pending; the id is matched when it returns.
                return FillDisposition::Active {
                    remaining: (*requested - quantity).max(Decimal::ZERO),
                };
            }
            _ => None,
        };

        match active {
            Some(resting) => {
                inner.state = MakerOrderState::Idle;
                FillDisposition::Active {
                    remaining: (resting - quantity).max(Decimal::ZERO),
                }
            }
            None => FillDisposition::Late,
        }
    }

    /// Cancel or expiry confirmation from the venue.
    ///
    /// Returns `false` when the confirmation is stale (order filled or unknown).
    pub fn on_closed(&self, order_id: &OrderId) -> bool {
        let mut inner = self.inner.lock();
        if inner.filled.contains(order_id) {
            debug!(%order_id, "Close confirmation for filled order ignored");
            return false;
        }
        let matches = match &inner.state {
            MakerOrderState::Placed(order) => &order.order_id == order_id,
            MakerOrderState::Cancelling { order, .. } => &order.order_id == order_id,
            _ => false,
        };
        if matches {
            info!(%order_id, "Maker order closed");
            inner.state = MakerOrderState::Idle;
        }
        matches
    }
}
