//! Paper trading venues driven by live depth.
//!
//! `PaperMakerVenue` rests at most one post-only order and fills it when the
//! maker book trades through the resting price. `PaperHedgeVenue` fills taker
//! orders at the hedge book VWAP and enforces the worst-price bound. Both can
//! be scripted to fail for rehearsing error paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::{ExchangeError, ExchangeResult};
use super::traits::{HedgeVenue, MakerVenue, Venue};
use super::types::*;
use crate::market::MarketDataCache;

/// Apply a trade to a signed position, averaging the entry on increases.
fn apply_trade(position: &mut VenuePosition, side: OrderSide, quantity: Decimal, price: Decimal) {
    let delta = match side {
        OrderSide::Buy => quantity,
        OrderSide::Sell => -quantity,
    };
    let before = position.quantity;
    let after = before + delta;

    if before.is_zero() || (before.is_sign_positive() == delta.is_sign_positive()) {
        // Opening or increasing
        let notional = position.entry_price * before.abs() + price * quantity;
        position.entry_price = if after.is_zero() {
            Decimal::ZERO
        } else {
            notional / after.abs()
        };
    } else if after.is_zero() {
        position.entry_price = Decimal::ZERO;
    } else if after.is_sign_positive() != before.is_sign_positive() {
        // Flipped through zero
        position.entry_price = price;
    }
    position.quantity = after;
}

#[derive(Debug, Default)]
struct PaperMakerState {
    resting: Option<(OrderId, MakerOrderRequest)>,
    position: VenuePosition,
    aggressive_failures: VecDeque<ExchangeError>,
    placement_failures: VecDeque<ExchangeError>,
}

/// Simulated maker venue.
pub struct PaperMakerVenue {
    cache: Arc<MarketDataCache>,
    state: Mutex<PaperMakerState>,
    events: mpsc::UnboundedSender<MakerEvent>,
    order_id_counter: AtomicU64,
}

impl PaperMakerVenue {
    /// Create the venue and the receiver for its fill / close events.
    pub fn new(cache: Arc<MarketDataCache>) -> (Self, mpsc::UnboundedReceiver<MakerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let venue = Self {
            cache,
            state: Mutex::new(PaperMakerState::default()),
            events: tx,
            order_id_counter: AtomicU64::new(1),
        };
        (venue, rx)
    }

    fn next_order_id(&self) -> OrderId {
        OrderId::new(format!(
            "paper-{}",
            self.order_id_counter.fetch_add(1, Ordering::SeqCst)
        ))
    }

    /// Start with an existing position (for reconciliation rehearsals).
    pub fn with_position(self, position: VenuePosition) -> Self {
        self.state.lock().position = position;
        self
    }

    /// Fail the next rollback orders with these errors.
    pub fn script_aggressive_failures(&self, errors: impl IntoIterator<Item = ExchangeError>) {
        self.state.lock().aggressive_failures.extend(errors);
    }

    /// Fail the next placements with these errors.
    pub fn script_placement_failures(&self, errors: impl IntoIterator<Item = ExchangeError>) {
        self.state.lock().placement_failures.extend(errors);
    }

    pub fn resting_order(&self) -> Option<(OrderId, MakerOrderRequest)> {
        self.state.lock().resting.clone()
    }

    pub fn position(&self) -> VenuePosition {
        self.state.lock().position
    }

    /// Fill the resting order if the maker book now trades through it.
    ///
    /// Call after each maker book update. Returns the fill if one happened.
    pub fn match_resting(&self) -> Option<MakerFill> {
        let (best_bid, best_ask) = self.cache.best_prices(Venue::Maker);
        let crossed = {
            let state = self.state.lock();
            match &state.resting {
                Some((_, req)) => match req.side {
                    OrderSide::Buy => best_ask > Decimal::ZERO && best_ask <= req.price,
                    OrderSide::Sell => best_bid > Decimal::ZERO && best_bid >= req.price,
                },
                None => false,
            }
        };
        if crossed {
            self.fill_resting(None)
        } else {
            None
        }
    }

    /// Fill the resting order at its price, fully or by `quantity`.
    pub fn fill_resting(&self, quantity: Option<Decimal>) -> Option<MakerFill> {
        let fill = {
            let mut state = self.state.lock();
            let (order_id, mut request) = state.resting.take()?;
            let filled = quantity.unwrap_or(request.quantity).min(request.quantity);
            apply_trade(&mut state.position, request.side, filled, request.price);

            request.quantity -= filled;
            if request.quantity > Decimal::ZERO {
                state.resting = Some((order_id.clone(), request.clone()));
            }
            MakerFill::new(order_id, request.side, filled, request.price)
        };

        info!(
            order_id = %fill.order_id,
            side = %fill.side,
            quantity = %fill.quantity,
            price = %fill.price,
            "Paper maker fill"
        );
        let _ = self.events.send(MakerEvent::Fill(fill.clone()));
        Some(fill)
    }
}

#[async_trait]
impl MakerVenue for PaperMakerVenue {
    async fn place_maker_order(&self, request: MakerOrderRequest) -> ExchangeResult<OrderId> {
        let (best_bid, best_ask) = self.cache.best_prices(Venue::Maker);
        let mut state = self.state.lock();

        if let Some(e) = state.placement_failures.pop_front() {
            return Err(e);
        }
        if state.resting.is_some() {
            return Err(ExchangeError::Rejected("paper venue rests one order".into()));
        }
        let would_cross = match request.side {
            OrderSide::Buy => best_ask > Decimal::ZERO && request.price >= best_ask,
            OrderSide::Sell => best_bid > Decimal::ZERO && request.price <= best_bid,
        };
        if would_cross {
            return Err(ExchangeError::Rejected("post-only order would cross".into()));
        }

        let order_id = self.next_order_id();
        debug!(%order_id, side = %request.side, price = %request.price, "Paper maker order resting");
        state.resting = Some((order_id.clone(), request));
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> ExchangeResult<()> {
        let removed = {
            let mut state = self.state.lock();
            match &state.resting {
                Some((id, _)) if id == order_id => state.resting.take().is_some(),
                _ => false,
            }
        };
        if removed {
            let _ = self.events.send(MakerEvent::Closed(order_id.clone()));
            Ok(())
        } else {
            Err(ExchangeError::NotFound(order_id.to_string()))
        }
    }

    async fn place_aggressive_order(
        &self,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> ExchangeResult<OrderId> {
        let mut state = self.state.lock();
        if let Some(e) = state.aggressive_failures.pop_front() {
            return Err(e);
        }

        let best = self.cache.best(Venue::Maker, side.taker_book_side());
        let price = match side {
            OrderSide::Buy if best > Decimal::ZERO => best.min(limit_price),
            OrderSide::Sell if best > Decimal::ZERO => best.max(limit_price),
            _ => limit_price,
        };
        apply_trade(&mut state.position, side, quantity, price);

        let order_id = self.next_order_id();
        info!(%order_id, %side, %quantity, %price, "Paper aggressive fill");
        Ok(order_id)
    }

    async fn get_net_position(&self) -> ExchangeResult<VenuePosition> {
        Ok(self.state.lock().position)
    }
}

/// Hedge fills remembered for resubmission dedup and fill-price queries.
const MAX_TRACKED_FILLS: usize = 1024;

#[derive(Debug)]
struct PaperHedgeState {
    position: VenuePosition,
    fills: HashMap<String, Decimal>,
    fill_order: VecDeque<String>,
    failures: VecDeque<ExchangeError>,
    report_fill_price: bool,
}

impl PaperHedgeState {
    fn remember_fill(&mut self, client_ref: &str, price: Decimal) {
        self.fills.insert(client_ref.to_string(), price);
        self.fill_order.push_back(client_ref.to_string());
        while self.fill_order.len() > MAX_TRACKED_FILLS {
            if let Some(oldest) = self.fill_order.pop_front() {
                self.fills.remove(&oldest);
            }
        }
    }
}

/// Simulated hedge venue.
pub struct PaperHedgeVenue {
    cache: Arc<MarketDataCache>,
    state: Mutex<PaperHedgeState>,
}

impl PaperHedgeVenue {
    pub fn new(cache: Arc<MarketDataCache>) -> Self {
        Self {
            cache,
            state: Mutex::new(PaperHedgeState {
                position: VenuePosition::flat(),
                fills: HashMap::new(),
                fill_order: VecDeque::new(),
                failures: VecDeque::new(),
                report_fill_price: true,
            }),
        }
    }

    pub fn with_position(self, position: VenuePosition) -> Self {
        self.state.lock().position = position;
        self
    }

    /// Leave fill prices out of acks so callers must poll for them.
    pub fn without_sync_fill_price(self) -> Self {
        self.state.lock().report_fill_price = false;
        self
    }

    /// Fail the next hedge submissions with these errors.
    pub fn script_failures(&self, errors: impl IntoIterator<Item = ExchangeError>) {
        self.state.lock().failures.extend(errors);
    }

    pub fn position(&self) -> VenuePosition {
        self.state.lock().position
    }
}

#[async_trait]
impl HedgeVenue for PaperHedgeVenue {
    async fn submit_hedge_order(&self, order: HedgeOrder) -> ExchangeResult<HedgeAck> {
        let mut state = self.state.lock();

        // Resubmission of an already filled order
        if let Some(price) = state.fills.get(order.client_ref.as_str()).copied() {
            return Ok(HedgeAck {
                client_ref: order.client_ref,
                fill_price: state.report_fill_price.then_some(price),
            });
        }

        if let Some(e) = state.failures.pop_front() {
            return Err(e);
        }

        let price = self
            .cache
            .vwap(Venue::Hedge, order.quantity, order.side.taker_book_side());
        if price.is_zero() {
            return Err(ExchangeError::Rejected("insufficient depth".into()));
        }
        let breached = match order.side {
            OrderSide::Buy => price > order.worst_price,
            OrderSide::Sell => price < order.worst_price,
        };
        if breached {
            return Err(ExchangeError::Rejected(format!(
                "price {} beyond protection {}",
                price, order.worst_price
            )));
        }

        apply_trade(&mut state.position, order.side, order.quantity, price);
        state.remember_fill(order.client_ref.as_str(), price);
        info!(
            client_ref = %order.client_ref,
            side = %order.side,
            quantity = %order.quantity,
            %price,
            "Paper hedge fill"
        );

        Ok(HedgeAck {
            client_ref: order.client_ref,
            fill_price: state.report_fill_price.then_some(price),
        })
    }

    async fn get_order_fill_price(&self, client_ref: &str) -> ExchangeResult<Option<Decimal>> {
        Ok(self.state.lock().fills.get(client_ref).copied())
    }

    async fn get_net_position(&self) -> ExchangeResult<VenuePosition> {
        Ok(self.state.lock().position)
    }
}
