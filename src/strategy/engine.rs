//! Strategy loop: evaluate spreads, manage the maker order, hand fills to the
//! hedge executor.
//!
//! `tick()` is driven periodically by a single task. Fills arrive from the
//! maker transport through `spawn_fill()` or `on_maker_fill()` and are counted
//! as in-flight hedges until processed. No new maker order is placed while any
//! hedge is in flight.

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::{Alert, AlertKind, Alerter};
use crate::config::Config;
use crate::exchange::{
    HedgeVenue, MakerFill, MakerOrderRequest, MakerVenue, OrderId, OrderSide, Venue,
};
use crate::market::MarketDataCache;
use crate::persistence::TradeJournal;
use crate::risk::{reconcile, BreakerStatus, CircuitBreaker, DrawdownGuard, PositionLedger};
use crate::strategy::{
    ChaseReason, Decision, Direction, EngineError, FillDisposition, FillOutcome, HedgeContext,
    HedgeExecutor, HedgePurpose, MakerOrderController, MakerOrderState, PlaceError,
    SpreadEvaluator,
};
use crate::utils::decimal::{is_dust, round_down_to_lot};

/// What one call to [`ArbEngine::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// `start()` has not completed.
    NotStarted,
    Halted,
    /// Resting order cancelled for replacement.
    Chased(ChaseReason),
    HedgeInFlight,
    /// A maker order is already resting or being submitted.
    OrderActive,
    NoData,
    Hold,
    Placed {
        order_id: OrderId,
        purpose: HedgePurpose,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        spread: Decimal,
    },
    PlaceFailed(PlaceError),
}

/// Point-in-time engine state for status logging.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub layer_count: usize,
    pub open_quantity: Decimal,
    pub hedged_quantity: Decimal,
    pub realized_pnl: Decimal,
    pub maker_state: &'static str,
    pub hedges_in_flight: usize,
    pub breaker: BreakerStatus,
    pub drawdown: Decimal,
    pub halted: bool,
}

/// Counts one hedge as in flight until dropped.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A fill accepted by the controller and awaiting its hedge.
struct PendingFill {
    fill: MakerFill,
    purpose: HedgePurpose,
    disposition: FillDisposition,
    _in_flight: InFlightGuard,
}

pub struct ArbEngine {
    direction: Direction,
    order_quantity: Decimal,
    lot_size: Decimal,
    reconciliation_epsilon: Decimal,
    cache: Arc<MarketDataCache>,
    evaluator: SpreadEvaluator,
    controller: MakerOrderController,
    hedger: HedgeExecutor,
    maker: Arc<dyn MakerVenue>,
    hedge: Arc<dyn HedgeVenue>,
    ledger: Arc<Mutex<PositionLedger>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    drawdown: Arc<Mutex<DrawdownGuard>>,
    halted: Arc<AtomicBool>,
    started: AtomicBool,
    hedges_in_flight: Arc<AtomicUsize>,
    alerter: Arc<Alerter>,
}

impl ArbEngine {
    pub fn new(
        config: &Config,
        cache: Arc<MarketDataCache>,
        maker: Arc<dyn MakerVenue>,
        hedge: Arc<dyn HedgeVenue>,
        alerter: Arc<Alerter>,
        journal: Option<Arc<TradeJournal>>,
    ) -> Self {
        let direction = config.market.direction;
        let ledger = Arc::new(Mutex::new(PositionLedger::new(direction)));
        let breaker = Arc::new(Mutex::new(CircuitBreaker::from_config(&config.risk)));
        let drawdown = Arc::new(Mutex::new(DrawdownGuard::from_config(&config.risk)));
        let halted = Arc::new(AtomicBool::new(false));

        let evaluator = SpreadEvaluator::new(
            direction,
            &config.ladder,
            config.costs.clone(),
            config.execution.max_book_age_ms,
        );
        let controller = MakerOrderController::new(
            Arc::clone(&maker),
            &config.execution,
            config.market.tick_size,
        );
        let hedger = HedgeExecutor::new(
            Arc::clone(&hedge),
            Arc::clone(&maker),
            HedgeContext {
                cache: Arc::clone(&cache),
                ledger: Arc::clone(&ledger),
                breaker: Arc::clone(&breaker),
                drawdown: Arc::clone(&drawdown),
                halted: Arc::clone(&halted),
                alerter: Arc::clone(&alerter),
                journal,
            },
            &config.execution,
            &config.risk,
            config.market.tick_size,
        );

        Self {
            direction,
            order_quantity: config.market.order_quantity,
            lot_size: config.market.lot_size,
            reconciliation_epsilon: config.risk.reconciliation_epsilon,
            cache,
            evaluator,
            controller,
            hedger,
            maker,
            hedge,
            ledger,
            breaker,
            drawdown,
            halted,
            started: AtomicBool::new(false),
            hedges_in_flight: Arc::new(AtomicUsize::new(0)),
            alerter,
        }
    }

    /// Reconcile venue positions and seed the ledger. Must succeed before trading.
    pub async fn start(&self) -> Result<(), EngineError> {
        let result = match reconcile(
            self.maker.as_ref(),
            self.hedge.as_ref(),
            self.direction,
            self.reconciliation_epsilon,
        )
        .await
        {
            Ok(result) => result,
            Err(e) => {
                let kind = match &e {
                    EngineError::ReconciliationMismatch { maker, hedge, .. } => {
                        AlertKind::ReconciliationMismatch {
                            maker: *maker,
                            hedge: *hedge,
                        }
                    }
                    other => AlertKind::ReconciliationFailure {
                        reason: other.to_string(),
                    },
                };
                error!(error = %e, "Startup reconciliation failed");
                self.alerter
                    .raise(Alert::critical(kind, format!("Refusing to start: {}", e)));
                return Err(e);
            }
        };

        if result.open_quantity > Decimal::ZERO {
            let restored = self.ledger.lock().restore(
                result.open_quantity,
                self.order_quantity,
                result.maker.entry_price,
                result.hedge.entry_price,
            );
            info!(
                layers = restored,
                quantity = %result.open_quantity,
                "Resuming with restored layers"
            );
        }

        self.started.store(true, Ordering::SeqCst);
        info!(direction = %self.direction, "Engine started");
        Ok(())
    }

    /// One evaluate/act cycle.
    pub async fn tick(&self) -> TickOutcome {
        if !self.started.load(Ordering::SeqCst) {
            return TickOutcome::NotStarted;
        }
        if self.is_halted() {
            if matches!(self.controller.state(), MakerOrderState::Placed(_)) {
                self.controller.cancel_active().await;
            }
            return TickOutcome::Halted;
        }

        let (best_bid, best_ask) = self.cache.best_prices(Venue::Maker);
        if let Some(reason) = self.controller.chase(Utc::now(), best_bid, best_ask).await {
            return TickOutcome::Chased(reason);
        }

        if self.hedges_in_flight() > 0 {
            return TickOutcome::HedgeInFlight;
        }
        if !self.controller.is_idle() {
            return TickOutcome::OrderActive;
        }

        let (layer_count, open_quantity) = {
            let ledger = self.ledger.lock();
            (ledger.layer_count(), ledger.total_quantity())
        };
        let (spreads, decision) =
            self.evaluator
                .evaluate(&self.cache, layer_count, open_quantity, self.order_quantity);

        let (purpose, side, quantity, spread) = match decision {
            Decision::Open { quantity, spread } => {
                (HedgePurpose::Open, self.direction.open_side(), quantity, spread)
            }
            Decision::Close { quantity, spread } => {
                (HedgePurpose::Close, self.direction.close_side(), quantity, spread)
            }
            Decision::Hold => return TickOutcome::Hold,
            Decision::NoData => {
                debug!(?spreads, "Spread unavailable");
                return TickOutcome::NoData;
            }
        };

        let quantity = round_down_to_lot(quantity, self.lot_size);
        if quantity <= Decimal::ZERO {
            return TickOutcome::Hold;
        }
        let Some(price) = self.controller.quote_price(side, best_bid, best_ask) else {
            return TickOutcome::NoData;
        };

        info!(
            purpose = purpose.as_str(),
            %side,
            %quantity,
            %price,
            %spread,
            layers = layer_count,
            "Placing maker order"
        );

        match self
            .controller
            .place(MakerOrderRequest {
                side,
                quantity,
                price,
            })
            .await
        {
            Ok(order_id) => TickOutcome::Placed {
                order_id,
                purpose,
                side,
                quantity,
                price,
                spread,
            },
            Err(PlaceError::Busy { .. }) => TickOutcome::OrderActive,
            Err(e) => {
                warn!(error = %e, "Maker order not placed");
                TickOutcome::PlaceFailed(e)
            }
        }
    }

    /// Register a fill with the controller and count its hedge as in flight.
    ///
    /// Synchronous so the placement gate closes before the caller yields.
    fn accept_fill(&self, fill: MakerFill) -> PendingFill {
        let in_flight = InFlightGuard::new(&self.hedges_in_flight);
        let disposition = self.controller.on_fill(&fill.order_id, fill.quantity);

        let purpose = if fill.side == self.direction.open_side() {
            HedgePurpose::Open
        } else {
            HedgePurpose::Close
        };

        info!(
            order_id = %fill.order_id,
            side = %fill.side,
            quantity = %fill.quantity,
            price = %fill.price,
            purpose = purpose.as_str(),
            late = matches!(disposition, FillDisposition::Late),
            "Maker fill"
        );

        PendingFill {
            fill,
            purpose,
            disposition,
            _in_flight: in_flight,
        }
    }

    async fn settle_fill(&self, pending: PendingFill) -> FillOutcome {
        let cancel_remainder = async {
            if let FillDisposition::Active { remaining } = pending.disposition {
                if !is_dust(remaining) {
                    debug!(order_id = %pending.fill.order_id, %remaining, "Cancelling unfilled remainder");
                    self.controller.cancel_remainder(&pending.fill.order_id).await;
                }
            }
        };
        // The remainder must not keep filling while the hedge is outstanding
        let (outcome, ()) = tokio::join!(
            self.hedger.process_fill(&pending.fill, pending.purpose),
            cancel_remainder
        );

        match &outcome {
            FillOutcome::Hedged { .. } | FillOutcome::Closed(_) => {
                debug!(outcome = ?outcome, "Fill processed")
            }
            _ => error!(outcome = ?outcome, "Fill processed with failure"),
        }
        outcome
    }

    /// Process a maker fill: hedge it and update the ledger.
    pub async fn on_maker_fill(&self, fill: MakerFill) -> FillOutcome {
        let pending = self.accept_fill(fill);
        self.settle_fill(pending).await
    }

    /// Like [`on_maker_fill`](Self::on_maker_fill), hedging on a spawned task.
    ///
    /// The fill is registered before this returns, so a `tick()` right after
    /// already sees the hedge as in flight.
    pub fn spawn_fill(self: &Arc<Self>, fill: MakerFill) -> JoinHandle<FillOutcome> {
        let pending = self.accept_fill(fill);
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.settle_fill(pending).await })
    }

    /// Cancel / expiry confirmation from the maker transport.
    pub fn on_maker_order_closed(&self, order_id: &OrderId) {
        self.controller.on_closed(order_id);
    }

    /// Cancel any resting order and wait for in-flight hedges to settle.
    pub async fn shutdown(&self, grace: Duration) {
        if let Some(order_id) = self.controller.cancel_active().await {
            info!(%order_id, "Cancelled resting order on shutdown");
        }

        let deadline = tokio::time::Instant::now() + grace;
        while self.hedges_in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.hedges_in_flight() > 0 {
            warn!(
                in_flight = self.hedges_in_flight(),
                "Shutting down with hedges in flight"
            );
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn hedges_in_flight(&self) -> usize {
        self.hedges_in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let (layer_count, open_quantity, hedged_quantity, realized_pnl) = {
            let ledger = self.ledger.lock();
            (
                ledger.layer_count(),
                ledger.total_quantity(),
                ledger.hedged_quantity(),
                ledger.realized_pnl(),
            )
        };
        EngineSnapshot {
            layer_count,
            open_quantity,
            hedged_quantity,
            realized_pnl,
            maker_state: self.controller.state().name(),
            hedges_in_flight: self.hedges_in_flight(),
            breaker: self.breaker.lock().status(),
            drawdown: self.drawdown.lock().current_drawdown(),
            halted: self.is_halted(),
        }
    }
}
