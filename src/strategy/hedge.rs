//! Fill-triggered hedging with rollback.
//!
//! Each maker fill is handled by exactly one call to
//! [`HedgeExecutor::process_fill`]. The ledger and breaker are only touched
//! after the venue calls for that fill have resolved, each mutation in its own
//! short critical section.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{Alert, AlertKind, AlertSeverity, Alerter};
use crate::config::{ExecutionConfig, RiskConfig};
use crate::exchange::{
    ClientRef, ExchangeError, ExchangeResult, HedgeAck, HedgeOrder, HedgeVenue, MakerFill,
    MakerVenue, OrderId, OrderSide, Venue,
};
use crate::market::MarketDataCache;
use crate::persistence::TradeJournal;
use crate::risk::{CircuitBreaker, CloseReport, DrawdownGuard, PositionLedger};
use crate::utils::decimal::{ceil_to_tick, floor_to_tick, is_dust};

/// Whether a maker fill opens or closes exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgePurpose {
    Open,
    Close,
}

impl HedgePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            HedgePurpose::Open => "open",
            HedgePurpose::Close => "close",
        }
    }
}

/// Outcome of one hedge order, including its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeAttemptResult {
    pub success: bool,
    /// Zero when the hedge failed
    pub fill_price: Decimal,
    pub client_ref: ClientRef,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub reference_price: Decimal,
    pub worst_price: Decimal,
    pub error: Option<String>,
}

/// What processing a maker fill did to the book of exposure.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// Opening fill hedged and recorded as an open layer.
    Hedged { hedge_price: Decimal },
    /// Opening hedge failed and the maker leg was flattened.
    RolledBack,
    /// Opening hedge and rollback both failed; exposure is naked.
    Unhedged,
    /// Closing fill matched against the ledger.
    Closed(CloseReport),
    /// Closing hedge failed; ledger left as it was.
    CloseFailed,
}

/// Hedge submission, fill price resolution and rollback.
pub struct HedgeExecutor {
    hedge: Arc<dyn HedgeVenue>,
    maker: Arc<dyn MakerVenue>,
    cache: Arc<MarketDataCache>,
    ledger: Arc<Mutex<PositionLedger>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    drawdown: Arc<Mutex<DrawdownGuard>>,
    halted: Arc<AtomicBool>,
    alerter: Arc<Alerter>,
    journal: Option<Arc<TradeJournal>>,
    /// Closing fills are settled one at a time against the ledger.
    close_gate: tokio::sync::Mutex<()>,
    slippage: Decimal,
    max_retries: u8,
    retry_backoff: Duration,
    poll_attempts: u32,
    poll_interval: Duration,
    rollback_aggression: Decimal,
    tick_size: Decimal,
    count_closing_failures: bool,
    halt_on_close_failure: bool,
}

/// Shared state the executor updates after each fill.
pub struct HedgeContext {
    pub cache: Arc<MarketDataCache>,
    pub ledger: Arc<Mutex<PositionLedger>>,
    pub breaker: Arc<Mutex<CircuitBreaker>>,
    pub drawdown: Arc<Mutex<DrawdownGuard>>,
    pub halted: Arc<AtomicBool>,
    pub alerter: Arc<Alerter>,
    pub journal: Option<Arc<TradeJournal>>,
}

impl HedgeExecutor {
    pub fn new(
        hedge: Arc<dyn HedgeVenue>,
        maker: Arc<dyn MakerVenue>,
        context: HedgeContext,
        execution: &ExecutionConfig,
        risk: &RiskConfig,
        tick_size: Decimal,
    ) -> Self {
        Self {
            hedge,
            maker,
            cache: context.cache,
            ledger: context.ledger,
            breaker: context.breaker,
            drawdown: context.drawdown,
            halted: context.halted,
            alerter: context.alerter,
            journal: context.journal,
            close_gate: tokio::sync::Mutex::new(()),
            slippage: execution.hedge_slippage,
            max_retries: execution.max_retries.max(1),
            retry_backoff: Duration::from_millis(execution.retry_backoff_ms),
            poll_attempts: execution.fill_poll_attempts,
            poll_interval: Duration::from_millis(execution.fill_poll_interval_ms),
            rollback_aggression: execution.rollback_aggression,
            tick_size,
            count_closing_failures: risk.count_closing_failures,
            halt_on_close_failure: risk.halt_on_close_failure,
        }
    }

    /// Hedge-venue price to execute `quantity` on `side`.
    ///
    /// VWAP through the visible depth, falling back to top of book.
    pub fn reference_price(&self, side: OrderSide, quantity: Decimal) -> Option<Decimal> {
        let book_side = side.taker_book_side();
        let vwap = self.cache.vwap(Venue::Hedge, quantity, book_side);
        if vwap > Decimal::ZERO {
            return Some(vwap);
        }
        let best = self.cache.best(Venue::Hedge, book_side);
        (best > Decimal::ZERO).then_some(best)
    }

    /// Price protection bound for a hedge order.
    pub fn worst_price(&self, side: OrderSide, reference: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => reference * (Decimal::ONE + self.slippage),
            OrderSide::Sell => reference * (Decimal::ONE - self.slippage),
        }
    }

    /// Submit a price-protected hedge and resolve its fill price.
    #[instrument(skip(self))]
    pub async fn hedge(&self, side: OrderSide, quantity: Decimal) -> HedgeAttemptResult {
        let client_ref = ClientRef::generate("hedge");

        let Some(reference_price) = self.reference_price(side, quantity) else {
            warn!("No hedge venue price, hedge not submitted");
            return HedgeAttemptResult {
                success: false,
                fill_price: Decimal::ZERO,
                client_ref,
                side,
                quantity,
                reference_price: Decimal::ZERO,
                worst_price: Decimal::ZERO,
                error: Some("no hedge venue price".to_string()),
            };
        };
        let worst_price = self.worst_price(side, reference_price);

        let order = HedgeOrder {
            side,
            quantity,
            worst_price,
            client_ref: client_ref.clone(),
        };

        match self.submit_with_retry(order).await {
            Ok(ack) => {
                let fill_price = match ack.fill_price {
                    Some(price) if price > Decimal::ZERO => price,
                    _ => self.resolve_fill_price(&client_ref, reference_price).await,
                };
                info!(
                    %client_ref,
                    %reference_price,
                    %worst_price,
                    %fill_price,
                    "Hedge filled"
                );
                HedgeAttemptResult {
                    success: true,
                    fill_price,
                    client_ref,
                    side,
                    quantity,
                    reference_price,
                    worst_price,
                    error: None,
                }
            }
            Err(e) => {
                error!(%client_ref, error = %e, "Hedge order failed");
                HedgeAttemptResult {
                    success: false,
                    fill_price: Decimal::ZERO,
                    client_ref,
                    side,
                    quantity,
                    reference_price,
                    worst_price,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Retry transient errors with linear backoff, reusing the client ref.
    async fn submit_with_retry(&self, order: HedgeOrder) -> ExchangeResult<HedgeAck> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.hedge.submit_hedge_order(order.clone()).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_transient() => {
                    warn!(
                        client_ref = %order.client_ref,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Hedge submission failed, retrying"
                    );
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_backoff * attempt as u32).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ExchangeError::Timeout))
    }

    /// Poll for the hedge fill price, falling back to `fallback`.
    pub async fn resolve_fill_price(&self, client_ref: &ClientRef, fallback: Decimal) -> Decimal {
        for attempt in 1..=self.poll_attempts {
            match self.hedge.get_order_fill_price(client_ref.as_str()).await {
                Ok(Some(price)) if price > Decimal::ZERO => return price,
                Ok(_) => debug!(%client_ref, attempt, "Hedge fill price not yet known"),
                Err(e) => debug!(%client_ref, attempt, error = %e, "Fill price query failed"),
            }
            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        warn!(%client_ref, %fallback, "Hedge fill price unresolved, using reference");
        fallback
    }

    /// Flatten a maker fill whose hedge failed with a through-the-book order.
    #[instrument(skip(self, fill), fields(order_id = %fill.order_id))]
    pub async fn rollback(&self, fill: &MakerFill) -> ExchangeResult<OrderId> {
        let side = fill.side.opposite();
        let (best_bid, best_ask) = self.cache.best_prices(Venue::Maker);

        let limit_price = match side {
            OrderSide::Sell => {
                let base = if best_bid > Decimal::ZERO { best_bid } else { fill.price };
                floor_to_tick(base * (Decimal::ONE - self.rollback_aggression), self.tick_size)
            }
            OrderSide::Buy => {
                let base = if best_ask > Decimal::ZERO { best_ask } else { fill.price };
                ceil_to_tick(base * (Decimal::ONE + self.rollback_aggression), self.tick_size)
            }
        };

        warn!(%side, quantity = %fill.quantity, %limit_price, "Rolling back maker fill");
        self.maker
            .place_aggressive_order(side, fill.quantity, limit_price)
            .await
    }

    /// Hedge one maker fill and apply the result to the ledger and breaker.
    pub async fn process_fill(&self, fill: &MakerFill, purpose: HedgePurpose) -> FillOutcome {
        self.write_journal(|j| j.record_maker_fill(fill, purpose));
        match purpose {
            HedgePurpose::Open => self.process_open(fill).await,
            HedgePurpose::Close => self.process_close(fill).await,
        }
    }

    async fn process_open(&self, fill: &MakerFill) -> FillOutcome {
        let layer = self.ledger.lock().open(fill.quantity, fill.price);

        let result = self.hedge(fill.side.opposite(), fill.quantity).await;
        self.write_journal(|j| j.record_hedge(&result, HedgePurpose::Open));

        if result.success {
            self.ledger.lock().confirm_hedge(layer, result.fill_price);
            self.record_outcome(true);
            return FillOutcome::Hedged {
                hedge_price: result.fill_price,
            };
        }

        let reason = result.error.clone().unwrap_or_default();
        self.alerter.raise(Alert::new(
            AlertKind::OpenHedgeFailure {
                side: result.side,
                quantity: fill.quantity,
                reason: reason.clone(),
            },
            AlertSeverity::Error,
            format!(
                "Opening hedge for {} {} failed ({}), rolling back",
                fill.quantity, fill.side, reason
            ),
            false,
        ));

        let outcome = match self.rollback(fill).await {
            Ok(order_id) => {
                info!(%order_id, "Rollback order placed");
                self.ledger.lock().remove(layer);
                FillOutcome::RolledBack
            }
            Err(e) => {
                self.ledger.lock().mark_unhedged(layer);
                self.alerter.raise(Alert::critical(
                    AlertKind::RollbackFailure {
                        quantity: fill.quantity,
                        reason: e.to_string(),
                    },
                    format!(
                        "Rollback of {} {} failed ({}); maker exposure is unhedged",
                        fill.quantity, fill.side, e
                    ),
                ));
                FillOutcome::Unhedged
            }
        };

        self.record_outcome(false);
        outcome
    }

    async fn process_close(&self, fill: &MakerFill) -> FillOutcome {
        // The hedge size depends on which layers earlier closes consumed
        let _serial = self.close_gate.lock().await;
        let hedge_quantity = self.ledger.lock().hedged_quantity_for_close(fill.quantity);

        let hedge_price = if is_dust(hedge_quantity) {
            debug!(quantity = %fill.quantity, "Closing naked layers, no hedge needed");
            None
        } else {
            let result = self.hedge(fill.side.opposite(), hedge_quantity).await;
            self.write_journal(|j| j.record_hedge(&result, HedgePurpose::Close));

            if self.count_closing_failures {
                self.record_outcome(result.success);
            }

            if !result.success {
                let reason = result.error.unwrap_or_default();
                if self.halt_on_close_failure {
                    self.halted.store(true, Ordering::SeqCst);
                }
                self.alerter.raise(Alert::critical(
                    AlertKind::CloseHedgeFailure {
                        side: result.side,
                        quantity: hedge_quantity,
                        reason: reason.clone(),
                    },
                    format!(
                        "Closing hedge for {} failed ({}); ledger unchanged, manual intervention required",
                        hedge_quantity, reason
                    ),
                ));
                return FillOutcome::CloseFailed;
            }
            Some(result.fill_price)
        };

        let (report, realized_pnl) = {
            let mut ledger = self.ledger.lock();
            let report = ledger.close(fill.quantity, fill.price, hedge_price);
            (report, ledger.realized_pnl())
        };
        self.write_journal(|j| j.record_close(report.matched, fill.price, hedge_price, report.realized_pnl));

        if !is_dust(report.unmatched) {
            self.alerter.raise(Alert::new(
                AlertKind::UnmatchedClose {
                    quantity: report.unmatched,
                },
                AlertSeverity::Warning,
                format!("Closing fill exceeded ledger by {}", report.unmatched),
                false,
            ));
        }

        self.check_drawdown(realized_pnl);
        FillOutcome::Closed(report)
    }

    /// Halt once realised losses reach the drawdown limit.
    fn check_drawdown(&self, realized_pnl: Decimal) {
        let (tripped, drawdown, limit) = {
            let mut guard = self.drawdown.lock();
            (guard.update(realized_pnl), guard.current_drawdown(), guard.limit())
        };
        if tripped {
            self.halted.store(true, Ordering::SeqCst);
            self.alerter.raise(Alert::critical(
                AlertKind::DrawdownHalt { drawdown, limit },
                format!(
                    "Drawdown {} reached limit {} (realised PnL {}); trading halted until restart",
                    drawdown, limit, realized_pnl
                ),
            ));
        }
    }

    /// Feed the breaker and halt if it trips.
    fn record_outcome(&self, success: bool) {
        let (tripped, status) = {
            let mut breaker = self.breaker.lock();
            (breaker.record(success), breaker.status())
        };
        if tripped {
            self.halted.store(true, Ordering::SeqCst);
            self.alerter.raise(Alert::critical(
                AlertKind::BreakerTripped {
                    failures: status.failures,
                    window: status.window,
                },
                format!(
                    "Circuit breaker tripped: {} of the last {} hedges failed; trading halted until restart",
                    status.failures, status.window
                ),
            ));
        }
    }

    fn write_journal(&self, write: impl FnOnce(&TradeJournal) -> anyhow::Result<()>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = write(journal) {
                warn!(error = %e, "Journal write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{BookUpdate, MockHedgeVenue, MockMakerVenue, PriceLevel};
    use crate::strategy::Direction;
    use rust_decimal_macros::dec;

    struct Harness {
        executor: HedgeExecutor,
        ledger: Arc<Mutex<PositionLedger>>,
        breaker: Arc<Mutex<CircuitBreaker>>,
        halted: Arc<AtomicBool>,
        alerter: Arc<Alerter>,
    }

    fn execution() -> ExecutionConfig {
        ExecutionConfig {
            hedge_slippage: dec!(0.01),
            max_retries: 3,
            retry_backoff_ms: 1,
            fill_poll_attempts: 3,
            fill_poll_interval_ms: 1,
            rollback_aggression: dec!(0.01),
            ..ExecutionConfig::default()
        }
    }

    fn cache() -> Arc<MarketDataCache> {
        let cache = Arc::new(MarketDataCache::new());
        cache.apply(
            Venue::Maker,
            &BookUpdate::Snapshot {
                bids: vec![PriceLevel::new(dec!(100), dec!(1))],
                asks: vec![PriceLevel::new(dec!(100.1), dec!(1))],
            },
        );
        cache.apply(
            Venue::Hedge,
            &BookUpdate::Snapshot {
                bids: vec![PriceLevel::new(dec!(101), dec!(1))],
                asks: vec![PriceLevel::new(dec!(101.2), dec!(1))],
            },
        );
        cache
    }

    fn harness(hedge: MockHedgeVenue, maker: MockMakerVenue, risk: RiskConfig) -> Harness {
        harness_with_cache(hedge, maker, risk, cache())
    }

    fn harness_with_cache(
        hedge: MockHedgeVenue,
        maker: MockMakerVenue,
        risk: RiskConfig,
        cache: Arc<MarketDataCache>,
    ) -> Harness {
        let ledger = Arc::new(Mutex::new(PositionLedger::new(Direction::Long)));
        let breaker = Arc::new(Mutex::new(CircuitBreaker::from_config(&risk)));
        let halted = Arc::new(AtomicBool::new(false));
        let alerter = Arc::new(Alerter::log_only());
        let executor = HedgeExecutor::new(
            Arc::new(hedge),
            Arc::new(maker),
            HedgeContext {
                cache,
                ledger: Arc::clone(&ledger),
                breaker: Arc::clone(&breaker),
                drawdown: Arc::new(Mutex::new(DrawdownGuard::from_config(&risk))),
                halted: Arc::clone(&halted),
                alerter: Arc::clone(&alerter),
                journal: Some(Arc::new(TradeJournal::in_memory().unwrap())),
            },
            &execution(),
            &risk,
            dec!(0.1),
        );
        Harness {
            executor,
            ledger,
            breaker,
            halted,
            alerter,
        }
    }

    fn open_fill() -> MakerFill {
        MakerFill::new(OrderId::new("m1"), OrderSide::Buy, dec!(0.01), dec!(100))
    }

    fn close_fill(quantity: Decimal) -> MakerFill {
        MakerFill::new(OrderId::new("m2"), OrderSide::Sell, quantity, dec!(102))
    }

    fn filled_hedge(price: Decimal) -> MockHedgeVenue {
        let mut hedge = MockHedgeVenue::new();
        hedge.expect_submit_hedge_order().returning(move |order| {
            Ok(HedgeAck {
                client_ref: order.client_ref,
                fill_price: Some(price),
            })
        });
        hedge
    }

    fn rejecting_hedge() -> MockHedgeVenue {
        let mut hedge = MockHedgeVenue::new();
        hedge
            .expect_submit_hedge_order()
            .returning(|_| Err(ExchangeError::Rejected("insufficient margin".into())));
        hedge
    }

    #[test]
    fn test_worst_price_bounds() {
        let h = harness(MockHedgeVenue::new(), MockMakerVenue::new(), RiskConfig::default());
        assert_eq!(h.executor.worst_price(OrderSide::Sell, dec!(100)), dec!(99));
        assert_eq!(h.executor.worst_price(OrderSide::Buy, dec!(100)), dec!(101));
    }

    #[test]
    fn test_reference_falls_back_to_top_of_book() {
        let h = harness(MockHedgeVenue::new(), MockMakerVenue::new(), RiskConfig::default());
        assert_eq!(
            h.executor.reference_price(OrderSide::Sell, dec!(0.5)),
            Some(dec!(101))
        );
        // Depth is 1; VWAP for 5 is unavailable so top of book is used
        assert_eq!(
            h.executor.reference_price(OrderSide::Buy, dec!(5)),
            Some(dec!(101.2))
        );
    }

    #[tokio::test]
    async fn test_open_hedge_success_confirms_layer() {
        let mut hedge = MockHedgeVenue::new();
        hedge
            .expect_submit_hedge_order()
            .withf(|order| {
                order.side == OrderSide::Sell
                    && order.quantity == dec!(0.01)
                    && order.worst_price == dec!(99.99)
            })
            .times(1)
            .returning(|order| {
                Ok(HedgeAck {
                    client_ref: order.client_ref,
                    fill_price: Some(dec!(101)),
                })
            });
        // No rollback expectation: calling place_aggressive_order would panic
        let h = harness(hedge, MockMakerVenue::new(), RiskConfig::default());

        let outcome = h.executor.process_fill(&open_fill(), HedgePurpose::Open).await;

        assert_eq!(
            outcome,
            FillOutcome::Hedged {
                hedge_price: dec!(101)
            }
        );
        let ledger = h.ledger.lock();
        assert_eq!(ledger.hedged_quantity(), dec!(0.01));
        assert_eq!(ledger.layers().next().map(|l| l.hedge_entry_price), Some(dec!(101)));
        assert_eq!(h.breaker.lock().status().samples, 1);
    }

    #[tokio::test]
    async fn test_open_hedge_failure_rolls_back() {
        let mut maker = MockMakerVenue::new();
        maker
            .expect_place_aggressive_order()
            .withf(|side, qty, price| {
                *side == OrderSide::Sell && *qty == dec!(0.01) && *price == dec!(99.0)
            })
            .times(1)
            .returning(|_, _, _| Ok(OrderId::new("rb1")));
        let h = harness(rejecting_hedge(), maker, RiskConfig::default());

        let outcome = h.executor.process_fill(&open_fill(), HedgePurpose::Open).await;

        assert_eq!(outcome, FillOutcome::RolledBack);
        assert!(h.ledger.lock().is_empty());
        assert_eq!(h.breaker.lock().failures(), 1);
        assert!(h.alerter.count() >= 1);
        assert!(!h.halted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_rollback_leaves_naked_layer() {
        let mut maker = MockMakerVenue::new();
        maker
            .expect_place_aggressive_order()
            .times(1)
            .returning(|_, _, _| Err(ExchangeError::Fatal("maker venue down".into())));
        let h = harness(rejecting_hedge(), maker, RiskConfig::default());

        let outcome = h.executor.process_fill(&open_fill(), HedgePurpose::Open).await;

        assert_eq!(outcome, FillOutcome::Unhedged);
        let ledger = h.ledger.lock();
        assert_eq!(ledger.total_quantity(), dec!(0.01));
        assert_eq!(ledger.hedged_quantity(), Decimal::ZERO);
        assert!(h
            .alerter
            .recent()
            .iter()
            .any(|a| matches!(a.kind, AlertKind::RollbackFailure { .. }) && a.requires_operator));
    }

    #[tokio::test]
    async fn test_missing_hedge_price_is_a_failure() {
        let empty = Arc::new(MarketDataCache::new());
        let mut maker = MockMakerVenue::new();
        maker
            .expect_place_aggressive_order()
            .times(1)
            .returning(|_, _, _| Ok(OrderId::new("rb")));
        // No submit expectation: the hedge must not be sent without a price
        let h = harness_with_cache(MockHedgeVenue::new(), maker, RiskConfig::default(), empty);

        let outcome = h.executor.process_fill(&open_fill(), HedgePurpose::Open).await;
        assert_eq!(outcome, FillOutcome::RolledBack);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_with_same_client_ref() {
        let refs = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&refs);
        let mut hedge = MockHedgeVenue::new();
        hedge
            .expect_submit_hedge_order()
            .times(3)
            .returning(move |order| {
                let mut seen = seen.lock();
                seen.push(order.client_ref.clone());
                if seen.len() < 3 {
                    Err(ExchangeError::Transient("502".into()))
                } else {
                    Ok(HedgeAck {
                        client_ref: order.client_ref,
                        fill_price: Some(dec!(100.9)),
                    })
                }
            });
        let h = harness(hedge, MockMakerVenue::new(), RiskConfig::default());

        let result = h.executor.hedge(OrderSide::Sell, dec!(0.01)).await;

        assert!(result.success);
        let refs = refs.lock();
        assert_eq!(refs.len(), 3);
        assert!(refs.iter().all(|r| *r == result.client_ref));
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_retries() {
        let mut hedge = MockHedgeVenue::new();
        hedge
            .expect_submit_hedge_order()
            .times(3)
            .returning(|_| Err(ExchangeError::Timeout));
        let h = harness(hedge, MockMakerVenue::new(), RiskConfig::default());

        let result = h.executor.hedge(OrderSide::Sell, dec!(0.01)).await;
        assert!(!result.success);
        assert_eq!(result.fill_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let mut hedge = MockHedgeVenue::new();
        hedge
            .expect_submit_hedge_order()
            .times(1)
            .returning(|_| Err(ExchangeError::Rejected("reduce only".into())));
        let h = harness(hedge, MockMakerVenue::new(), RiskConfig::default());

        assert!(!h.executor.hedge(OrderSide::Sell, dec!(0.01)).await.success);
    }

    #[tokio::test]
    async fn test_fill_price_polled_until_known() {
        let polls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&polls);
        let mut hedge = MockHedgeVenue::new();
        hedge.expect_submit_hedge_order().returning(|order| {
            Ok(HedgeAck {
                client_ref: order.client_ref,
                fill_price: None,
            })
        });
        hedge.expect_get_order_fill_price().returning(move |_| {
            let mut n = counter.lock();
            *n += 1;
            Ok((*n >= 2).then_some(dec!(100.95)))
        });
        let h = harness(hedge, MockMakerVenue::new(), RiskConfig::default());

        let result = h.executor.hedge(OrderSide::Sell, dec!(0.01)).await;
        assert_eq!(result.fill_price, dec!(100.95));
        assert_eq!(*polls.lock(), 2);
    }

    #[tokio::test]
    async fn test_unresolved_fill_price_falls_back_to_reference() {
        let mut hedge = MockHedgeVenue::new();
        hedge.expect_submit_hedge_order().returning(|order| {
            Ok(HedgeAck {
                client_ref: order.client_ref,
                fill_price: None,
            })
        });
        hedge
            .expect_get_order_fill_price()
            .times(3)
            .returning(|_| Ok(None));
        let h = harness(hedge, MockMakerVenue::new(), RiskConfig::default());

        let result = h.executor.hedge(OrderSide::Sell, dec!(0.01)).await;
        assert!(result.success);
        assert_eq!(result.fill_price, dec!(101));
    }

    #[tokio::test]
    async fn test_close_hedges_and_realises_pnl() {
        let h = harness(filled_hedge(dec!(100.5)), MockMakerVenue::new(), RiskConfig::default());
        {
            let mut ledger = h.ledger.lock();
            let id = ledger.open(dec!(0.01), dec!(100));
            ledger.confirm_hedge(id, dec!(101));
        }

        let outcome = h
            .executor
            .process_fill(&close_fill(dec!(0.01)), HedgePurpose::Close)
            .await;

        // (102 - 100) * 0.01 + (101 - 100.5) * 0.01
        match outcome {
            FillOutcome::Closed(report) => assert_eq!(report.realized_pnl, dec!(0.025)),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(h.ledger.lock().is_empty());
        // Closing outcomes are excluded from the breaker by default
        assert_eq!(h.breaker.lock().status().samples, 0);
    }

    #[tokio::test]
    async fn test_losing_close_past_drawdown_halts() {
        let risk = RiskConfig {
            capital: dec!(0.1),
            max_drawdown: dec!(0.15),
            ..RiskConfig::default()
        };
        let h = harness(filled_hedge(dec!(105)), MockMakerVenue::new(), risk);
        {
            let mut ledger = h.ledger.lock();
            let id = ledger.open(dec!(0.01), dec!(100));
            ledger.confirm_hedge(id, dec!(101));
        }

        let outcome = h
            .executor
            .process_fill(&close_fill(dec!(0.01)), HedgePurpose::Close)
            .await;

        // (102 - 100) * 0.01 + (101 - 105) * 0.01 = -0.02 on 0.1 capital
        match outcome {
            FillOutcome::Closed(report) => assert_eq!(report.realized_pnl, dec!(-0.02)),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(h.halted.load(Ordering::SeqCst));
        assert!(h
            .alerter
            .recent()
            .iter()
            .any(|a| matches!(a.kind, AlertKind::DrawdownHalt { .. }) && a.requires_operator));
    }

    #[tokio::test]
    async fn test_profitable_close_does_not_halt() {
        let risk = RiskConfig {
            capital: dec!(0.1),
            ..RiskConfig::default()
        };
        let h = harness(filled_hedge(dec!(100.5)), MockMakerVenue::new(), risk);
        {
            let mut ledger = h.ledger.lock();
            let id = ledger.open(dec!(0.01), dec!(100));
            ledger.confirm_hedge(id, dec!(101));
        }

        h.executor
            .process_fill(&close_fill(dec!(0.01)), HedgePurpose::Close)
            .await;
        assert!(!h.halted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_hedge_failure_leaves_ledger_and_halts() {
        let h = harness(rejecting_hedge(), MockMakerVenue::new(), RiskConfig::default());
        {
            let mut ledger = h.ledger.lock();
            let id = ledger.open(dec!(0.01), dec!(100));
            ledger.confirm_hedge(id, dec!(101));
        }

        let outcome = h
            .executor
            .process_fill(&close_fill(dec!(0.01)), HedgePurpose::Close)
            .await;

        assert_eq!(outcome, FillOutcome::CloseFailed);
        assert_eq!(h.ledger.lock().total_quantity(), dec!(0.01));
        assert_eq!(h.ledger.lock().realized_pnl(), Decimal::ZERO);
        assert!(h.halted.load(Ordering::SeqCst));
        assert_eq!(h.breaker.lock().status().samples, 0);
    }

    #[tokio::test]
    async fn test_counted_close_failure_enters_breaker() {
        let risk = RiskConfig {
            count_closing_failures: true,
            halt_on_close_failure: false,
            ..RiskConfig::default()
        };
        let h = harness(rejecting_hedge(), MockMakerVenue::new(), risk);
        {
            let mut ledger = h.ledger.lock();
            let id = ledger.open(dec!(0.01), dec!(100));
            ledger.confirm_hedge(id, dec!(101));
        }

        h.executor
            .process_fill(&close_fill(dec!(0.01)), HedgePurpose::Close)
            .await;
        assert_eq!(h.breaker.lock().failures(), 1);
        assert!(!h.halted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_closing_naked_layer_needs_no_hedge() {
        // No submit expectation on the hedge venue
        let h = harness(MockHedgeVenue::new(), MockMakerVenue::new(), RiskConfig::default());
        {
            let mut ledger = h.ledger.lock();
            let id = ledger.open(dec!(0.01), dec!(100));
            ledger.mark_unhedged(id);
        }

        let outcome = h
            .executor
            .process_fill(&close_fill(dec!(0.01)), HedgePurpose::Close)
            .await;

        match outcome {
            FillOutcome::Closed(report) => assert_eq!(report.realized_pnl, dec!(0.02)),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeated_open_failures_trip_breaker() {
        let mut maker = MockMakerVenue::new();
        maker
            .expect_place_aggressive_order()
            .times(4)
            .returning(|_, _, _| Ok(OrderId::new("rb")));
        let h = harness(rejecting_hedge(), maker, RiskConfig::default());

        for _ in 0..4 {
            h.executor.process_fill(&open_fill(), HedgePurpose::Open).await;
        }

        assert!(h.breaker.lock().is_tripped());
        assert!(h.halted.load(Ordering::SeqCst));
        assert!(h
            .alerter
            .recent()
            .iter()
            .any(|a| matches!(a.kind, AlertKind::BreakerTripped { failures: 4, .. })));
    }
}
