//! FIFO position ledger with realised PnL accounting.
//!
//! Layers are appended on opening fills and consumed oldest-first by closing
//! fills. The sum of layer quantities is the net maker-venue exposure; the sum
//! over hedged layers is the intended hedge-venue exposure.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::strategy::Direction;
use crate::utils::decimal::{chunk_quantity, is_dust};

/// Ledger-local layer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LayerId(pub u64);

/// Lifecycle of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayerStatus {
    /// Maker leg filled, hedge outstanding.
    Hedging,
    /// Opened organically; hedged unless the hedge and its rollback both failed.
    Open,
    /// Seeded from venue positions at startup.
    Restored,
}

/// One opened, not yet fully closed unit of exposure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionLayer {
    pub id: LayerId,
    /// Remaining quantity
    pub quantity: Decimal,
    pub maker_entry_price: Decimal,
    /// Zero until the hedge is confirmed
    pub hedge_entry_price: Decimal,
    pub is_hedged: bool,
    pub status: LayerStatus,
    pub opened_at: DateTime<Utc>,
}

/// Outcome of a FIFO close.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseReport {
    /// Quantity matched against layers
    pub matched: Decimal,
    /// Closing quantity left over after the ledger ran out
    pub unmatched: Decimal,
    pub realized_pnl: Decimal,
    /// Layers fully consumed and removed
    pub layers_closed: usize,
}

#[derive(Debug)]
pub struct PositionLedger {
    direction: Direction,
    layers: VecDeque<PositionLayer>,
    next_id: u64,
    realized_pnl: Decimal,
}

impl PositionLedger {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            layers: VecDeque::new(),
            next_id: 1,
            realized_pnl: Decimal::ZERO,
        }
    }

    fn allocate_id(&mut self) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append a layer for an opening maker fill. The hedge is still pending.
    pub fn open(&mut self, quantity: Decimal, maker_price: Decimal) -> LayerId {
        let id = self.allocate_id();
        self.layers.push_back(PositionLayer {
            id,
            quantity,
            maker_entry_price: maker_price,
            hedge_entry_price: Decimal::ZERO,
            is_hedged: false,
            status: LayerStatus::Hedging,
            opened_at: Utc::now(),
        });
        debug!(layer = id.0, %quantity, %maker_price, "Layer opened");
        id
    }

    /// Record the confirmed hedge for a layer.
    pub fn confirm_hedge(&mut self, id: LayerId, hedge_price: Decimal) -> bool {
        match self.layers.iter_mut().find(|l| l.id == id) {
            Some(layer) => {
                layer.hedge_entry_price = hedge_price;
                layer.is_hedged = true;
                layer.status = LayerStatus::Open;
                debug!(layer = id.0, %hedge_price, "Layer hedged");
                true
            }
            None => {
                warn!(layer = id.0, "Hedge confirmation for unknown layer");
                false
            }
        }
    }

    /// Keep a layer whose hedge and rollback both failed as naked exposure.
    pub fn mark_unhedged(&mut self, id: LayerId) -> bool {
        match self.layers.iter_mut().find(|l| l.id == id) {
            Some(layer) => {
                layer.is_hedged = false;
                layer.status = LayerStatus::Open;
                warn!(layer = id.0, quantity = %layer.quantity, "Layer left unhedged");
                true
            }
            None => false,
        }
    }

    /// Drop a layer that was flattened by rollback.
    pub fn remove(&mut self, id: LayerId) -> Option<PositionLayer> {
        let index = self.layers.iter().position(|l| l.id == id)?;
        let layer = self.layers.remove(index);
        if let Some(ref l) = layer {
            debug!(layer = id.0, quantity = %l.quantity, "Layer removed");
        }
        layer
    }

    /// Quantity of a close of `quantity` that falls on hedged layers.
    ///
    /// Walks layers front-to-back exactly as [`close`](Self::close) would,
    /// without mutating anything. Only this portion needs a hedge order.
    pub fn hedged_quantity_for_close(&self, quantity: Decimal) -> Decimal {
        let mut remaining = quantity;
        let mut hedged = Decimal::ZERO;
        for layer in &self.layers {
            if remaining <= Decimal::ZERO {
                break;
            }
            let matched = layer.quantity.min(remaining);
            if layer.is_hedged {
                hedged += matched;
            }
            remaining -= matched;
        }
        hedged
    }

    /// FIFO-match a closing fill.
    ///
    /// `hedge_price` is the confirmed closing hedge price, or `None` when no
    /// hedge order was needed; hedge PnL is only booked for hedged layers when
    /// it is present.
    pub fn close(
        &mut self,
        quantity: Decimal,
        close_price: Decimal,
        hedge_price: Option<Decimal>,
    ) -> CloseReport {
        let sign = self.direction.sign();
        let mut report = CloseReport::default();
        let mut remaining = quantity;

        while remaining > Decimal::ZERO {
            let Some(layer) = self.layers.front_mut() else {
                break;
            };

            let matched = layer.quantity.min(remaining);
            let mut pnl = (close_price - layer.maker_entry_price) * matched * sign;
            if let (true, Some(h)) = (layer.is_hedged, hedge_price) {
                pnl += (layer.hedge_entry_price - h) * matched * sign;
            }

            layer.quantity -= matched;
            remaining -= matched;
            report.matched += matched;
            report.realized_pnl += pnl;

            debug!(
                layer = layer.id.0,
                %matched,
                remaining_in_layer = %layer.quantity,
                %pnl,
                "Layer matched"
            );

            if is_dust(layer.quantity) {
                self.layers.pop_front();
                report.layers_closed += 1;
            }
        }

        report.unmatched = remaining.max(Decimal::ZERO);
        if !is_dust(report.unmatched) {
            warn!(
                unmatched = %report.unmatched,
                "Closing fill exceeds ledger quantity"
            );
        }

        self.realized_pnl += report.realized_pnl;
        info!(
            matched = %report.matched,
            pnl = %report.realized_pnl,
            total_pnl = %self.realized_pnl,
            layers_left = self.layers.len(),
            "Close matched FIFO"
        );
        report
    }

    /// Seed layers from reconciled venue exposure.
    pub fn restore(
        &mut self,
        total: Decimal,
        chunk: Decimal,
        maker_entry_price: Decimal,
        hedge_entry_price: Decimal,
    ) -> usize {
        let chunks = chunk_quantity(total, chunk);
        for quantity in &chunks {
            let id = self.allocate_id();
            self.layers.push_back(PositionLayer {
                id,
                quantity: *quantity,
                maker_entry_price,
                hedge_entry_price,
                is_hedged: true,
                status: LayerStatus::Restored,
                opened_at: Utc::now(),
            });
        }
        info!(%total, layers = chunks.len(), "Ledger restored from venue positions");
        chunks.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Net open quantity on the maker venue.
    pub fn total_quantity(&self) -> Decimal {
        self.layers.iter().map(|l| l.quantity).sum()
    }

    /// Intended hedge-venue exposure.
    pub fn hedged_quantity(&self) -> Decimal {
        self.layers
            .iter()
            .filter(|l| l.is_hedged)
            .map(|l| l.quantity)
            .sum()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn layers(&self) -> impl Iterator<Item = &PositionLayer> {
        self.layers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn hedged_ledger(layers: &[(Decimal, Decimal, Decimal)]) -> PositionLedger {
        let mut ledger = PositionLedger::new(Direction::Long);
        for (qty, maker, hedge) in layers {
            let id = ledger.open(*qty, *maker);
            ledger.confirm_hedge(id, *hedge);
        }
        ledger
    }

    #[test]
    fn test_fifo_close_partial_second_layer() {
        let mut ledger = hedged_ledger(&[
            (dec!(0.01), dec!(100), dec!(110)),
            (dec!(0.02), dec!(101), dec!(111)),
        ]);

        let report = ledger.close(dec!(0.015), dec!(105), Some(dec!(106)));

        assert_eq!(report.matched, dec!(0.015));
        assert_eq!(report.layers_closed, 1);
        assert_eq!(ledger.layer_count(), 1);
        let remaining: Vec<_> = ledger.layers().collect();
        assert_eq!(remaining[0].quantity, dec!(0.015));
        assert_eq!(remaining[0].maker_entry_price, dec!(101));
    }

    #[test]
    fn test_long_close_pnl() {
        let mut ledger = hedged_ledger(&[
            (dec!(0.01), dec!(100), dec!(110)),
            (dec!(0.02), dec!(101), dec!(111)),
        ]);

        let report = ledger.close(dec!(0.015), dec!(105), Some(dec!(106)));

        // Layer 1: (105-100)*0.01 + (110-106)*0.01 = 0.09
        // Layer 2: (105-101)*0.005 + (111-106)*0.005 = 0.045
        assert_eq!(report.realized_pnl, dec!(0.135));
        assert_eq!(ledger.realized_pnl(), dec!(0.135));
    }

    #[test]
    fn test_short_close_pnl_is_mirrored() {
        let mut ledger = PositionLedger::new(Direction::Short);
        let id = ledger.open(dec!(1), dec!(100));
        ledger.confirm_hedge(id, dec!(90));

        // Sold maker at 100, buy back at 98; bought hedge at 90, sell at 93
        let report = ledger.close(dec!(1), dec!(98), Some(dec!(93)));
        assert_eq!(report.realized_pnl, dec!(5));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_naked_layers_skip_hedge_pnl() {
        let mut ledger = PositionLedger::new(Direction::Long);
        let naked = ledger.open(dec!(0.01), dec!(100));
        ledger.mark_unhedged(naked);
        let hedged = ledger.open(dec!(0.01), dec!(100));
        ledger.confirm_hedge(hedged, dec!(110));

        assert_eq!(ledger.hedged_quantity_for_close(dec!(0.015)), dec!(0.005));
        assert_eq!(ledger.hedged_quantity_for_close(dec!(0.01)), Decimal::ZERO);
        assert_eq!(ledger.hedged_quantity_for_close(dec!(1)), dec!(0.01));

        let report = ledger.close(dec!(0.015), dec!(102), Some(dec!(108)));
        // Naked: (102-100)*0.01 = 0.02; hedged: (102-100)*0.005 + (110-108)*0.005 = 0.02
        assert_eq!(report.realized_pnl, dec!(0.04));
    }

    #[test]
    fn test_close_without_hedge_price_books_maker_leg_only() {
        let mut ledger = hedged_ledger(&[(dec!(0.01), dec!(100), dec!(110))]);
        let report = ledger.close(dec!(0.01), dec!(103), None);
        assert_eq!(report.realized_pnl, dec!(0.03));
    }

    #[test]
    fn test_close_beyond_ledger_reports_unmatched() {
        let mut ledger = hedged_ledger(&[(dec!(0.01), dec!(100), dec!(110))]);
        let report = ledger.close(dec!(0.03), dec!(100), Some(dec!(110)));
        assert_eq!(report.matched, dec!(0.01));
        assert_eq!(report.unmatched, dec!(0.02));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_hedging_layer_lifecycle() {
        let mut ledger = PositionLedger::new(Direction::Long);
        let id = ledger.open(dec!(0.01), dec!(100));
        assert_eq!(ledger.layers().next().map(|l| l.status), Some(LayerStatus::Hedging));
        assert_eq!(ledger.hedged_quantity(), Decimal::ZERO);
        assert_eq!(ledger.total_quantity(), dec!(0.01));

        assert!(ledger.confirm_hedge(id, dec!(105)));
        assert_eq!(ledger.hedged_quantity(), dec!(0.01));

        assert!(ledger.remove(id).is_some());
        assert!(ledger.is_empty());
        assert!(!ledger.confirm_hedge(id, dec!(105)));
    }

    #[test]
    fn test_restore_chunks_layers() {
        let mut ledger = PositionLedger::new(Direction::Long);
        let count = ledger.restore(dec!(0.025), dec!(0.01), dec!(100), dec!(101));
        assert_eq!(count, 3);
        assert_eq!(ledger.total_quantity(), dec!(0.025));
        assert_eq!(ledger.hedged_quantity(), dec!(0.025));
        assert!(ledger.layers().all(|l| l.status == LayerStatus::Restored));

        // Restored layers close exactly like organic ones
        let report = ledger.close(dec!(0.01), dec!(102), Some(dec!(100)));
        assert_eq!(report.layers_closed, 1);
        assert_eq!(report.realized_pnl, dec!(0.03));
    }

    #[test]
    fn test_conservation_over_sequence() {
        let mut ledger = PositionLedger::new(Direction::Long);
        let opens = [dec!(0.01), dec!(0.007), dec!(0.013), dec!(0.02), dec!(0.005)];
        let closes = [dec!(0.004), dec!(0.011), dec!(0.009), dec!(0.016)];

        let mut opened = Decimal::ZERO;
        let mut closed = Decimal::ZERO;
        for (i, qty) in opens.iter().enumerate() {
            let id = ledger.open(*qty, dec!(100));
            ledger.confirm_hedge(id, dec!(101));
            opened += *qty;
            if let Some(c) = closes.get(i) {
                let report = ledger.close(*c, dec!(100), Some(dec!(101)));
                closed += report.matched;
            }
        }

        assert_eq!(ledger.total_quantity(), opened - closed);
        assert_eq!(closed, dec!(0.04));
        assert_eq!(ledger.total_quantity(), dec!(0.015));
    }
}
