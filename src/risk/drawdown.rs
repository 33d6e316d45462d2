//! Realised-PnL drawdown halt.

use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::config::RiskConfig;

/// Tracks equity (capital plus realised PnL) against its peak.
///
/// Trips once the drawdown from peak reaches the limit and stays tripped.
#[derive(Debug)]
pub struct DrawdownGuard {
    capital: Decimal,
    max_drawdown: Decimal,
    peak_equity: Decimal,
    current_drawdown: Decimal,
    tripped: bool,
}

impl DrawdownGuard {
    pub fn new(capital: Decimal, max_drawdown: Decimal) -> Self {
        Self {
            capital,
            max_drawdown,
            peak_equity: capital,
            current_drawdown: Decimal::ZERO,
            tripped: false,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.capital, config.max_drawdown)
    }

    /// Update with cumulative realised PnL.
    ///
    /// Returns `true` only on the call that trips the guard.
    pub fn update(&mut self, realized_pnl: Decimal) -> bool {
        let equity = self.capital + realized_pnl;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown = if self.peak_equity > Decimal::ZERO {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            Decimal::ZERO
        };

        if self.tripped {
            return false;
        }
        if self.current_drawdown >= self.max_drawdown {
            self.tripped = true;
            error!(
                drawdown = %self.current_drawdown,
                limit = %self.max_drawdown,
                peak = %self.peak_equity,
                %equity,
                "Drawdown limit reached"
            );
            return true;
        }
        if self.current_drawdown >= self.max_drawdown / Decimal::TWO {
            warn!(drawdown = %self.current_drawdown, limit = %self.max_drawdown, "Drawdown past half the limit");
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn current_drawdown(&self) -> Decimal {
        self.current_drawdown
    }

    pub fn limit(&self) -> Decimal {
        self.max_drawdown
    }
}
