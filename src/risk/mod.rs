//! Position accounting and trading safeguards.
//!
//! - FIFO layer ledger with realised PnL
//! - Rolling-window hedge failure breaker
//! - Realised-PnL drawdown halt
//! - Startup reconciliation of venue positions

mod breaker;
mod drawdown;
mod ledger;
mod reconcile;

pub use breaker::{BreakerStatus, CircuitBreaker};
pub use drawdown::DrawdownGuard;
pub use ledger::{CloseReport, LayerId, LayerStatus, PositionLayer, PositionLedger};
pub use reconcile::{check_positions, reconcile, Reconciliation};
