use rust_decimal::Decimal;
use thiserror::Error;

use crate::exchange::ExchangeError;
use crate::strategy::Direction;

/// Errors that stop the engine from trading.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Venue positions do not net to zero: maker {maker}, hedge {hedge} (epsilon {epsilon})")]
    ReconciliationMismatch {
        maker: Decimal,
        hedge: Decimal,
        epsilon: Decimal,
    },

    #[error("Maker position {maker} does not match configured direction {expected}")]
    DirectionMismatch { expected: Direction, maker: Decimal },

    #[error("Trading halted")]
    Halted,

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Why a maker order was not placed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaceError {
    #[error("Maker order already active ({state})")]
    Busy { state: &'static str },

    #[error("Maker venue refused order: {0}")]
    Venue(ExchangeError),

    #[error("No usable maker price")]
    NoPrice,
}
