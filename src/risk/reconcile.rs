//! Startup reconciliation of venue positions.
//!
//! Trading only starts when both venues net to (nearly) zero. A mismatch is
//! fatal: refusing to start is preferable to trading on a wrong ledger.

use rust_decimal::Decimal;
use tracing::{error, info, instrument};

use crate::exchange::{HedgeVenue, MakerVenue, VenuePosition};
use crate::strategy::{Direction, EngineError};
use crate::utils::decimal::is_dust;

/// Consistent venue exposure found at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    pub maker: VenuePosition,
    pub hedge: VenuePosition,
    /// Unsigned quantity to seed into the ledger.
    pub open_quantity: Decimal,
}

/// Check that two venue positions offset each other.
pub fn check_positions(
    maker: VenuePosition,
    hedge: VenuePosition,
    direction: Direction,
    epsilon: Decimal,
) -> Result<Reconciliation, EngineError> {
    let net = maker.quantity + hedge.quantity;
    if net.abs() > epsilon {
        return Err(EngineError::ReconciliationMismatch {
            maker: maker.quantity,
            hedge: hedge.quantity,
            epsilon,
        });
    }

    if !is_dust(maker.quantity) && maker.quantity * direction.sign() < Decimal::ZERO {
        return Err(EngineError::DirectionMismatch {
            expected: direction,
            maker: maker.quantity,
        });
    }

    let open_quantity = if is_dust(maker.quantity) {
        Decimal::ZERO
    } else {
        maker.quantity.abs()
    };

    Ok(Reconciliation {
        maker,
        hedge,
        open_quantity,
    })
}

/// Query both venues and reconcile.
#[instrument(skip(maker, hedge))]
pub async fn reconcile(
    maker: &dyn MakerVenue,
    hedge: &dyn HedgeVenue,
    direction: Direction,
    epsilon: Decimal,
) -> Result<Reconciliation, EngineError> {
    let maker_position = maker.get_net_position().await?;
    let hedge_position = hedge.get_net_position().await?;

    match check_positions(maker_position, hedge_position, direction, epsilon) {
        Ok(result) => {
            info!(
                maker = %maker_position.quantity,
                hedge = %hedge_position.quantity,
                open = %result.open_quantity,
                "Venue positions reconciled"
            );
            Ok(result)
        }
        Err(e) => {
            error!(error = %e, "Reconciliation failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeError, MockHedgeVenue, MockMakerVenue};
    use rust_decimal_macros::dec;

    fn pos(quantity: Decimal, entry_price: Decimal) -> VenuePosition {
        VenuePosition {
            quantity,
            entry_price,
        }
    }

    #[test]
    fn test_flat_venues_reconcile() {
        let r = check_positions(
            VenuePosition::flat(),
            VenuePosition::flat(),
            Direction::Long,
            dec!(0.000001),
        )
        .unwrap();
        assert_eq!(r.open_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_offsetting_positions_reconcile() {
        let r = check_positions(
            pos(dec!(0.03), dec!(100)),
            pos(dec!(-0.03), dec!(101)),
            Direction::Long,
            dec!(0.000001),
        )
        .unwrap();
        assert_eq!(r.open_quantity, dec!(0.03));

        let short = check_positions(
            pos(dec!(-0.02), dec!(100)),
            pos(dec!(0.02), dec!(99)),
            Direction::Short,
            dec!(0.000001),
        )
        .unwrap();
        assert_eq!(short.open_quantity, dec!(0.02));
    }

    #[test]
    fn test_mismatch_is_fatal() {
        let err = check_positions(
            pos(dec!(0.03), dec!(100)),
            pos(dec!(-0.02), dec!(101)),
            Direction::Long,
            dec!(0.000001),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ReconciliationMismatch { .. }));
    }

    #[test]
    fn test_wrong_direction_is_fatal() {
        let err = check_positions(
            pos(dec!(-0.03), dec!(100)),
            pos(dec!(0.03), dec!(101)),
            Direction::Long,
            dec!(0.000001),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::DirectionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_queries_both_venues() {
        let mut maker = MockMakerVenue::new();
        maker
            .expect_get_net_position()
            .times(1)
            .returning(|| Ok(pos(dec!(0.01), dec!(100))));
        let mut hedge = MockHedgeVenue::new();
        hedge
            .expect_get_net_position()
            .times(1)
            .returning(|| Ok(pos(dec!(-0.01), dec!(102))));

        let r = reconcile(&maker, &hedge, Direction::Long, dec!(0.000001))
            .await
            .unwrap();
        assert_eq!(r.hedge.entry_price, dec!(102));
    }

    #[tokio::test]
    async fn test_reconcile_propagates_venue_error() {
        let mut maker = MockMakerVenue::new();
        maker
            .expect_get_net_position()
            .returning(|| Err(ExchangeError::Timeout));
        let hedge = MockHedgeVenue::new();

        let err = reconcile(&maker, &hedge, Direction::Long, dec!(0.000001))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Exchange(ExchangeError::Timeout)));
    }
}
