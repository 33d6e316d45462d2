//! Decimal arithmetic utilities for price and quantity handling.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Quantities at or below this magnitude are treated as zero.
pub const QUANTITY_EPSILON: Decimal = dec!(0.000000001);

/// Round a buy price down to the tick grid (never pay more than intended).
pub fn floor_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).floor() * tick_size
}

/// Round a sell price up to the tick grid (never receive less than intended).
pub fn ceil_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).ceil() * tick_size
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Whether a quantity is indistinguishable from zero.
pub fn is_dust(quantity: Decimal) -> bool {
    quantity.abs() <= QUANTITY_EPSILON
}

/// Split `total` into chunks of at most `chunk`, largest first.
///
/// The last chunk carries the remainder. A non-positive chunk size yields a
/// single chunk with the whole amount.
pub fn chunk_quantity(total: Decimal, chunk: Decimal) -> Vec<Decimal> {
    if is_dust(total) {
        return Vec::new();
    }
    if chunk <= Decimal::ZERO {
        return vec![total];
    }

    let mut chunks = Vec::new();
    let mut remaining = total;
    while remaining > QUANTITY_EPSILON {
        let next = remaining.min(chunk);
        chunks.push(next);
        remaining -= next;
    }
    chunks
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Calculate weighted average.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directional_tick_rounding() {
        assert_eq!(floor_to_tick(dec!(100.07), dec!(0.1)), dec!(100.0));
        assert_eq!(ceil_to_tick(dec!(100.01), dec!(0.1)), dec!(100.1));
        assert_eq!(ceil_to_tick(dec!(100.1), dec!(0.1)), dec!(100.1));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
    }

    #[test]
    fn test_chunk_quantity() {
        assert_eq!(
            chunk_quantity(dec!(0.025), dec!(0.01)),
            vec![dec!(0.01), dec!(0.01), dec!(0.005)]
        );
        assert_eq!(chunk_quantity(dec!(0.02), dec!(0.01)), vec![dec!(0.01), dec!(0.01)]);
        assert!(chunk_quantity(Decimal::ZERO, dec!(0.01)).is_empty());
        assert_eq!(chunk_quantity(dec!(0.3), Decimal::ZERO), vec![dec!(0.3)]);
    }

    #[test]
    fn test_weighted_average() {
        let values = vec![
            (dec!(100), dec!(2)), // 100 with weight 2
            (dec!(200), dec!(1)), // 200 with weight 1
        ];
        let avg = weighted_average(&values);
        assert!(avg > dec!(133) && avg < dec!(134));
        assert_eq!(weighted_average(&[]), Decimal::ZERO);
    }
}
