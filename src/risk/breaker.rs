//! Rolling hedge-outcome circuit breaker.
//!
//! Once tripped the breaker stays tripped for the life of the process; there
//! is no reset method.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::{debug, error};

use crate::config::RiskConfig;

#[derive(Debug)]
pub struct CircuitBreaker {
    window_size: usize,
    failure_threshold: Decimal,
    outcomes: VecDeque<bool>,
    tripped: bool,
}

/// Breaker state for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStatus {
    pub tripped: bool,
    pub failures: usize,
    pub samples: usize,
    pub window: usize,
}

impl CircuitBreaker {
    pub fn new(window_size: usize, failure_threshold: Decimal) -> Self {
        Self {
            window_size: window_size.max(1),
            failure_threshold,
            outcomes: VecDeque::with_capacity(window_size),
            tripped: false,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.breaker_window, config.breaker_failure_threshold)
    }

    /// Record one hedge outcome. Returns `true` only on the call that trips.
    pub fn record(&mut self, success: bool) -> bool {
        self.outcomes.push_back(success);
        while self.outcomes.len() > self.window_size {
            self.outcomes.pop_front();
        }

        let failures = self.failures();
        debug!(
            success,
            failures,
            samples = self.outcomes.len(),
            "Hedge outcome recorded"
        );

        if self.tripped {
            return false;
        }

        // Fraction is taken over the full window, not the samples seen so far.
        let limit = self.failure_threshold * Decimal::from(self.window_size);
        if Decimal::from(failures) > limit {
            self.tripped = true;
            error!(
                failures,
                window = self.window_size,
                threshold = %self.failure_threshold,
                "Circuit breaker tripped"
            );
            return true;
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|ok| !**ok).count()
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            tripped: self.tripped,
            failures: self.failures(),
            samples: self.outcomes.len(),
            window: self.window_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(10, dec!(0.30))
    }

    #[test]
    fn test_four_failures_in_ten_trips() {
        let mut b = breaker();
        let outcomes = [true, false, true, false, true, true, false, true, true, false];
        let trips: Vec<bool> = outcomes.iter().map(|ok| b.record(*ok)).collect();
        assert!(b.is_tripped());
        // Trips exactly on the fourth failure
        assert_eq!(trips.iter().filter(|t| **t).count(), 1);
        assert!(trips[9]);
    }

    #[test]
    fn test_three_failures_in_ten_does_not_trip() {
        let mut b = breaker();
        for ok in [false, true, true, false, true, true, false, true, true, true] {
            b.record(ok);
        }
        assert!(!b.is_tripped());
        assert_eq!(b.failures(), 3);
    }

    #[test]
    fn test_old_failures_roll_out_of_window() {
        let mut b = breaker();
        for _ in 0..3 {
            b.record(false);
        }
        for _ in 0..10 {
            b.record(true);
        }
        assert_eq!(b.failures(), 0);
        // Three fresh failures are still under the limit
        for _ in 0..3 {
            b.record(false);
        }
        assert!(!b.is_tripped());
    }

    #[test]
    fn test_trip_is_sticky() {
        let mut b = breaker();
        for _ in 0..4 {
            b.record(false);
        }
        assert!(b.is_tripped());
        for _ in 0..20 {
            assert!(!b.record(true));
        }
        assert!(b.is_tripped());
        assert_eq!(b.status().failures, 0);
    }
}
