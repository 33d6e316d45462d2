//! Transport boundary error type.
//!
//! Venue adapters decode whatever shape their SDK returns into this enum once,
//! so the core only ever matches on these variants.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Network or API hiccup; safe to retry.
    #[error("Transient venue error: {0}")]
    Transient(String),

    /// Business rejection by the venue (insufficient margin, post-only cross, ...).
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out waiting for venue")]
    Timeout,

    #[error("Fatal venue error: {0}")]
    Fatal(String),
}

impl ExchangeError {
    /// Whether a retry with backoff is appropriate.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_) | ExchangeError::Timeout)
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Transient("502".into()).is_transient());
        assert!(ExchangeError::Timeout.is_transient());
        assert!(!ExchangeError::Rejected("margin".into()).is_transient());
        assert!(!ExchangeError::NotFound("42".into()).is_transient());
    }
}
