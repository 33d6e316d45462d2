//! Venue integrations.
//!
//! The maker venue takes post-only limit orders; the hedge venue takes
//! taker orders with a worst-price bound. Depth for both arrives over
//! WebSocket. Paper venues simulate fills against live depth.

mod error;
mod paper;
mod traits;
mod types;
mod websocket;

pub use error::{ExchangeError, ExchangeResult};
pub use paper::{PaperHedgeVenue, PaperMakerVenue};
pub use traits::{HedgeVenue, MakerVenue, Venue};
pub use types::*;
pub use websocket::{parse_message, BookFeed, FeedEvent, FeedMessage};

#[cfg(test)]
pub use traits::{MockHedgeVenue, MockMakerVenue};
