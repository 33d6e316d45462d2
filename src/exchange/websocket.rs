//! WebSocket depth feed feeding the market data cache.
//!
//! Messages are JSON objects of the form
//! `{"type": "snapshot" | "update", "bids": [[price, size], ...], "asks": [...]}`
//! with prices and sizes as strings or numbers. `{"type": "ping"}` is
//! answered with `{"type": "pong"}`. Anything else is ignored.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::traits::Venue;
use super::types::{BookUpdate, PriceLevel};
use crate::market::MarketDataCache;

/// Feed lifecycle notifications for the strategy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    Connected(Venue),
    /// A book update was applied to the cache.
    Updated(Venue),
    Disconnected(Venue),
}

#[derive(Debug, Deserialize)]
struct RawLevel(Decimal, Decimal);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawMessage {
    Snapshot {
        #[serde(default)]
        bids: Vec<RawLevel>,
        #[serde(default)]
        asks: Vec<RawLevel>,
    },
    Update {
        #[serde(default)]
        bids: Vec<RawLevel>,
        #[serde(default)]
        asks: Vec<RawLevel>,
    },
    Ping,
    #[serde(other)]
    Other,
}

/// Decoded feed message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Book(BookUpdate),
    Ping,
    Ignored,
}

fn levels(raw: Vec<RawLevel>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|RawLevel(price, size)| PriceLevel::new(price, size))
        .collect()
}

/// Decode one text frame. Malformed frames are ignored, not fatal.
pub fn parse_message(text: &str) -> FeedMessage {
    match serde_json::from_str::<RawMessage>(text) {
        Ok(RawMessage::Snapshot { bids, asks }) => FeedMessage::Book(BookUpdate::Snapshot {
            bids: levels(bids),
            asks: levels(asks),
        }),
        Ok(RawMessage::Update { bids, asks }) => FeedMessage::Book(BookUpdate::Delta {
            bids: levels(bids),
            asks: levels(asks),
        }),
        Ok(RawMessage::Ping) => FeedMessage::Ping,
        Ok(RawMessage::Other) => FeedMessage::Ignored,
        Err(e) => {
            debug!(error = %e, "Unparseable feed message");
            FeedMessage::Ignored
        }
    }
}

/// Depth stream for one venue with automatic reconnect.
pub struct BookFeed {
    venue: Venue,
    url: String,
    subscribe_message: Option<String>,
    reconnect_backoff: Duration,
    cache: Arc<MarketDataCache>,
}

impl BookFeed {
    pub fn new(
        venue: Venue,
        url: impl Into<String>,
        subscribe_message: Option<String>,
        reconnect_backoff: Duration,
        cache: Arc<MarketDataCache>,
    ) -> Self {
        Self {
            venue,
            url: url.into(),
            subscribe_message,
            reconnect_backoff,
            cache,
        }
    }

    /// Run until `shutdown` flips to `true`, reconnecting after each drop.
    pub async fn run(
        self,
        events: mpsc::UnboundedSender<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.session(&events) => {
                    if let Err(e) = result {
                        error!(venue = %self.venue, error = %e, "Depth feed error");
                    }
                }
                _ = shutdown.changed() => break,
            }

            // A dropped feed leaves a frozen book; clear it so it reads as no data.
            self.cache.clear(self.venue);
            let _ = events.send(FeedEvent::Disconnected(self.venue));

            warn!(
                venue = %self.venue,
                backoff_secs = self.reconnect_backoff.as_secs(),
                "Depth feed disconnected, reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_backoff) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(venue = %self.venue, "Depth feed stopped");
    }

    /// One connection, until the server closes it or an error occurs.
    async fn session(&self, events: &mpsc::UnboundedSender<FeedEvent>) -> Result<()> {
        info!(venue = %self.venue, url = %self.url, "Connecting depth feed");

        let (ws_stream, _) = connect_async(&self.url)
            .await
            .context("Failed to connect to WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        if let Some(subscribe) = &self.subscribe_message {
            write
                .send(Message::Text(subscribe.clone().into()))
                .await
                .context("Failed to send subscription")?;
        }
        let _ = events.send(FeedEvent::Connected(self.venue));

        while let Some(msg) = read.next().await {
            match msg.context("WebSocket read failed")? {
                Message::Text(text) => match parse_message(text.as_str()) {
                    FeedMessage::Book(update) => {
                        self.cache.apply(self.venue, &update);
                        let _ = events.send(FeedEvent::Updated(self.venue));
                    }
                    FeedMessage::Ping => {
                        write
                            .send(Message::Text(r#"{"type":"pong"}"#.into()))
                            .await
                            .context("Failed to send pong")?;
                    }
                    FeedMessage::Ignored => {}
                },
                Message::Ping(_) => {
                    debug!("Received ping, pong handled by tungstenite");
                }
                Message::Close(_) => {
                    info!(venue = %self.venue, "WebSocket closed by server");
                    return Ok(());
                }
                _ => {}
            }
        }
        Ok(())
    }
}
