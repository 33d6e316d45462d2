//! Configuration management for the spread arbitrage engine.
//!
//! Loads settings from environment variables and config files. The resulting
//! [`Config`] is built once at startup and its sections are handed to each
//! component's constructor.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::strategy::Direction;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Instrument and order sizing
    #[serde(default)]
    pub market: MarketConfig,
    /// Open/close thresholds and layering
    #[serde(default)]
    pub ladder: LadderConfig,
    /// Round-trip cost model for the breakeven floor
    #[serde(default)]
    pub costs: CostConfig,
    /// Order placement, chasing and hedging parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Circuit breaker and reconciliation
    #[serde(default)]
    pub risk: RiskConfig,
    /// Market data feeds
    #[serde(default)]
    pub feeds: FeedConfig,
    /// Outbound alerts
    #[serde(default)]
    pub alerts: AlertConfig,
    /// Trade journal
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Instrument label used in logs and the journal
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Which way the maker leg opens
    #[serde(default)]
    pub direction: Direction,
    /// Quantity per maker order (and per ledger layer)
    #[serde(default = "default_order_quantity")]
    pub order_quantity: Decimal,
    /// Maker venue price increment
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    /// Minimum quantity increment
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Spread required to open the first layer (price units)
    #[serde(default = "default_open_threshold")]
    pub open_threshold: Decimal,
    /// Spread required to close the oldest layer (price units)
    #[serde(default = "default_close_threshold")]
    pub close_threshold: Decimal,
    /// Extra spread required for each additional layer
    #[serde(default = "default_add_on_step")]
    pub add_on_step: Decimal,
    /// Maximum number of open layers
    #[serde(default = "default_max_layers")]
    pub max_layers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Maker venue fee as a fraction of notional
    #[serde(default = "default_maker_fee")]
    pub maker_fee: Decimal,
    /// Hedge venue (taker) fee as a fraction of notional
    #[serde(default = "default_hedge_fee")]
    pub hedge_fee: Decimal,
    /// Expected hedge slippage as a fraction of price
    #[serde(default = "default_slippage_buffer")]
    pub slippage_buffer: Decimal,
    /// Fixed cost per round trip (price units)
    #[serde(default)]
    pub fixed_cost: Decimal,
    /// Minimum profit per round trip on top of costs (price units)
    #[serde(default = "default_min_profit_margin")]
    pub min_profit_margin: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Cancel a resting maker order after this many seconds
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    /// Cancel when the maker top of book moves this far from the resting price
    #[serde(default = "default_max_price_drift")]
    pub max_price_drift: Decimal,
    /// Worst-price protection for hedge orders (0.01 = 1%)
    #[serde(default = "default_hedge_slippage")]
    pub hedge_slippage: Decimal,
    /// Attempts for a hedge submission on transient errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Base backoff between transient retries (multiplied by attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Polls of the hedge fill price before falling back to the reference
    #[serde(default = "default_fill_poll_attempts")]
    pub fill_poll_attempts: u32,
    /// Delay between fill price polls
    #[serde(default = "default_fill_poll_interval_ms")]
    pub fill_poll_interval_ms: u64,
    /// How far through the book a rollback order is priced (0.01 = 1%)
    #[serde(default = "default_rollback_aggression")]
    pub rollback_aggression: Decimal,
    /// Strategy loop period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Books older than this are treated as missing
    #[serde(default = "default_max_book_age_ms")]
    pub max_book_age_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Number of recent opening hedges tracked by the circuit breaker
    #[serde(default = "default_breaker_window")]
    pub breaker_window: usize,
    /// Failure fraction of the window above which the breaker trips (0.0-1.0)
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: Decimal,
    /// Whether closing-hedge outcomes enter the breaker window
    #[serde(default)]
    pub count_closing_failures: bool,
    /// Stop placing new maker orders after a failed closing hedge
    #[serde(default = "default_true")]
    pub halt_on_close_failure: bool,
    /// Maximum tolerated |maker + hedge| net position at startup
    #[serde(default = "default_reconciliation_epsilon")]
    pub reconciliation_epsilon: Decimal,
    /// Capital the drawdown is measured against
    #[serde(default = "default_capital")]
    pub capital: Decimal,
    /// Drawdown from peak equity that halts trading (0.15 = 15%)
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Depth stream for the maker venue
    #[serde(default)]
    pub maker_ws_url: String,
    /// Depth stream for the hedge venue
    #[serde(default)]
    pub hedge_ws_url: String,
    /// Subscription payload sent to the maker stream after connecting
    #[serde(default)]
    pub maker_subscribe_message: Option<String>,
    /// Subscription payload sent to the hedge stream after connecting
    #[serde(default)]
    pub hedge_subscribe_message: Option<String>,
    /// Delay before reconnecting a dropped feed
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Chat webhook receiving alert text (disabled when empty)
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Upper bound on a single notification attempt
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// SQLite audit database
    #[serde(default = "default_journal_path")]
    pub path: String,
}

// Default value functions
fn default_symbol() -> String {
    "BTC-PERP".to_string()
}

fn default_order_quantity() -> Decimal {
    Decimal::new(3, 3) // 0.003
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_lot_size() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn default_open_threshold() -> Decimal {
    Decimal::new(10, 0)
}

fn default_close_threshold() -> Decimal {
    Decimal::ZERO
}

fn default_add_on_step() -> Decimal {
    Decimal::new(5, 0)
}

fn default_max_layers() -> usize {
    5
}

fn default_maker_fee() -> Decimal {
    Decimal::ZERO // most perp DEX makers are free
}

fn default_hedge_fee() -> Decimal {
    Decimal::new(2, 4) // 0.0002 (0.02%)
}

fn default_slippage_buffer() -> Decimal {
    Decimal::new(1, 4) // 0.0001 (0.01%)
}

fn default_min_profit_margin() -> Decimal {
    Decimal::new(1, 0)
}

fn default_order_timeout() -> u64 {
    10
}

fn default_max_price_drift() -> Decimal {
    Decimal::new(5, 0)
}

fn default_hedge_slippage() -> Decimal {
    Decimal::new(1, 2) // 0.01 (1%)
}

fn default_max_retries() -> u8 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_fill_poll_attempts() -> u32 {
    5
}

fn default_fill_poll_interval_ms() -> u64 {
    300
}

fn default_rollback_aggression() -> Decimal {
    Decimal::new(1, 2) // 0.01 (1%)
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_max_book_age_ms() -> u64 {
    5_000
}

fn default_breaker_window() -> usize {
    10
}

fn default_breaker_failure_threshold() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

fn default_true() -> bool {
    true
}

fn default_reconciliation_epsilon() -> Decimal {
    Decimal::new(1, 6) // 0.000001
}

fn default_capital() -> Decimal {
    Decimal::new(1_000, 0)
}

fn default_max_drawdown() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

fn default_reconnect_backoff() -> u64 {
    5
}

fn default_notify_timeout() -> u64 {
    5
}

fn default_journal_path() -> String {
    "data/journal.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration using `path` (without extension) as the file source.
    pub fn load_from(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::default().separator("__").prefix("ARB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.market.order_quantity > Decimal::ZERO,
            "order_quantity must be positive"
        );

        anyhow::ensure!(
            self.market.tick_size > Decimal::ZERO && self.market.lot_size > Decimal::ZERO,
            "tick_size and lot_size must be positive"
        );

        anyhow::ensure!(
            self.ladder.add_on_step >= Decimal::ZERO,
            "add_on_step must not be negative"
        );

        anyhow::ensure!(self.ladder.max_layers >= 1, "max_layers must be at least 1");

        anyhow::ensure!(
            self.risk.breaker_window >= 1,
            "breaker_window must be at least 1"
        );

        anyhow::ensure!(
            self.risk.breaker_failure_threshold > Decimal::ZERO
                && self.risk.breaker_failure_threshold < Decimal::ONE,
            "breaker_failure_threshold must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.capital > Decimal::ZERO,
            "capital must be positive"
        );

        anyhow::ensure!(
            self.risk.max_drawdown > Decimal::ZERO && self.risk.max_drawdown <= Decimal::ONE,
            "max_drawdown must be in (0, 1]"
        );

        anyhow::ensure!(
            self.execution.hedge_slippage > Decimal::ZERO
                && self.execution.hedge_slippage < Decimal::new(5, 1),
            "hedge_slippage must be between 0 and 0.5"
        );

        anyhow::ensure!(
            self.execution.max_retries >= 1,
            "max_retries must be at least 1"
        );

        Ok(())
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            direction: Direction::default(),
            order_quantity: default_order_quantity(),
            tick_size: default_tick_size(),
            lot_size: default_lot_size(),
        }
    }
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            open_threshold: default_open_threshold(),
            close_threshold: default_close_threshold(),
            add_on_step: default_add_on_step(),
            max_layers: default_max_layers(),
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            maker_fee: default_maker_fee(),
            hedge_fee: default_hedge_fee(),
            slippage_buffer: default_slippage_buffer(),
            fixed_cost: Decimal::ZERO,
            min_profit_margin: default_min_profit_margin(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_secs: default_order_timeout(),
            max_price_drift: default_max_price_drift(),
            hedge_slippage: default_hedge_slippage(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fill_poll_attempts: default_fill_poll_attempts(),
            fill_poll_interval_ms: default_fill_poll_interval_ms(),
            rollback_aggression: default_rollback_aggression(),
            tick_interval_ms: default_tick_interval_ms(),
            max_book_age_ms: default_max_book_age_ms(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            breaker_window: default_breaker_window(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            count_closing_failures: false,
            halt_on_close_failure: default_true(),
            reconciliation_epsilon: default_reconciliation_epsilon(),
            capital: default_capital(),
            max_drawdown: default_max_drawdown(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            maker_ws_url: String::new(),
            hedge_ws_url: String::new(),
            maker_subscribe_message: None,
            hedge_subscribe_message: None,
            reconnect_backoff_secs: default_reconnect_backoff(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            notify_timeout_secs: default_notify_timeout(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
        }
    }
}
