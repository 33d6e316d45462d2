//! Spread Arb - Main Entry Point
//!
//! Runs the engine against paper venues fed by live depth streams.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use spread_arb::alerts::{Alert, AlertKind, AlertSeverity, Alerter, WebhookNotifier};
use spread_arb::config::Config;
use spread_arb::exchange::{
    BookFeed, FeedEvent, HedgeVenue, MakerEvent, MakerVenue, PaperHedgeVenue, PaperMakerVenue,
    Venue,
};
use spread_arb::market::MarketDataCache;
use spread_arb::persistence::TradeJournal;
use spread_arb::strategy::{ArbEngine, EngineSnapshot, TickOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// How often the engine state is logged.
const STATUS_INTERVAL_SECS: u64 = 60;

/// How long shutdown waits for in-flight hedges.
const SHUTDOWN_GRACE_SECS: u64 = 10;

/// Spread Arb CLI
#[derive(Parser)]
#[command(name = "spread-arb")]
#[command(version, about = "Two-venue maker/hedge spread arbitrage")]
struct Cli {
    /// Config file path without extension
    #[arg(short, long, global = true, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against paper venues (default)
    Run,

    /// Show trade journal statistics
    Status {
        /// Path to SQLite journal (default: data/journal.db)
        #[arg(short, long, default_value = "data/journal.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db }) => show_status(&db),
        Some(Commands::Run) | None => run(&cli.config).await,
    }
}

async fn run(config_path: &str) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Spread Arb v{} - Paper Trading                 ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load_from(config_path)?;
    config.validate()?;
    log_config(&config);

    let alerter = Arc::new(build_alerter(&config)?);
    let journal = Arc::new(TradeJournal::new(&config.journal.path)?);
    let cache = Arc::new(MarketDataCache::new());

    let (maker_venue, mut maker_events) = PaperMakerVenue::new(Arc::clone(&cache));
    let maker_venue = Arc::new(maker_venue);
    let hedge_venue = Arc::new(PaperHedgeVenue::new(Arc::clone(&cache)));

    let engine = Arc::new(ArbEngine::new(
        &config,
        Arc::clone(&cache),
        Arc::clone(&maker_venue) as Arc<dyn MakerVenue>,
        hedge_venue as Arc<dyn HedgeVenue>,
        Arc::clone(&alerter),
        Some(Arc::clone(&journal)),
    ));

    // Depth feeds
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (feed_tx, mut feed_events) = mpsc::unbounded_channel();
    let backoff = Duration::from_secs(config.feeds.reconnect_backoff_secs);
    let feeds = vec![
        tokio::spawn(
            BookFeed::new(
                Venue::Maker,
                config.feeds.maker_ws_url.clone(),
                config.feeds.maker_subscribe_message.clone(),
                backoff,
                Arc::clone(&cache),
            )
            .run(feed_tx.clone(), shutdown_rx.clone()),
        ),
        tokio::spawn(
            BookFeed::new(
                Venue::Hedge,
                config.feeds.hedge_ws_url.clone(),
                config.feeds.hedge_subscribe_message.clone(),
                backoff,
                Arc::clone(&cache),
            )
            .run(feed_tx, shutdown_rx),
        ),
    ];

    engine
        .start()
        .await
        .context("Startup reconciliation failed")?;

    let mut ticker = tokio::time::interval(Duration::from_millis(config.execution.tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("🚀 Starting main trading loop...");
    let mut halt_reported = false;

    loop {
        // Maker events go first so a queued fill is registered before the next tick
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("🛑 Shutdown signal received");
                break;
            }
            Some(event) = maker_events.recv() => match event {
                MakerEvent::Fill(fill) => {
                    engine.spawn_fill(fill);
                }
                MakerEvent::Closed(order_id) => engine.on_maker_order_closed(&order_id),
            },
            Some(event) = feed_events.recv() => match event {
                FeedEvent::Updated(Venue::Maker) => {
                    maker_venue.match_resting();
                }
                FeedEvent::Updated(Venue::Hedge) => {}
                FeedEvent::Connected(venue) => info!(%venue, "📡 Depth feed connected"),
                FeedEvent::Disconnected(venue) => alerter.raise(Alert::new(
                    AlertKind::FeedDisconnected {
                        venue: venue.to_string(),
                    },
                    AlertSeverity::Warning,
                    format!("{} depth feed disconnected", venue),
                    false,
                )),
            },
            _ = ticker.tick() => match engine.tick().await {
                TickOutcome::Halted if !halt_reported => {
                    warn!("⛔ Trading halted, operator action required");
                    halt_reported = true;
                }
                outcome => debug!(?outcome, "Tick"),
            },
            _ = status.tick() => log_snapshot(&engine.snapshot()),
        }
    }

    let _ = shutdown_tx.send(true);
    engine
        .shutdown(Duration::from_secs(SHUTDOWN_GRACE_SECS))
        .await;
    for feed in feeds {
        let _ = feed.await;
    }

    log_snapshot(&engine.snapshot());
    match journal.summary() {
        Ok(summary) => info!(
            maker_fills = summary.maker_fills,
            hedge_attempts = summary.hedge_attempts,
            hedge_failures = summary.hedge_failures,
            realized_pnl = %summary.realized_pnl,
            "📒 Journal summary"
        ),
        Err(e) => warn!(error = %e, "Failed to read journal summary"),
    }
    info!("👋 Spread Arb shutdown complete");
    Ok(())
}

fn build_alerter(config: &Config) -> Result<Alerter> {
    let timeout = Duration::from_secs(config.alerts.notify_timeout_secs);
    match &config.alerts.webhook_url {
        Some(url) => {
            info!("🔔 Webhook notifications enabled");
            let notifier = WebhookNotifier::new(url.clone(), timeout)?;
            Ok(Alerter::new(Arc::new(notifier), timeout))
        }
        None => Ok(Alerter::log_only()),
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "spread-arb.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("spread_arb=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Symbol: {}", config.market.symbol);
    info!("   Direction: {}", config.market.direction);
    info!("   Order Quantity: {}", config.market.order_quantity);
    info!(
        "   Ladder: open {} / close {} / step {} / max {} layers",
        config.ladder.open_threshold,
        config.ladder.close_threshold,
        config.ladder.add_on_step,
        config.ladder.max_layers
    );
    info!(
        "   Hedge Slippage: {:.2}%",
        config.execution.hedge_slippage * dec!(100)
    );
    info!(
        "   Breaker: {:.0}% of {} hedges",
        config.risk.breaker_failure_threshold * dec!(100),
        config.risk.breaker_window
    );
    info!(
        "   Max Drawdown: {:.0}% of {}",
        config.risk.max_drawdown * dec!(100),
        config.risk.capital
    );
    info!("   Journal: {}", config.journal.path);
}

fn log_snapshot(snapshot: &EngineSnapshot) {
    info!(
        layers = snapshot.layer_count,
        open_quantity = %snapshot.open_quantity,
        hedged_quantity = %snapshot.hedged_quantity,
        realized_pnl = %snapshot.realized_pnl,
        maker_state = snapshot.maker_state,
        hedges_in_flight = snapshot.hedges_in_flight,
        breaker_failures = snapshot.breaker.failures,
        drawdown = %snapshot.drawdown,
        halted = snapshot.halted,
        "📊 [STATUS]"
    );
}

/// Print journal statistics.
fn show_status(db_path: &str) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              SPREAD ARB JOURNAL                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Journal not found: {}", db_path);
        println!("   The engine has not been started yet, or the path is incorrect.");
        return Ok(());
    }

    let summary = TradeJournal::new(db_path)?.summary()?;

    println!("\n📈 Activity");
    println!("   ├─ Maker Fills:      {}", summary.maker_fills);
    println!("   ├─ Hedge Attempts:   {}", summary.hedge_attempts);
    println!("   ├─ Hedge Failures:   {}", summary.hedge_failures);
    println!(
        "   └─ Hedge Success:    {:.1}%",
        summary.hedge_success_rate() * dec!(100)
    );

    println!("\n💰 Results");
    println!("   ├─ Closes:           {}", summary.closes);
    println!("   └─ Realized PnL:     {:.4}", summary.realized_pnl);

    Ok(())
}
