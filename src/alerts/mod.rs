//! Operator alerts.
//!
//! Every alert is emitted as a structured JSON line on the `risk_alert` log
//! target and then forwarded, best-effort, to an optional [`Notifier`].
//! Notification failures are logged and swallowed; they never block trading.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::exchange::OrderSide;

/// Alerts kept in memory for status reporting.
const MAX_RECENT_ALERTS: usize = 100;

/// What went wrong.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum AlertKind {
    /// Opening hedge failed; rollback attempted.
    OpenHedgeFailure {
        side: OrderSide,
        quantity: Decimal,
        reason: String,
    },
    /// Rollback order failed; maker exposure is naked.
    RollbackFailure { quantity: Decimal, reason: String },
    /// Closing hedge failed; ledger left untouched.
    CloseHedgeFailure {
        side: OrderSide,
        quantity: Decimal,
        reason: String,
    },
    /// Too many failed hedges in the rolling window.
    BreakerTripped { failures: usize, window: usize },
    /// Venue positions do not net to zero at startup.
    ReconciliationMismatch { maker: Decimal, hedge: Decimal },
    /// Startup reconciliation failed for any other reason.
    ReconciliationFailure { reason: String },
    /// Realised drawdown reached the configured limit.
    DrawdownHalt { drawdown: Decimal, limit: Decimal },
    /// Closing fill larger than the ledger.
    UnmatchedClose { quantity: Decimal },
    /// Market data stream dropped.
    FeedDisconnected { venue: String },
}

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    /// Trading cannot resume without a human.
    pub requires_operator: bool,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        requires_operator: bool,
    ) -> Self {
        let timestamp = Utc::now();
        let alert_id = format!("alert-{}-{}", timestamp.timestamp(), rand_suffix());

        Self {
            alert_id,
            timestamp,
            kind,
            severity,
            message: message.into(),
            requires_operator,
        }
    }

    pub fn critical(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(kind, AlertSeverity::Critical, message, true)
    }

    /// Emit alert as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Info => info!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Warning => warn!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(target: "risk_alert", "RISK_ALERT: {}", json)
            }
        }
    }

    /// One-line text for chat notifications.
    pub fn to_text(&self) -> String {
        let suffix = if self.requires_operator {
            " (operator action required)"
        } else {
            ""
        };
        format!("[{}] {}{}", self.severity.as_str(), self.message, suffix)
    }
}

fn rand_suffix() -> String {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}

/// Outbound alert channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Posts `{"text": message}` to a chat webhook.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.http
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await
            .context("Webhook request failed")?
            .error_for_status()
            .context("Webhook returned error status")?;
        Ok(())
    }
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!(%message, "Notification");
        Ok(())
    }
}

/// Logs alerts, remembers recent ones and forwards them to the notifier.
pub struct Alerter {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    recent: Mutex<VecDeque<Alert>>,
}

impl Alerter {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Alerter that only logs.
    pub fn log_only() -> Self {
        Self::new(Arc::new(LogNotifier), Duration::from_secs(5))
    }

    fn record(&self, alert: &Alert) {
        alert.emit();
        let mut recent = self.recent.lock();
        recent.push_back(alert.clone());
        while recent.len() > MAX_RECENT_ALERTS {
            recent.pop_front();
        }
    }

    /// Log the alert and notify in the background.
    ///
    /// Outside a Tokio runtime the notification is skipped.
    pub fn raise(self: &Arc<Self>, alert: Alert) {
        self.record(&alert);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move {
                    this.deliver(&alert).await;
                });
            }
            Err(_) => debug!(alert_id = %alert.alert_id, "No runtime, notification skipped"),
        }
    }

    /// Log the alert and wait for the notification to finish or time out.
    pub async fn dispatch(&self, alert: Alert) {
        self.record(&alert);
        self.deliver(&alert).await;
    }

    async fn deliver(&self, alert: &Alert) {
        let text = alert.to_text();
        match tokio::time::timeout(self.timeout, self.notifier.notify(&text)).await {
            Ok(Ok(())) => debug!(alert_id = %alert.alert_id, "Alert delivered"),
            Ok(Err(e)) => warn!(alert_id = %alert.alert_id, error = %e, "Alert delivery failed"),
            Err(_) => warn!(alert_id = %alert.alert_id, "Alert delivery timed out"),
        }
    }

    pub fn recent(&self) -> Vec<Alert> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.recent.lock().len()
    }
}
