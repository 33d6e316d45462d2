//! SQLite trade journal.
//!
//! Append-only audit trail of what the engine did:
//! - Maker fills (opening and closing)
//! - Hedge attempts with reference, worst and fill price
//! - FIFO closes with realised PnL
//!
//! The journal is never read back by the engine; the ledger is rebuilt from
//! venue positions at startup.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::exchange::MakerFill;
use crate::strategy::{HedgeAttemptResult, HedgePurpose};

/// Aggregates printed by the `status` command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JournalSummary {
    pub maker_fills: u64,
    pub hedge_attempts: u64,
    pub hedge_failures: u64,
    pub closes: u64,
    pub realized_pnl: Decimal,
}

impl JournalSummary {
    /// Fraction of hedge attempts that succeeded (1 when there were none).
    pub fn hedge_success_rate(&self) -> Decimal {
        if self.hedge_attempts == 0 {
            return Decimal::ONE;
        }
        Decimal::from(self.hedge_attempts - self.hedge_failures) / Decimal::from(self.hedge_attempts)
    }
}

pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    /// Open (or create) the journal at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open journal at {:?}", db_path.as_ref()))?;

        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.init_schema()?;

        info!("Trade journal opened at {:?}", db_path.as_ref());
        Ok(journal)
    }

    pub fn in_memory() -> Result<Self> {
        let journal = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS maker_fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                order_id TEXT NOT NULL,
                side TEXT NOT NULL,
                purpose TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fills_timestamp ON maker_fills(timestamp);

            CREATE TABLE IF NOT EXISTS hedge_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                client_ref TEXT NOT NULL,
                purpose TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                reference_price TEXT NOT NULL,
                worst_price TEXT NOT NULL,
                fill_price TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_hedges_timestamp ON hedge_attempts(timestamp);

            CREATE TABLE IF NOT EXISTS closes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                quantity TEXT NOT NULL,
                close_price TEXT NOT NULL,
                hedge_price TEXT,
                realized_pnl TEXT NOT NULL
            );
            "#,
        )?;
        debug!("Journal schema initialized");
        Ok(())
    }

    pub fn record_maker_fill(&self, fill: &MakerFill, purpose: HedgePurpose) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO maker_fills (timestamp, order_id, side, purpose, quantity, price)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                fill.timestamp.to_rfc3339(),
                fill.order_id.as_str(),
                fill.side.as_str(),
                purpose.as_str(),
                fill.quantity.to_string(),
                fill.price.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn record_hedge(&self, result: &HedgeAttemptResult, purpose: HedgePurpose) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO hedge_attempts (timestamp, client_ref, purpose, side, quantity,
                                        reference_price, worst_price, fill_price, success, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                Utc::now().to_rfc3339(),
                result.client_ref.as_str(),
                purpose.as_str(),
                result.side.as_str(),
                result.quantity.to_string(),
                result.reference_price.to_string(),
                result.worst_price.to_string(),
                result.fill_price.to_string(),
                result.success,
                result.error,
            ],
        )?;
        Ok(())
    }

    pub fn record_close(
        &self,
        quantity: Decimal,
        close_price: Decimal,
        hedge_price: Option<Decimal>,
        realized_pnl: Decimal,
    ) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO closes (timestamp, quantity, close_price, hedge_price, realized_pnl)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                Utc::now().to_rfc3339(),
                quantity.to_string(),
                close_price.to_string(),
                hedge_price.map(|p| p.to_string()),
                realized_pnl.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn summary(&self) -> Result<JournalSummary> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        let maker_fills = count("SELECT COUNT(*) FROM maker_fills")?;
        let hedge_attempts = count("SELECT COUNT(*) FROM hedge_attempts")?;
        let hedge_failures = count("SELECT COUNT(*) FROM hedge_attempts WHERE success = 0")?;
        let closes = count("SELECT COUNT(*) FROM closes")?;

        // PnL is summed as Decimal, not SQLite REAL
        let mut stmt = conn.prepare("SELECT realized_pnl FROM closes")?;
        let realized_pnl = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .map(|s| Decimal::from_str(&s).unwrap_or_default())
            .sum();

        Ok(JournalSummary {
            maker_fills,
            hedge_attempts,
            hedge_failures,
            closes,
            realized_pnl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ClientRef, OrderId, OrderSide};
    use rust_decimal_macros::dec;

    fn attempt(success: bool) -> HedgeAttemptResult {
        HedgeAttemptResult {
            success,
            fill_price: if success { dec!(101) } else { Decimal::ZERO },
            client_ref: ClientRef::generate("test"),
            side: OrderSide::Sell,
            quantity: dec!(0.01),
            reference_price: dec!(101),
            worst_price: dec!(99.99),
            error: (!success).then(|| "rejected".to_string()),
        }
    }

    #[test]
    fn test_empty_summary() {
        let journal = TradeJournal::in_memory().unwrap();
        let summary = journal.summary().unwrap();
        assert_eq!(summary, JournalSummary::default());
        assert_eq!(summary.hedge_success_rate(), Decimal::ONE);
    }

    #[test]
    fn test_summary_aggregates_records() {
        let journal = TradeJournal::in_memory().unwrap();
        let fill = MakerFill::new(OrderId::new("1"), OrderSide::Buy, dec!(0.01), dec!(100));

        journal.record_maker_fill(&fill, HedgePurpose::Open).unwrap();
        journal.record_hedge(&attempt(true), HedgePurpose::Open).unwrap();
        journal.record_hedge(&attempt(false), HedgePurpose::Open).unwrap();
        journal.record_hedge(&attempt(true), HedgePurpose::Close).unwrap();
        journal
            .record_close(dec!(0.01), dec!(102), Some(dec!(100)), dec!(0.04))
            .unwrap();
        journal
            .record_close(dec!(0.01), dec!(99), None, dec!(-0.015))
            .unwrap();

        let summary = journal.summary().unwrap();
        assert_eq!(summary.maker_fills, 1);
        assert_eq!(summary.hedge_attempts, 3);
        assert_eq!(summary.hedge_failures, 1);
        assert_eq!(summary.closes, 2);
        assert_eq!(summary.realized_pnl, dec!(0.025));
    }

    #[test]
    fn test_file_journal_persists() {
        let dir = std::env::temp_dir().join(format!("spread-arb-journal-{}", std::process::id()));
        let path = dir.join("journal.db");
        {
            let journal = TradeJournal::new(&path).unwrap();
            journal
                .record_close(dec!(0.01), dec!(102), None, dec!(0.02))
                .unwrap();
        }
        let reopened = TradeJournal::new(&path).unwrap();
        assert_eq!(reopened.summary().unwrap().closes, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
