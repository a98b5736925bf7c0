//! Exports: CSV summary tables, JSON documents and the SQLite `facts` table

use crate::error::Result;
use crate::scoring::{EnrichedRow, UserRiskProfile};
use crate::summary::SummaryRow;
use crate::types::Transaction;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

fn float(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        format!("{:.6}", v)
    }
}

/// Write a summary table; group key names become the leading columns
pub fn write_summary_csv<W: Write>(writer: W, rows: &[SummaryRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    if let Some(first) = rows.first() {
        let mut header: Vec<&str> = first.keys.clone();
        header.extend([
            "attempts",
            "approved",
            "success_rate",
            "success_std",
            "margin_of_error",
            "ci_lower",
            "ci_upper",
            "significant",
            "mean_amount",
            "std_amount",
        ]);
        csv.write_record(&header)?;
    }

    for row in rows {
        let mut record: Vec<String> = row.group.iter().map(|v| v.to_string()).collect();
        record.extend([
            row.attempts.to_string(),
            row.approved.to_string(),
            float(row.success_rate),
            float(row.success_std),
            float(row.margin_of_error),
            float(row.ci_lower),
            float(row.ci_upper),
            row.significant.to_string(),
            float(row.mean_amount),
            float(row.std_amount),
        ]);
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(())
}

pub fn write_profiles_csv<W: Write>(writer: W, profiles: &[UserRiskProfile]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([
        "user_key",
        "transactions",
        "approved",
        "success_rate",
        "total_score",
        "mean_score",
        "max_score",
        "velocity",
        "risk_tier",
        "countries",
    ])?;
    for p in profiles {
        csv.write_record([
            p.user_key.clone(),
            p.transactions.to_string(),
            p.approved.to_string(),
            float(p.success_rate),
            float(p.total_score),
            float(p.mean_score),
            float(p.max_score),
            float(p.velocity),
            p.risk_tier.to_string(),
            p.countries.join("|"),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Per-row scores with the fired indicators
pub fn write_scores_csv<W: Write>(writer: W, rows: &[EnrichedRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([
        "transaction_id",
        "user_key",
        "created_at",
        "amount",
        "risk_score",
        "risk_tier",
        "indicators",
    ])?;
    for row in rows {
        csv.write_record([
            row.tx.transaction_id.clone(),
            row.risk.user_key.clone().unwrap_or_default(),
            row.tx.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            row.tx.amount.map(|a| a.to_string()).unwrap_or_default(),
            float(row.risk.risk_score),
            row.risk.risk_tier.to_string(),
            row.risk.indicators.triggered_names().join("|"),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// One CSV row per record, header taken from the field names
pub fn write_records_csv<W: Write, T: Serialize>(writer: W, records: &[T]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(record)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Open `path` for writing and hand a buffered writer to `write`
pub fn write_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(BufWriter<File>) -> Result<()>,
{
    write(BufWriter::new(File::create(path)?))
}

const FACTS_SCHEMA: &str = "
    DROP TABLE IF EXISTS facts;
    CREATE TABLE facts (
        created_at       TEXT NOT NULL,
        status           TEXT,
        gateway_code     TEXT,
        gateway_message  TEXT,
        bin_country      TEXT,
        ip_country       TEXT,
        ip               TEXT,
        billing_country  TEXT,
        billing_zip      TEXT,
        billing_city     TEXT,
        billing_address  TEXT,
        browser_language TEXT
    );";

const FACTS_INDEXES: &str = "
    CREATE INDEX idx_facts_created ON facts(created_at);
    CREATE INDEX idx_facts_bin ON facts(bin_country);
    CREATE INDEX idx_facts_bill ON facts(billing_country);
    CREATE INDEX idx_facts_ip ON facts(ip_country);
    CREATE INDEX idx_facts_code ON facts(gateway_code);";

/// SQLite database holding the flat `facts` table
pub struct FactsStore {
    conn: Connection,
}

impl FactsStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Replace the `facts` table. Rows without a timestamp are dropped.
    pub fn write_facts(&mut self, transactions: &[Transaction]) -> Result<usize> {
        let db = self.conn.transaction()?;
        db.execute_batch(FACTS_SCHEMA)?;

        let mut written = 0;
        {
            let mut stmt = db.prepare(
                "INSERT INTO facts (created_at, status, gateway_code, gateway_message, bin_country,
                                    ip_country, ip, billing_country, billing_zip, billing_city,
                                    billing_address, browser_language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for tx in transactions {
                let Some(created_at) = tx.created_at else {
                    continue;
                };
                stmt.execute(params![
                    created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    tx.status_title,
                    tx.gateway_code,
                    tx.gateway_message,
                    tx.bin_country,
                    tx.effective_ip_country(),
                    tx.effective_ip(),
                    tx.effective_billing_country(),
                    tx.body.billing_zip,
                    tx.body.billing_city,
                    tx.body.billing_address1,
                    tx.effective_language(),
                ])?;
                written += 1;
            }
        }

        db.execute_batch(FACTS_INDEXES)?;
        db.commit()?;

        info!(rows = written, dropped = transactions.len() - written, "facts table written");
        Ok(written)
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM facts", [], |row| row.get(0))?)
    }

    /// Names of the indexes on `facts`
    pub fn indexes(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'facts' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
