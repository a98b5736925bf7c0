//! CSV ingestion: column detection and per-cell normalisation
//!
//! Header names vary between gateway exports, so every logical column is found by
//! trying a list of candidate names. Unparseable cells become `None` and are counted;
//! only an unreadable or empty file is an error.

use crate::error::{AnalyticsError, Result};
use crate::normalizer::normalize_iso2;
use crate::types::Transaction;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const CREATED_AT: &[&str] = &["created_at", "createdat", "created", "timestamp", "date"];
const STATUS: &[&str] = &["status_title", "status", "payment_status_code"];
const IS_FINAL: &[&str] = &["is_final", "final"];
const GATEWAY_CODE: &[&str] = &["gateway_code", "response_code", "decline_code"];
const GATEWAY_MESSAGE: &[&str] = &["gateway_message", "message", "gateway_text", "decline_reason"];
const GATEWAY_NAME: &[&str] = &["gateway_name", "gateway", "processor"];
const AMOUNT: &[&str] = &["amount", "amount_total", "total"];
const CURRENCY: &[&str] = &["currency", "currency_code"];
const ID: &[&str] = &["id", "transaction_id", "payment_id"];
const EMAIL: &[&str] = &["user_email", "email", "customer_email"];
const BIN_COUNTRY: &[&str] = &["bin_country", "bin_country_iso", "issuer_country"];
const BILLING_COUNTRY: &[&str] = &["billing_country", "billing_country_iso"];
const IP_COUNTRY: &[&str] = &["ip_country", "ip_country_iso", "geo_country"];
const IP: &[&str] = &["ip", "client_ip", "ip_address"];
const USER_AGENT: &[&str] = &["user_agent", "browser_user_agent"];
const ACCEPT_LANGUAGE: &[&str] = &["accept_language", "browser_language"];
const JSON_COLUMNS: &[&str] = &["body", "request_payload", "response_payload"];

/// Index of the first header matching a candidate (case-insensitive, exact or `.name` suffix)
pub fn pick_first_col(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|cand| {
        let suffix = format!(".{}", cand);
        headers.iter().position(|h| {
            let h = h.trim().to_lowercase();
            h == *cand || h.ends_with(&suffix)
        })
    })
}

/// Positions of the logical columns in the input file
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    pub headers: Vec<String>,
    pub created_at: Option<usize>,
    pub status: Option<usize>,
    pub is_final: Option<usize>,
    pub gateway_code: Option<usize>,
    pub gateway_message: Option<usize>,
    pub gateway_name: Option<usize>,
    pub amount: Option<usize>,
    pub currency: Option<usize>,
    pub id: Option<usize>,
    pub email: Option<usize>,
    pub bin_country: Option<usize>,
    pub billing_country: Option<usize>,
    pub ip_country: Option<usize>,
    pub ip: Option<usize>,
    pub user_agent: Option<usize>,
    pub accept_language: Option<usize>,
    /// JSON payload columns in priority order
    pub json: Vec<usize>,
}

impl ColumnMap {
    pub fn detect(headers: &[String]) -> Self {
        let pick = |candidates: &[&str]| pick_first_col(headers, candidates);
        Self {
            headers: headers.to_vec(),
            created_at: pick(CREATED_AT),
            status: pick(STATUS),
            is_final: pick(IS_FINAL),
            gateway_code: pick(GATEWAY_CODE),
            gateway_message: pick(GATEWAY_MESSAGE),
            gateway_name: pick(GATEWAY_NAME),
            amount: pick(AMOUNT),
            currency: pick(CURRENCY),
            id: pick(ID),
            email: pick(EMAIL),
            bin_country: pick(BIN_COUNTRY),
            billing_country: pick(BILLING_COUNTRY),
            ip_country: pick(IP_COUNTRY),
            ip: pick(IP),
            user_agent: pick(USER_AGENT),
            accept_language: pick(ACCEPT_LANGUAGE),
            json: JSON_COLUMNS
                .iter()
                .filter_map(|c| pick_first_col(headers, &[c]))
                .collect(),
        }
    }

    /// `MissingColumn` for the first required column that was not found
    pub fn require(&self, required: &[(&str, Option<usize>)]) -> Result<()> {
        match required.iter().find(|(_, idx)| idx.is_none()) {
            Some((name, _)) => Err(AnalyticsError::missing(name)),
            None => Ok(()),
        }
    }

    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }
}

/// One input row plus its raw JSON payload cells
#[derive(Debug, Clone)]
pub struct LoadedRow {
    pub transaction: Transaction,
    pub payloads: Vec<Option<String>>,
}

/// Parsed input file
#[derive(Debug, Clone)]
pub struct Dataset {
    pub columns: ColumnMap,
    pub rows: Vec<LoadedRow>,
    /// Non-empty created_at cells that did not parse
    pub timestamp_failures: u64,
    /// Non-empty amount cells that did not parse
    pub amount_failures: u64,
}

pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let dataset = read_csv(file)?;
    info!(
        path = %path.display(),
        rows = dataset.rows.len(),
        columns = dataset.columns.headers.len(),
        "Input loaded"
    );
    Ok(dataset)
}

pub fn read_csv<R: Read>(reader: R) -> Result<Dataset> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = csv.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AnalyticsError::EmptyInput);
    }

    let columns = ColumnMap::detect(&headers);
    debug!(?columns, "Detected columns");

    let mut rows = Vec::new();
    let mut timestamp_failures = 0;
    let mut amount_failures = 0;

    for (row_index, record) in csv.records().enumerate() {
        let record = record?;
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty() && !is_null_token(s))
                .map(str::to_string)
        };

        let mut tx = Transaction::new(cell(columns.id).unwrap_or_else(|| (row_index + 1).to_string()));
        tx.row_index = row_index;

        if let Some(raw) = cell(columns.created_at) {
            tx.created_at = parse_timestamp(&raw);
            if tx.created_at.is_none() {
                timestamp_failures += 1;
                debug!(transaction_id = %tx.transaction_id, value = %raw, "Unparseable created_at");
            }
        }
        if let Some(raw) = cell(columns.amount) {
            tx.amount = parse_amount(&raw);
            if tx.amount.is_none() {
                amount_failures += 1;
                debug!(transaction_id = %tx.transaction_id, value = %raw, "Unparseable amount");
            }
        }

        tx.status_title = cell(columns.status);
        tx.is_final = cell(columns.is_final).and_then(|v| parse_bool(&v));
        tx.gateway_code = cell(columns.gateway_code);
        tx.gateway_message = cell(columns.gateway_message);
        tx.gateway_name = cell(columns.gateway_name);
        tx.currency = cell(columns.currency);
        tx.user_email = cell(columns.email);
        let country = |idx: Option<usize>| cell(idx).and_then(|c| normalize_iso2(&c));
        tx.bin_country = country(columns.bin_country);
        tx.billing_country = country(columns.billing_country);
        tx.ip_country = country(columns.ip_country);
        tx.ip_address = cell(columns.ip);
        tx.user_agent = cell(columns.user_agent);
        tx.accept_language = cell(columns.accept_language);

        let payloads = columns.json.iter().map(|&i| cell(Some(i))).collect();
        rows.push(LoadedRow {
            transaction: tx,
            payloads,
        });
    }

    if rows.is_empty() {
        return Err(AnalyticsError::EmptyInput);
    }

    Ok(Dataset {
        columns,
        rows,
        timestamp_failures,
        amount_failures,
    })
}

fn is_null_token(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "nan" | "null" | "none" | "nat")
}

/// Parse the timestamp layouts seen in gateway exports. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%d.%m.%Y %H:%M:%S",
    ];
    const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f %z"];

    let s = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(s, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| Utc.from_utc_datetime(&d));
    }
    // epoch seconds or milliseconds
    if let Ok(epoch) = s.parse::<i64>() {
        return if epoch.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    None
}

fn is_currency_affix(c: char) -> bool {
    c.is_alphabetic()
        || c.is_whitespace()
        || matches!(c, '$' | '€' | '£' | '¥' | '₽' | '₴' | '₹' | '₺' | '₩' | '¢')
}

/// Decimal amount with `.` as the decimal point.
///
/// A currency code or symbol around the number and whitespace grouping are removed.
/// `,` is accepted only as a thousands separator in front of a `.` decimal part
/// (`1,978.00`); anything else with a comma (`1.978,00`, `1 978,50`, `1,978`) is
/// ambiguous and gives `None`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut s = raw.trim_matches(is_currency_affix);
    let negative = s.starts_with('-');
    if negative {
        s = s[1..].trim_matches(is_currency_affix);
    }

    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || !compact.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | ',')) {
        return None;
    }

    let number = if compact.contains(',') {
        let (int_part, frac_part) = compact.split_once('.')?;
        let mut groups = int_part.split(',');
        let lead = groups.next()?;
        let lead_ok = (1..=3).contains(&lead.len());
        if !lead_ok || !groups.all(|g| g.len() == 3) || frac_part.contains(',') {
            return None;
        }
        format!("{}.{}", int_part.replace(',', ""), frac_part)
    } else {
        compact
    };

    let value = number.parse::<f64>().ok().filter(|a| a.is_finite())?;
    Some(if negative { -value } else { value })
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "1.0" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "0.0" => Some(false),
        _ => None,
    }
}
