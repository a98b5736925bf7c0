//! Data-quality checks: missing attributes and cross-source country mismatches

use crate::scoring::EnrichedRow;
use crate::types::Transaction;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MissingStat {
    pub field: &'static str,
    pub missing: u64,
    pub missing_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MismatchStat {
    pub pair: &'static str,
    /// Rows where both sides are present
    pub compared: u64,
    pub mismatched: u64,
    /// NaN when no row has both sides
    pub mismatch_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataQuality {
    pub rows: u64,
    pub missing: Vec<MissingStat>,
    pub mismatches: Vec<MismatchStat>,
}

type Field = fn(&Transaction) -> Option<&str>;

const FIELDS: &[(&str, Field)] = &[
    ("bin_country", |t| t.bin_country.as_deref()),
    ("billing_country", |t| t.effective_billing_country()),
    ("shipping_country", |t| t.shipping_country()),
    ("ip_country", |t| t.effective_ip_country()),
    ("user_agent", |t| t.effective_user_agent()),
    ("accept_language", |t| t.effective_language()),
    ("billing_zip", |t| t.body.billing_zip.as_deref()),
    ("billing_city", |t| t.body.billing_city.as_deref()),
    ("billing_address", |t| t.body.billing_address1.as_deref()),
];

const PAIRS: &[(&str, Field, Field)] = &[
    ("bin_vs_billing", |t| t.bin_country.as_deref(), |t| t.effective_billing_country()),
    ("bin_vs_ip", |t| t.bin_country.as_deref(), |t| t.effective_ip_country()),
    ("billing_vs_ip", |t| t.effective_billing_country(), |t| t.effective_ip_country()),
];

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        f64::NAN
    } else {
        100.0 * part as f64 / whole as f64
    }
}

pub fn data_quality(rows: &[EnrichedRow]) -> DataQuality {
    let total = rows.len() as u64;

    let missing = FIELDS
        .iter()
        .map(|&(field, get)| {
            let missing = rows.iter().filter(|r| present(get(&r.tx)).is_none()).count() as u64;
            MissingStat {
                field,
                missing,
                missing_pct: pct(missing, total),
            }
        })
        .collect();

    let mismatches = PAIRS
        .iter()
        .map(|&(pair, left, right)| {
            let mut compared = 0;
            let mut mismatched = 0;
            for row in rows {
                if let (Some(a), Some(b)) = (present(left(&row.tx)), present(right(&row.tx))) {
                    compared += 1;
                    if !a.eq_ignore_ascii_case(b) {
                        mismatched += 1;
                    }
                }
            }
            MismatchStat {
                pair,
                compared,
                mismatched,
                mismatch_pct: pct(mismatched, compared),
            }
        })
        .collect();

    DataQuality {
        rows: total,
        missing,
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_mismatch() {
        let mut a = Transaction::new("a");
        a.bin_country = Some("US".to_string());
        a.billing_country = Some("us".to_string());
        let mut b = Transaction::new("b");
        b.bin_country = Some("DE".to_string());
        b.billing_country = Some("FR".to_string());
        let c = Transaction::new("c");

        let rows: Vec<EnrichedRow> = [a, b, c].into_iter().map(EnrichedRow::unscored).collect();
        let quality = data_quality(&rows);

        assert_eq!(quality.rows, 3);
        let bin = quality.missing.iter().find(|m| m.field == "bin_country").unwrap();
        assert_eq!(bin.missing, 1);
        assert!((bin.missing_pct - 100.0 / 3.0).abs() < 1e-9);

        let bin_billing = &quality.mismatches[0];
        assert_eq!(bin_billing.compared, 2);
        assert_eq!(bin_billing.mismatched, 1);
        assert!((bin_billing.mismatch_pct - 50.0).abs() < 1e-9);

        // no row has an IP country
        assert!(quality.mismatches[2].mismatch_pct.is_nan());
    }
}
