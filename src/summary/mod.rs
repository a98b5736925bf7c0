//! Grouped success-rate statistics
//!
//! Groups are keyed by one or more categorical attributes and kept in a `BTreeMap`,
//! so the output order depends only on the key values and never on input order.

pub mod anomaly;
pub mod declines;
pub mod periods;
pub mod quality;
pub mod reasons;

pub use anomaly::{anomaly_scores, numeric_anomalies, AnomalyMethod, AnomalySummary, NumericColumn};
pub use declines::{decline_catalog, DeclineEntry};
pub use periods::{period_metrics, GeoSource, Granularity, PeriodMetric};
pub use quality::{data_quality, DataQuality};
pub use reasons::{declines_by_reason, drivers_for_last_period, DeclineDriver, DeclineReason};

use crate::error::{AnalyticsError, Result};
use crate::feature_extractor::Indicator;
use crate::scoring::EnrichedRow;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// z for a two-sided 95% interval
pub const Z_95: f64 = 1.96;

/// Categorical attribute to group by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    BinCountry,
    BillingCountry,
    IpCountry,
    ShippingCountry,
    Gateway,
    GatewayCode,
    Currency,
    HourOfDay,
    DayOfWeek,
    BrowserFamily,
    CardBrand,
    RiskTier,
    GeoMismatch,
}

impl GroupKey {
    pub fn name(&self) -> &'static str {
        match self {
            GroupKey::BinCountry => "bin_country",
            GroupKey::BillingCountry => "billing_country",
            GroupKey::IpCountry => "ip_country",
            GroupKey::ShippingCountry => "shipping_country",
            GroupKey::Gateway => "gateway_name",
            GroupKey::GatewayCode => "gateway_code",
            GroupKey::Currency => "currency",
            GroupKey::HourOfDay => "hour",
            GroupKey::DayOfWeek => "day_of_week",
            GroupKey::BrowserFamily => "browser_family",
            GroupKey::CardBrand => "card_brand",
            GroupKey::RiskTier => "risk_tier",
            GroupKey::GeoMismatch => "geo_mismatch",
        }
    }

    /// Value of this key for a row; `None` drops the row from the grouping
    pub fn value(&self, row: &EnrichedRow) -> Option<KeyValue> {
        let tx = &row.tx;
        let text = |s: Option<&str>| {
            s.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| KeyValue::Text(s.to_string()))
        };
        let country = |s: Option<&str>| {
            s.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| KeyValue::Text(s.to_uppercase()))
        };

        match self {
            GroupKey::BinCountry => country(tx.bin_country.as_deref()),
            GroupKey::BillingCountry => country(tx.effective_billing_country()),
            GroupKey::IpCountry => country(tx.effective_ip_country()),
            GroupKey::ShippingCountry => country(tx.shipping_country()),
            GroupKey::Gateway => text(tx.gateway_name.as_deref()),
            GroupKey::GatewayCode => text(tx.gateway_code.as_deref()),
            GroupKey::Currency => country(tx.currency.as_deref()),
            GroupKey::HourOfDay => tx.hour().map(|h| KeyValue::Int(h as i64)),
            GroupKey::DayOfWeek => tx.day_of_week().map(|d| KeyValue::Int(d as i64)),
            GroupKey::BrowserFamily => tx.browser_family().map(KeyValue::Text),
            GroupKey::CardBrand => text(tx.card_brand()),
            GroupKey::RiskTier => Some(KeyValue::Text(row.risk.risk_tier.as_str().to_string())),
            GroupKey::GeoMismatch => row
                .risk
                .indicators
                .get(Indicator::GeoMismatch)
                .map(KeyValue::Bool),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One component of a group key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Bool(b) => write!(f, "{}", b),
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Text(s) => f.write_str(s),
        }
    }
}

/// Statistics for one group.
///
/// `success_std` is the sample standard deviation of the success flag and is NaN for
/// single-row groups; the NaN carries into the margin and interval bounds.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub keys: Vec<&'static str>,
    pub group: Vec<KeyValue>,
    pub attempts: u64,
    pub approved: u64,
    pub success_rate: f64,
    pub success_std: f64,
    pub margin_of_error: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Deviation from the overall rate exceeds twice the margin of error
    pub significant: bool,
    pub amount_count: u64,
    pub amount_sum: f64,
    /// NaN when no row in the group has an amount
    pub mean_amount: f64,
    pub std_amount: f64,
}

impl SummaryRow {
    /// "US / Chrome" style label
    pub fn label(&self) -> String {
        self.group
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// Running moments for one group
#[derive(Debug, Default)]
struct Moments {
    n: u64,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn push(&mut self, x: f64) {
        self.n += 1;
        self.sum += x;
        self.sum_sq += x * x;
    }

    fn mean(&self) -> f64 {
        if self.n == 0 {
            f64::NAN
        } else {
            self.sum / self.n as f64
        }
    }

    /// Sample standard deviation (n - 1 denominator)
    fn std(&self) -> f64 {
        if self.n < 2 {
            return f64::NAN;
        }
        let n = self.n as f64;
        let var = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        var.max(0.0).sqrt()
    }
}

#[derive(Debug, Default)]
struct GroupAcc {
    success: Moments,
    amount: Moments,
}

/// Sample standard deviation of a slice (NaN below two values)
pub fn sample_std(values: &[f64]) -> f64 {
    let mut m = Moments::default();
    values.iter().for_each(|v| m.push(*v));
    m.std()
}

/// Group rows by `keys` and compute success and amount statistics.
///
/// Rows missing any key value are skipped. Groups are never empty. Returns
/// `MissingColumn` for a key that no row carries at all.
pub fn summarize(rows: &[EnrichedRow], keys: &[GroupKey]) -> Result<Vec<SummaryRow>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut present = vec![false; keys.len()];
    let mut groups: BTreeMap<Vec<KeyValue>, GroupAcc> = BTreeMap::new();
    let mut overall = Moments::default();

    for row in rows {
        let success = if row.tx.is_successful() { 1.0 } else { 0.0 };
        overall.push(success);

        let mut group = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            if let Some(value) = key.value(row) {
                present[i] = true;
                group.push(value);
            }
        }
        if group.len() != keys.len() {
            continue;
        }

        let acc = groups.entry(group).or_default();
        acc.success.push(success);
        if let Some(amount) = row.tx.amount.filter(|a| a.is_finite()) {
            acc.amount.push(amount);
        }
    }

    if let Some(i) = present.iter().position(|p| !p) {
        return Err(AnalyticsError::missing(keys[i].name()));
    }

    let overall_rate = overall.mean();
    let key_names: Vec<&'static str> = keys.iter().map(|k| k.name()).collect();

    Ok(groups
        .into_iter()
        .map(|(group, acc)| {
            let rate = acc.success.mean();
            let std = acc.success.std();
            let margin = Z_95 * std / (acc.success.n as f64).sqrt();
            SummaryRow {
                keys: key_names.clone(),
                group,
                attempts: acc.success.n,
                approved: acc.success.sum as u64,
                success_rate: rate,
                success_std: std,
                margin_of_error: margin,
                ci_lower: rate - margin,
                ci_upper: rate + margin,
                significant: (rate - overall_rate).abs() > 2.0 * margin,
                amount_count: acc.amount.n,
                amount_sum: acc.amount.sum,
                mean_amount: acc.amount.mean(),
                std_amount: acc.amount.std(),
            }
        })
        .collect())
}

/// Success rate over all rows (NaN for no rows)
pub fn overall_success_rate(rows: &[EnrichedRow]) -> f64 {
    let mut m = Moments::default();
    for row in rows {
        m.push(if row.tx.is_successful() { 1.0 } else { 0.0 });
    }
    m.mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transaction;
    use chrono::{TimeZone, Utc};

    fn row(country: &str, status: &str, amount: f64) -> EnrichedRow {
        let mut tx = Transaction::new(format!("{}-{}-{}", country, status, amount));
        tx.billing_country = Some(country.to_string());
        tx.status_title = Some(status.to_string());
        tx.amount = Some(amount);
        EnrichedRow::unscored(tx)
    }

    fn sample() -> Vec<EnrichedRow> {
        vec![
            row("US", "Completed", 10.0),
            row("US", "Failed", 20.0),
            row("US", "Completed", 30.0),
            row("DE", "Completed", 40.0),
            row("FR", "Failed", 50.0),
            row("FR", "Failed", 60.0),
        ]
    }

    #[test]
    fn test_summarize_by_country() {
        let summary = summarize(&sample(), &[GroupKey::BillingCountry]).unwrap();
        let labels: Vec<String> = summary.iter().map(|r| r.label()).collect();
        assert_eq!(labels, vec!["DE", "FR", "US"]);

        let us = &summary[2];
        assert_eq!(us.attempts, 3);
        assert_eq!(us.approved, 2);
        assert!((us.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((us.mean_amount - 20.0).abs() < 1e-9);
        assert!((us.std_amount - 10.0).abs() < 1e-9);
        // sample std of [1, 0, 1]
        assert!((us.success_std - (1.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!(us.margin_of_error > 0.0);
    }

    #[test]
    fn test_single_row_group_is_nan() {
        let summary = summarize(&sample(), &[GroupKey::BillingCountry]).unwrap();
        let de = &summary[0];

        assert_eq!(de.attempts, 1);
        assert!(de.success_std.is_nan());
        assert!(de.margin_of_error.is_nan());
        assert!(de.ci_lower.is_nan());
        assert!(!de.significant);
        assert!(de.std_amount.is_nan());
    }

    #[test]
    fn test_order_independent() {
        let forward = summarize(&sample(), &[GroupKey::BillingCountry]).unwrap();
        let mut reversed_rows = sample();
        reversed_rows.reverse();
        reversed_rows.swap(0, 3);
        let reversed = summarize(&reversed_rows, &[GroupKey::BillingCountry]).unwrap();

        assert_eq!(forward.len(), reversed.len());
        for (a, b) in forward.iter().zip(&reversed) {
            assert_eq!(a.group, b.group);
            assert_eq!(a.attempts, b.attempts);
            assert_eq!(a.approved, b.approved);
            assert!((a.success_rate - b.success_rate).abs() < 1e-12);
        }
    }

    #[test]
    fn test_two_keys_and_missing_values() {
        let mut rows = sample();
        rows[0].tx.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        rows[3].tx.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap());

        let summary = summarize(&rows, &[GroupKey::BillingCountry, GroupKey::HourOfDay]).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].group, vec![KeyValue::Text("DE".into()), KeyValue::Int(9)]);
        assert_eq!(summary[0].keys, vec!["billing_country", "hour"]);
    }

    #[test]
    fn test_absent_key_is_missing_column() {
        let result = summarize(&sample(), &[GroupKey::GatewayCode]);
        assert!(matches!(result, Err(AnalyticsError::MissingColumn(c)) if c == "gateway_code"));
        assert!(summarize(&[], &[GroupKey::GatewayCode]).unwrap().is_empty());
    }

    #[test]
    fn test_significance() {
        let mut rows = Vec::new();
        for _ in 0..50 {
            rows.push(row("US", "Completed", 1.0));
            rows.push(row("NG", "Failed", 1.0));
        }
        rows.push(row("NG", "Completed", 1.0));

        let summary = summarize(&rows, &[GroupKey::BillingCountry]).unwrap();
        let ng = summary.iter().find(|r| r.label() == "NG").unwrap();
        assert!(ng.significant);
        // US is 100% approved: zero std, zero margin, deviation ~0.5
        let us = summary.iter().find(|r| r.label() == "US").unwrap();
        assert_eq!(us.margin_of_error, 0.0);
        assert!(us.significant);
        assert!((overall_success_rate(&rows) - 51.0 / 101.0).abs() < 1e-9);
    }
}
