//! Approval rate per period and geography, with the change against the previous period

use crate::error::{AnalyticsError, Result};
use crate::scoring::EnrichedRow;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Day, Granularity::Week, Granularity::Month];

    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Sortable label of the period containing `ts`. Weeks start on Monday.
    pub fn period_of(&self, ts: DateTime<Utc>) -> String {
        let date = ts.date_naive();
        match self {
            Granularity::Day => date.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
                monday.format("%Y-%m-%d").to_string()
            }
            Granularity::Month => format!("{:04}-{:02}", date.year(), date.month()),
        }
    }
}

/// Which country signal a period metric is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoSource {
    BinCountry,
    BillingCountry,
    IpCountry,
    ShippingCountry,
}

impl GeoSource {
    pub const ALL: [GeoSource; 4] = [
        GeoSource::BinCountry,
        GeoSource::BillingCountry,
        GeoSource::IpCountry,
        GeoSource::ShippingCountry,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GeoSource::BinCountry => "bin_country",
            GeoSource::BillingCountry => "billing_country",
            GeoSource::IpCountry => "ip_country",
            GeoSource::ShippingCountry => "shipping_country",
        }
    }

    pub fn country<'a>(&self, row: &'a EnrichedRow) -> Option<&'a str> {
        let tx = &row.tx;
        match self {
            GeoSource::BinCountry => tx.bin_country.as_deref(),
            GeoSource::BillingCountry => tx.effective_billing_country(),
            GeoSource::IpCountry => tx.effective_ip_country(),
            GeoSource::ShippingCountry => tx.shipping_country(),
        }
        .map(str::trim)
        .filter(|c| !c.is_empty())
    }
}

/// Attempts and approval rate of one (period, country) cell
#[derive(Debug, Clone, Serialize)]
pub struct PeriodMetric {
    pub granularity: Granularity,
    pub geo_source: GeoSource,
    pub country: String,
    pub period: String,
    pub attempts: u64,
    pub approved: u64,
    /// Approval rate in percent
    pub approval_rate_pct: f64,
    /// Change in percentage points against the previous period of the same country
    pub delta_pct: Option<f64>,
}

/// Period metrics for one granularity and geo source, ordered by country then period.
///
/// Rows without a timestamp or country are skipped. Returns `MissingColumn` when no
/// row has a timestamp.
pub fn period_metrics(
    rows: &[EnrichedRow],
    granularity: Granularity,
    geo_source: GeoSource,
) -> Result<Vec<PeriodMetric>> {
    if !rows.is_empty() && rows.iter().all(|r| r.tx.created_at.is_none()) {
        return Err(AnalyticsError::missing("created_at"));
    }

    let mut cells: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
    for row in rows {
        let (Some(ts), Some(country)) = (row.tx.created_at, geo_source.country(row)) else {
            continue;
        };
        let cell = cells
            .entry((country.to_uppercase(), granularity.period_of(ts)))
            .or_default();
        cell.0 += 1;
        if row.tx.is_successful() {
            cell.1 += 1;
        }
    }

    let mut metrics = Vec::with_capacity(cells.len());
    let mut previous: Option<(String, f64)> = None;

    for ((country, period), (attempts, approved)) in cells {
        let rate = 100.0 * approved as f64 / attempts as f64;
        let delta_pct = match &previous {
            Some((prev_country, prev_rate)) if *prev_country == country => Some(rate - prev_rate),
            _ => None,
        };
        previous = Some((country.clone(), rate));

        metrics.push(PeriodMetric {
            granularity,
            geo_source,
            country,
            period,
            attempts,
            approved,
            approval_rate_pct: rate,
            delta_pct,
        });
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transaction;
    use chrono::TimeZone;

    fn row(day: u32, bin: &str, status: &str) -> EnrichedRow {
        let mut tx = Transaction::new(format!("{}-{}", day, bin));
        tx.created_at = Some(Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap());
        tx.bin_country = Some(bin.to_string());
        tx.status_title = Some(status.to_string());
        EnrichedRow::unscored(tx)
    }

    #[test]
    fn test_period_labels() {
        // 2024-03-06 is a Wednesday
        let ts = Utc.with_ymd_and_hms(2024, 3, 6, 23, 59, 0).unwrap();
        assert_eq!(Granularity::Day.period_of(ts), "2024-03-06");
        assert_eq!(Granularity::Week.period_of(ts), "2024-03-04");
        assert_eq!(Granularity::Month.period_of(ts), "2024-03");
    }

    #[test]
    fn test_daily_deltas() {
        let rows = vec![
            row(1, "US", "Completed"),
            row(1, "US", "Failed"),
            row(2, "US", "Completed"),
            row(1, "DE", "Failed"),
        ];

        let metrics = period_metrics(&rows, Granularity::Day, GeoSource::BinCountry).unwrap();
        assert_eq!(metrics.len(), 3);

        assert_eq!(metrics[0].country, "DE");
        assert_eq!(metrics[0].delta_pct, None);

        assert_eq!(metrics[1].period, "2024-03-01");
        assert!((metrics[1].approval_rate_pct - 50.0).abs() < 1e-9);
        assert_eq!(metrics[1].delta_pct, None);

        assert_eq!(metrics[2].period, "2024-03-02");
        assert!((metrics[2].delta_pct.unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_timestamps() {
        let mut r = row(1, "US", "Completed");
        r.tx.created_at = None;
        assert!(period_metrics(&[r], Granularity::Week, GeoSource::BinCountry).is_err());
    }
}
