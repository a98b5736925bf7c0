//! Declines by reason per period and geography, and the last-period drivers
//!
//! A reason is the gateway code and message of an attempt that was not approved.
//! Rates are declines per 100 attempts of the same (country, period) cell, so they
//! sit next to the approval rate from [`period_metrics`].

use super::periods::{period_metrics, GeoSource, Granularity, PeriodMetric};
use crate::error::{AnalyticsError, Result};
use crate::scoring::EnrichedRow;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize)]
pub struct DeclineReason {
    pub granularity: Granularity,
    pub geo_source: GeoSource,
    pub country: String,
    pub period: String,
    /// "code | message"
    pub reason: String,
    pub declines: u64,
    /// All attempts of the (country, period) cell
    pub attempts: u64,
    pub declines_per_100: f64,
}

/// How a reason moved in the latest period of its country
#[derive(Debug, Clone, Serialize)]
pub struct DeclineDriver {
    pub granularity: Granularity,
    pub geo_source: GeoSource,
    pub country: String,
    pub period: String,
    pub reason: String,
    pub declines: u64,
    pub attempts: u64,
    pub declines_per_100: f64,
    /// Rate in the previous period where the same reason occurred
    pub prev_declines_per_100: Option<f64>,
    pub delta_per_100: Option<f64>,
    pub approval_rate_pct: f64,
    /// Change in approval rate against the country's previous period, in points
    pub delta_approval_pct: Option<f64>,
}

fn reason_label(row: &EnrichedRow) -> String {
    let clean = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    match (clean(row.tx.gateway_code.as_deref()), clean(row.tx.gateway_message.as_deref())) {
        (Some(code), Some(message)) => format!("{} | {}", code, message),
        (Some(code), None) => code,
        (None, Some(message)) => message,
        (None, None) => "unknown".to_string(),
    }
}

/// Declines per reason, ordered by country, period, then most declines first.
///
/// Rows without a timestamp or country are skipped. Returns `MissingColumn` when no
/// row has a timestamp or no row carries a gateway code or message.
pub fn declines_by_reason(
    rows: &[EnrichedRow],
    granularity: Granularity,
    geo_source: GeoSource,
) -> Result<Vec<DeclineReason>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    if rows.iter().all(|r| r.tx.created_at.is_none()) {
        return Err(AnalyticsError::missing("created_at"));
    }
    if rows
        .iter()
        .all(|r| r.tx.gateway_code.is_none() && r.tx.gateway_message.is_none())
    {
        return Err(AnalyticsError::missing("gateway_code"));
    }

    let mut cells: BTreeMap<(String, String), (u64, HashMap<String, u64>)> = BTreeMap::new();
    for row in rows {
        let (Some(ts), Some(country)) = (row.tx.created_at, geo_source.country(row)) else {
            continue;
        };
        let cell = cells
            .entry((country.to_uppercase(), granularity.period_of(ts)))
            .or_default();
        cell.0 += 1;
        if !row.tx.is_successful() {
            *cell.1.entry(reason_label(row)).or_default() += 1;
        }
    }

    let mut out = Vec::new();
    for ((country, period), (attempts, reasons)) in cells {
        let mut reasons: Vec<(String, u64)> = reasons.into_iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (reason, declines) in reasons {
            out.push(DeclineReason {
                granularity,
                geo_source,
                country: country.clone(),
                period: period.clone(),
                reason,
                declines,
                attempts,
                declines_per_100: 100.0 * declines as f64 / attempts as f64,
            });
        }
    }
    Ok(out)
}

/// Reasons of each country's latest period with their change against the previous
/// period in which the reason occurred, and the country's approval-rate change.
///
/// Ordered by country, then largest increase in declines per 100 (reasons with no
/// earlier period last).
pub fn drivers_for_last_period(
    rows: &[EnrichedRow],
    granularity: Granularity,
    geo_source: GeoSource,
) -> Result<Vec<DeclineDriver>> {
    let reasons = declines_by_reason(rows, granularity, geo_source)?;
    let metrics = period_metrics(rows, granularity, geo_source)?;

    // metrics are ordered by country then period, so the last write wins
    let mut last: HashMap<&str, &PeriodMetric> = HashMap::new();
    for m in &metrics {
        last.insert(m.country.as_str(), m);
    }

    let mut history: BTreeMap<(&str, &str, &str), f64> = BTreeMap::new();
    for r in &reasons {
        history.insert((r.country.as_str(), r.reason.as_str(), r.period.as_str()), r.declines_per_100);
    }

    let mut drivers: Vec<DeclineDriver> = reasons
        .iter()
        .filter_map(|r| {
            let metric = last.get(r.country.as_str())?;
            if metric.period != r.period {
                return None;
            }
            let prev = history
                .range((r.country.as_str(), r.reason.as_str(), "")..(r.country.as_str(), r.reason.as_str(), r.period.as_str()))
                .next_back()
                .map(|(_, rate)| *rate);

            Some(DeclineDriver {
                granularity,
                geo_source,
                country: r.country.clone(),
                period: r.period.clone(),
                reason: r.reason.clone(),
                declines: r.declines,
                attempts: r.attempts,
                declines_per_100: r.declines_per_100,
                prev_declines_per_100: prev,
                delta_per_100: prev.map(|p| r.declines_per_100 - p),
                approval_rate_pct: metric.approval_rate_pct,
                delta_approval_pct: metric.delta_pct,
            })
        })
        .collect();

    drivers.sort_by(|a, b| {
        a.country
            .cmp(&b.country)
            .then_with(|| descending_delta(a.delta_per_100, b.delta_per_100))
            .then_with(|| a.reason.cmp(&b.reason))
    });
    Ok(drivers)
}

/// Larger deltas first, missing deltas last
pub fn descending_delta(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
