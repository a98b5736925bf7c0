//! Numeric anomaly scores: z-score, IQR and MAD distance per row

use super::sample_std;
use crate::error::{AnalyticsError, Result};
use crate::scoring::EnrichedRow;
use serde::Serialize;

/// Rows listed per summary, highest score first
const TOP_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericColumn {
    Amount,
    RiskScore,
    Velocity,
}

impl NumericColumn {
    pub const ALL: [NumericColumn; 3] = [
        NumericColumn::Amount,
        NumericColumn::RiskScore,
        NumericColumn::Velocity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NumericColumn::Amount => "amount",
            NumericColumn::RiskScore => "risk_score",
            NumericColumn::Velocity => "velocity",
        }
    }

    pub fn value(&self, row: &EnrichedRow) -> Option<f64> {
        match self {
            NumericColumn::Amount => row.tx.amount,
            NumericColumn::RiskScore => Some(row.risk.risk_score),
            NumericColumn::Velocity => row.risk.velocity,
        }
        .filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    /// |x - mean| / sample std
    ZScore,
    /// |x - Q1| / (Q3 - Q1)
    Iqr,
    /// |x - median| / median absolute deviation
    Mad,
}

impl AnomalyMethod {
    pub const ALL: [AnomalyMethod; 3] = [AnomalyMethod::ZScore, AnomalyMethod::Iqr, AnomalyMethod::Mad];

    pub fn name(&self) -> &'static str {
        match self {
            AnomalyMethod::ZScore => "zscore",
            AnomalyMethod::Iqr => "iqr",
            AnomalyMethod::Mad => "mad",
        }
    }
}

/// Linear-interpolated quantile of sorted, non-empty values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Score every value; missing or non-finite values stay `None`.
///
/// A column without spread (zero or undefined scale) scores 0 everywhere.
pub fn anomaly_scores(values: &[Option<f64>], method: AnomalyMethod) -> Vec<Option<f64>> {
    let present = sorted(values.iter().flatten().copied().filter(|v| v.is_finite()));
    if present.is_empty() {
        return vec![None; values.len()];
    }

    let (center, scale) = match method {
        AnomalyMethod::ZScore => {
            let mean = present.iter().sum::<f64>() / present.len() as f64;
            (mean, sample_std(&present))
        }
        AnomalyMethod::Iqr => {
            let q1 = quantile(&present, 0.25);
            (q1, quantile(&present, 0.75) - q1)
        }
        AnomalyMethod::Mad => {
            let median = quantile(&present, 0.5);
            let deviations = sorted(present.iter().map(|v| (v - median).abs()));
            (median, quantile(&deviations, 0.5))
        }
    };

    values
        .iter()
        .map(|v| {
            let v = v.filter(|v| v.is_finite())?;
            Some(if scale > 0.0 { (v - center).abs() / scale } else { 0.0 })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalousRow {
    pub transaction_id: String,
    pub value: f64,
    pub score: f64,
}

/// Outliers of one column under one method
#[derive(Debug, Clone, Serialize)]
pub struct AnomalySummary {
    pub column: NumericColumn,
    pub method: AnomalyMethod,
    /// Rows with a value
    pub evaluated: u64,
    pub threshold: f64,
    /// Rows scoring above `threshold`
    pub flagged: u64,
    pub top: Vec<AnomalousRow>,
}

/// Returns `MissingColumn` when rows exist but none has a value for `column`.
pub fn numeric_anomalies(
    rows: &[EnrichedRow],
    column: NumericColumn,
    method: AnomalyMethod,
    threshold: f64,
) -> Result<AnomalySummary> {
    let values: Vec<Option<f64>> = rows.iter().map(|r| column.value(r)).collect();
    if !rows.is_empty() && values.iter().all(Option::is_none) {
        return Err(AnalyticsError::missing(column.name()));
    }

    let scores = anomaly_scores(&values, method);
    let mut outliers: Vec<AnomalousRow> = rows
        .iter()
        .zip(values.iter().zip(&scores))
        .filter_map(|(row, (value, score))| match (value, score) {
            (Some(value), Some(score)) if *score > threshold => Some(AnomalousRow {
                transaction_id: row.tx.transaction_id.clone(),
                value: *value,
                score: *score,
            }),
            _ => None,
        })
        .collect();
    let flagged = outliers.len() as u64;

    outliers.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.transaction_id.cmp(&b.transaction_id)));
    outliers.truncate(TOP_ROWS);

    Ok(AnomalySummary {
        column,
        method,
        evaluated: values.iter().flatten().count() as u64,
        threshold,
        flagged,
        top: outliers,
    })
}
