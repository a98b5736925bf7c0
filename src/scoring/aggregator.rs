//! Weighted-sum risk aggregation

use super::{EnrichedRow, RowScore, UserRiskProfile};
use crate::config::{IndicatorWeights, RiskConfig};
use crate::feature_extractor::{Indicator, IndicatorSet, RowFeatures};
use crate::types::alert::{RiskAlert, RiskTier, RiskTierThresholds};
use crate::types::transaction::Transaction;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Sums indicator weights into a risk score and buckets scores into tiers.
///
/// The score is not normalized or capped; with non-negative weights it is always
/// `>= 0` and grows monotonically with the number of fired indicators.
pub struct RiskAggregator {
    weights: IndicatorWeights,
    tiers: RiskTierThresholds,
    alert_threshold: f64,
}

impl RiskAggregator {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            weights: config.weights.clone(),
            tiers: config.tiers.clone(),
            alert_threshold: config.alert_threshold,
        }
    }

    /// `Σ flag_i × weight_i`
    pub fn score(&self, indicators: &IndicatorSet) -> f64 {
        indicators
            .triggered()
            .map(|indicator| self.weights.weight(indicator))
            .sum()
    }

    /// Per-indicator contribution of the fired indicators
    pub fn contributions(&self, indicators: &IndicatorSet) -> Vec<(Indicator, f64)> {
        indicators
            .triggered()
            .map(|indicator| (indicator, self.weights.weight(indicator)))
            .collect()
    }

    pub fn tier(&self, score: f64) -> RiskTier {
        RiskTier::from_score(score, &self.tiers)
    }

    pub fn score_row(&self, features: &RowFeatures) -> RowScore {
        let risk_score = self.score(&features.indicators);
        RowScore {
            user_key: features.user_key.clone(),
            velocity: features.velocity,
            indicators: features.indicators,
            risk_score,
            risk_tier: self.tier(risk_score),
        }
    }

    /// Pair each transaction with its score. Inputs must be aligned.
    pub fn score_all(&self, transactions: Vec<Transaction>, features: &[RowFeatures]) -> Vec<EnrichedRow> {
        transactions
            .into_iter()
            .zip(features)
            .map(|(tx, f)| EnrichedRow {
                risk: self.score_row(f),
                tx,
            })
            .collect()
    }

    /// Aggregate rows per user key. Rows without a key are left out.
    ///
    /// The tier comes from the mean row score; profiles are ordered by total score
    /// (highest first), then by key.
    pub fn user_profiles(&self, rows: &[EnrichedRow]) -> Vec<UserRiskProfile> {
        #[derive(Default)]
        struct Acc {
            transactions: u64,
            approved: u64,
            total: f64,
            max: f64,
            velocity: f64,
            countries: BTreeSet<String>,
        }

        let mut by_user: BTreeMap<&str, Acc> = BTreeMap::new();
        for row in rows {
            let Some(key) = row.risk.user_key.as_deref() else {
                continue;
            };
            let acc = by_user.entry(key).or_default();
            acc.transactions += 1;
            if row.tx.is_successful() {
                acc.approved += 1;
            }
            acc.total += row.risk.risk_score;
            acc.max = acc.max.max(row.risk.risk_score);
            acc.velocity = acc.velocity.max(row.risk.velocity.unwrap_or(0.0));
            for country in [
                row.tx.effective_billing_country(),
                row.tx.effective_ip_country(),
                row.tx.bin_country.as_deref(),
            ]
            .into_iter()
            .flatten()
            {
                acc.countries.insert(country.trim().to_uppercase());
            }
        }

        let mut profiles: Vec<UserRiskProfile> = by_user
            .into_iter()
            .map(|(key, acc)| {
                let n = acc.transactions as f64;
                let mean = acc.total / n;
                UserRiskProfile {
                    user_key: key.to_string(),
                    transactions: acc.transactions,
                    approved: acc.approved,
                    success_rate: acc.approved as f64 / n,
                    total_score: acc.total,
                    mean_score: mean,
                    max_score: acc.max,
                    countries: acc.countries.into_iter().collect(),
                    velocity: acc.velocity,
                    risk_tier: self.tier(mean),
                }
            })
            .collect();

        profiles.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then_with(|| a.user_key.cmp(&b.user_key))
        });
        profiles
    }

    /// One alert per row whose score reaches the alert threshold
    pub fn alerts(&self, rows: &[EnrichedRow]) -> Vec<RiskAlert> {
        rows.iter()
            .filter(|row| row.risk.risk_score >= self.alert_threshold)
            .map(|row| {
                debug!(
                    transaction_id = %row.tx.transaction_id,
                    risk_score = row.risk.risk_score,
                    tier = %row.risk.risk_tier,
                    "Risk alert raised"
                );
                RiskAlert::new(
                    row.tx.transaction_id.clone(),
                    row.risk.risk_score,
                    row.risk.risk_tier,
                )
                .with_transaction_details(
                    row.risk.user_key.clone(),
                    row.tx.amount,
                    row.tx.created_at,
                )
                .with_triggered_indicators(row.risk.indicators.triggered_names())
            })
            .collect()
    }

    pub fn get_weights(&self) -> &IndicatorWeights {
        &self.weights
    }
}

impl Default for RiskAggregator {
    fn default() -> Self {
        Self::new(&RiskConfig::default())
    }
}
