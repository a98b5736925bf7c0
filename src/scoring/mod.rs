//! Risk scoring: row scores, tiers, per-user profiles and alerts

pub mod aggregator;

pub use aggregator::RiskAggregator;

use crate::feature_extractor::IndicatorSet;
use crate::types::alert::RiskTier;
use crate::types::transaction::Transaction;
use serde::Serialize;

/// Score of a single transaction
#[derive(Debug, Clone)]
pub struct RowScore {
    pub user_key: Option<String>,
    pub velocity: Option<f64>,
    pub indicators: IndicatorSet,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
}

impl Default for RowScore {
    fn default() -> Self {
        Self {
            user_key: None,
            velocity: None,
            indicators: IndicatorSet::default(),
            risk_score: 0.0,
            risk_tier: RiskTier::Low,
        }
    }
}

/// A transaction after normalization, geolocation and scoring
#[derive(Debug, Clone)]
pub struct EnrichedRow {
    pub tx: Transaction,
    pub risk: RowScore,
}

impl EnrichedRow {
    /// Row with a zero score, for analyses that only need the transaction
    pub fn unscored(tx: Transaction) -> Self {
        Self {
            risk: RowScore {
                user_key: tx.user_key(),
                ..Default::default()
            },
            tx,
        }
    }
}

/// Risk aggregated over all transactions of one user
#[derive(Debug, Clone, Serialize)]
pub struct UserRiskProfile {
    pub user_key: String,
    pub transactions: u64,
    pub approved: u64,
    pub success_rate: f64,
    pub total_score: f64,
    pub mean_score: f64,
    pub max_score: f64,
    /// Distinct billing, IP and BIN countries seen for the user
    pub countries: Vec<String>,
    /// Transactions per hour
    pub velocity: f64,
    pub risk_tier: RiskTier,
}
