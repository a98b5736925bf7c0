//! Risk tiers and risk alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk tier classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Determine risk tier from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskTierThresholds) -> Self {
        match thresholds.critical {
            Some(critical) if score >= critical => RiskTier::Critical,
            _ if score >= thresholds.high => RiskTier::High,
            _ if score >= thresholds.medium => RiskTier::Medium,
            _ => RiskTier::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configurable risk tier cut-offs (lower bounds, inclusive)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskTierThresholds {
    pub medium: f64,
    pub high: f64,
    /// Optional fourth tier; disabled unless configured
    pub critical: Option<f64>,
}

impl Default for RiskTierThresholds {
    fn default() -> Self {
        Self {
            medium: 3.0,
            high: 7.0,
            critical: None,
        }
    }
}

/// Alert raised for a transaction whose risk score crosses the alert threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// Weighted indicator sum
    pub risk_score: f64,

    /// Tier derived from the score
    pub risk_tier: RiskTier,

    /// Indicators that fired for the transaction
    pub triggered_indicators: Vec<String>,

    /// User anchor (email, phone or customer id) when known
    pub user_key: Option<String>,

    /// Transaction amount
    pub amount: Option<f64>,

    /// Transaction creation time
    pub created_at: Option<DateTime<Utc>>,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl RiskAlert {
    /// Create a new risk alert
    pub fn new(transaction_id: String, risk_score: f64, risk_tier: RiskTier) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transaction_id,
            risk_score,
            risk_tier,
            triggered_indicators: Vec::new(),
            user_key: None,
            amount: None,
            created_at: None,
            timestamp: Utc::now(),
        }
    }

    /// Add transaction details to the alert
    pub fn with_transaction_details(
        mut self,
        user_key: Option<String>,
        amount: Option<f64>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.user_key = user_key;
        self.amount = amount;
        self.created_at = created_at;
        self
    }

    /// Add triggered indicators to the alert
    pub fn with_triggered_indicators(mut self, indicators: Vec<String>) -> Self {
        self.triggered_indicators = indicators;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_tier_from_score() {
        let thresholds = RiskTierThresholds::default();

        assert_eq!(RiskTier::from_score(0.0, &thresholds), RiskTier::Low);
        assert_eq!(RiskTier::from_score(2.99, &thresholds), RiskTier::Low);
        assert_eq!(RiskTier::from_score(3.0, &thresholds), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(7.0, &thresholds), RiskTier::High);
        assert_eq!(RiskTier::from_score(42.0, &thresholds), RiskTier::High);
    }

    #[test]
    fn test_critical_tier_when_configured() {
        let thresholds = RiskTierThresholds {
            medium: 1.0,
            high: 3.0,
            critical: Some(5.0),
        };

        assert_eq!(RiskTier::from_score(0.5, &thresholds), RiskTier::Low);
        assert_eq!(RiskTier::from_score(1.0, &thresholds), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(4.0, &thresholds), RiskTier::High);
        assert_eq!(RiskTier::from_score(5.0, &thresholds), RiskTier::Critical);
    }

    #[test]
    fn test_risk_alert_serialization() {
        let alert = RiskAlert::new("tx_123".to_string(), 7.5, RiskTier::High)
            .with_triggered_indicators(vec!["geo_mismatch".into(), "synthetic_data".into()]);

        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"risk_tier\":\"high\""));

        let deserialized: RiskAlert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert.transaction_id, deserialized.transaction_id);
        assert_eq!(alert.risk_score, deserialized.risk_score);
        assert_eq!(deserialized.triggered_indicators.len(), 2);
    }
}
