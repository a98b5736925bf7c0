//! Type definitions for the payment analytics pipeline

pub mod alert;
pub mod transaction;

pub use alert::{RiskAlert, RiskTier, RiskTierThresholds};
pub use transaction::Transaction;
