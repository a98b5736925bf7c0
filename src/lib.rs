//! Payment Risk Analytics Library
//!
//! Batch analysis of payment attempts exported as CSV: JSON body extraction,
//! offline IP geolocation, rule-based risk scoring, grouped success-rate
//! statistics and a markdown report.

pub mod config;
pub mod error;
pub mod export;
pub mod feature_extractor;
pub mod geo;
pub mod ingest;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod scoring;
pub mod summary;
pub mod types;

pub use config::AppConfig;
pub use error::{AnalyticsError, Result};
pub use feature_extractor::{FeatureExtractor, Indicator};
pub use geo::{GeoLocation, GeoResolver};
pub use normalizer::{BodyFields, RecordNormalizer};
pub use pipeline::{AnalysisOutput, Pipeline};
pub use report::ReportComposer;
pub use scoring::RiskAggregator;
pub use types::{alert::RiskAlert, transaction::Transaction};
