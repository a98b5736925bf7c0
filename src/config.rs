//! Configuration management for the payment analytics pipeline

use crate::error::AnalyticsError;
use crate::feature_extractor::Indicator;
use crate::summary::Granularity;
use crate::types::alert::RiskTierThresholds;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub risk: RiskConfig,
    pub geo: GeoConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

/// Risk indicator weights and thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Weight contributed by each indicator when it fires
    pub weights: IndicatorWeights,
    /// Transactions per hour above which a user counts as high velocity
    pub velocity_threshold: f64,
    /// Consecutive transactions of one user closer than this are "rapid succession"
    pub rapid_succession_minutes: f64,
    /// First hour (UTC) of the normal activity window
    pub active_hours_start: u32,
    /// Hour (UTC) at which the normal activity window closes (exclusive)
    pub active_hours_end: u32,
    /// Amounts that show up repeatedly in test and card-testing traffic
    pub suspicious_amounts: Vec<f64>,
    /// Amounts divisible by this are "round"
    pub round_amount_modulus: f64,
    /// Lower-case substrings of automation / scripting user agents
    pub suspicious_user_agents: Vec<String>,
    /// Screen resolutions ("WxH") typical for emulators and headless browsers
    pub test_resolutions: Vec<String>,
    /// Browser languages common in generated traffic
    pub test_languages: Vec<String>,
    /// Browser time zones common in generated traffic
    pub test_timezones: Vec<String>,
    /// Score cut-offs for risk tiers
    pub tiers: RiskTierThresholds,
    /// Minimum score for a row to produce a risk alert
    pub alert_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: IndicatorWeights::default(),
            velocity_threshold: 5.0,
            rapid_succession_minutes: 5.0,
            active_hours_start: 6,
            active_hours_end: 23,
            suspicious_amounts: vec![
                470.0, 496.0, 1878.0, 1978.0, 2000.0, 2313.0, 2420.0, 5000.0,
            ],
            round_amount_modulus: 100.0,
            suspicious_user_agents: [
                "python",
                "curl",
                "wget",
                "postman",
                "insomnia",
                "apache-httpclient",
                "okhttp",
                "requests",
                "headless",
                "phantom",
                "selenium",
                "webdriver",
                "crawler",
                "spider",
                "scraper",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            test_resolutions: ["0x0", "1x1", "100x100", "800x600", "1024x768"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            test_languages: ["en-US", "en-GB", "en-CA", "en-AU"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            test_timezones: ["UTC", "GMT", "America/New_York", "Europe/London"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tiers: RiskTierThresholds::default(),
            alert_threshold: 7.0,
        }
    }
}

/// Per-indicator weights. All must be non-negative.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorWeights {
    pub geo_mismatch: f64,
    pub suspicious_browser: f64,
    pub synthetic_data: f64,
    pub unusual_speed: f64,
    pub time_anomaly: f64,
    pub round_amount: f64,
    pub suspicious_amount: f64,
    pub suspicious_language: f64,
    pub suspicious_timezone: f64,
    pub rapid_succession: f64,
}

impl Default for IndicatorWeights {
    fn default() -> Self {
        Self {
            geo_mismatch: 3.0,
            suspicious_browser: 2.5,
            synthetic_data: 4.0,
            unusual_speed: 2.0,
            time_anomaly: 1.5,
            round_amount: 0.5,
            suspicious_amount: 1.0,
            suspicious_language: 0.5,
            suspicious_timezone: 0.5,
            rapid_succession: 1.0,
        }
    }
}

impl IndicatorWeights {
    /// Weight for a single indicator
    pub fn weight(&self, indicator: Indicator) -> f64 {
        match indicator {
            Indicator::GeoMismatch => self.geo_mismatch,
            Indicator::SuspiciousBrowser => self.suspicious_browser,
            Indicator::SyntheticData => self.synthetic_data,
            Indicator::UnusualSpeed => self.unusual_speed,
            Indicator::TimeAnomaly => self.time_anomaly,
            Indicator::RoundAmount => self.round_amount,
            Indicator::SuspiciousAmount => self.suspicious_amount,
            Indicator::SuspiciousLanguage => self.suspicious_language,
            Indicator::SuspiciousTimezone => self.suspicious_timezone,
            Indicator::RapidSuccession => self.rapid_succession,
        }
    }
}

/// Geolocation sources
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeoConfig {
    /// Offline MMDB database (IPinfo lite or MaxMind layout)
    pub mmdb_path: Option<String>,
    /// CSV with `ip,country` pairs, consulted when the MMDB has no answer
    pub ip_map_path: Option<String>,
}

/// Summary and report options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rows shown per ranked table in the report
    pub top_n: usize,
    /// Success rate under which a group is worded as critical
    pub critical_success_rate: f64,
    /// Groups with fewer attempts are left out of ranked report tables
    pub min_group_size: u64,
    /// Period used for declines by reason and the last-period drivers
    pub driver_granularity: Granularity,
    /// Anomaly score above which a numeric value is reported as an outlier
    pub anomaly_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            critical_success_rate: 0.7,
            min_group_size: 1,
            driver_granularity: Granularity::Week,
            anomaly_threshold: 3.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.validate()?;
        Ok(app)
    }

    /// Reject weights and thresholds that would break score monotonicity
    pub fn validate(&self) -> crate::error::Result<()> {
        for indicator in Indicator::ALL {
            let weight = self.risk.weights.weight(indicator);
            if !weight.is_finite() || weight < 0.0 {
                return Err(AnalyticsError::Config(format!(
                    "weight for {} must be a non-negative number, got {}",
                    indicator.name(),
                    weight
                )));
            }
        }

        let tiers = &self.risk.tiers;
        if tiers.medium > tiers.high {
            return Err(AnalyticsError::Config(format!(
                "risk tier medium ({}) must not exceed high ({})",
                tiers.medium, tiers.high
            )));
        }
        if let Some(critical) = tiers.critical {
            if critical < tiers.high {
                return Err(AnalyticsError::Config(format!(
                    "risk tier critical ({}) must not be below high ({})",
                    critical, tiers.high
                )));
            }
        }

        if self.risk.round_amount_modulus <= 0.0 {
            return Err(AnalyticsError::Config(
                "round_amount_modulus must be positive".to_string(),
            ));
        }
        let threshold = self.analysis.anomaly_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(AnalyticsError::Config(
                "anomaly_threshold must be a non-negative number".to_string(),
            ));
        }
        if self.risk.active_hours_start > 24 || self.risk.active_hours_end > 24 {
            return Err(AnalyticsError::Config(
                "active hours must lie within 0..=24".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.risk.weights.geo_mismatch, 3.0);
        assert_eq!(config.risk.weights.synthetic_data, 4.0);
        assert_eq!(config.risk.velocity_threshold, 5.0);
        assert_eq!(config.risk.suspicious_amounts.len(), 8);
        assert_eq!(config.analysis.critical_success_rate, 0.7);
        assert_eq!(config.analysis.driver_granularity, Granularity::Week);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = AppConfig::default();
        config.risk.weights.round_amount = -0.5;
        assert!(matches!(config.validate(), Err(AnalyticsError::Config(_))));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[risk]\nvelocity_threshold = 8.0\n\n[risk.weights]\ngeo_mismatch = 5.0\n\n[risk.tiers]\nmedium = 1.0\nhigh = 3.0\ncritical = 5.0\n\n[analysis]\ndriver_granularity = \"month\""
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.risk.velocity_threshold, 8.0);
        assert_eq!(config.risk.weights.geo_mismatch, 5.0);
        // untouched keys keep their defaults
        assert_eq!(config.risk.weights.suspicious_browser, 2.5);
        assert_eq!(config.risk.tiers.critical, Some(5.0));
        assert_eq!(config.analysis.top_n, 10);
        assert_eq!(config.analysis.driver_granularity, Granularity::Month);
    }
}
