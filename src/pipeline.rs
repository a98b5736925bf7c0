//! Batch pipeline: CSV → normalizer → resolver → deriver → aggregator / summarizer
//!
//! All state lives in values passed by reference (config, resolver, metrics); nothing
//! is global. A sub-analysis whose input column is missing is logged and skipped.

use crate::config::AppConfig;
use crate::error::{AnalyticsError, Result};
use crate::feature_extractor::{FeatureExtractor, Indicator};
use crate::geo::GeoResolver;
use crate::ingest::{self, Dataset};
use crate::metrics::RunMetrics;
use crate::normalizer::RecordNormalizer;
use crate::scoring::{EnrichedRow, RiskAggregator, UserRiskProfile};
use crate::summary::{
    self, data_quality, decline_catalog, declines_by_reason, drivers_for_last_period,
    numeric_anomalies, period_metrics, AnomalyMethod, AnomalySummary, DataQuality, DeclineDriver,
    DeclineEntry, DeclineReason, GeoSource, Granularity, GroupKey, NumericColumn, PeriodMetric,
    SummaryRow,
};
use crate::types::alert::RiskAlert;
use crate::types::Transaction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Grouped summaries computed on every run
pub const SUMMARY_KEYS: &[&[GroupKey]] = &[
    &[GroupKey::BillingCountry],
    &[GroupKey::BinCountry],
    &[GroupKey::IpCountry],
    &[GroupKey::ShippingCountry],
    &[GroupKey::Gateway],
    &[GroupKey::GatewayCode],
    &[GroupKey::Currency],
    &[GroupKey::HourOfDay],
    &[GroupKey::DayOfWeek],
    &[GroupKey::BrowserFamily],
    &[GroupKey::CardBrand],
    &[GroupKey::RiskTier],
    &[GroupKey::GeoMismatch],
    &[GroupKey::BillingCountry, GroupKey::Gateway],
];

/// Table name of a summary, e.g. `billing_country__gateway_name`
pub fn summary_name(keys: &[GroupKey]) -> String {
    keys.iter().map(|k| k.name()).collect::<Vec<_>>().join("__")
}

/// Everything one run produces
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutput {
    pub generated_at: DateTime<Utc>,
    pub rows: usize,
    pub overall_success_rate: f64,
    pub geo_available: bool,
    /// Rows where each indicator fired
    pub indicator_counts: BTreeMap<&'static str, u64>,
    pub summaries: BTreeMap<String, Vec<SummaryRow>>,
    pub user_profiles: Vec<UserRiskProfile>,
    pub alerts: Vec<RiskAlert>,
    pub periods: Vec<PeriodMetric>,
    pub declines: Vec<DeclineEntry>,
    /// Declines per reason at `analysis.driver_granularity`
    pub decline_reasons: Vec<DeclineReason>,
    pub drivers: Vec<DeclineDriver>,
    pub anomalies: Vec<AnomalySummary>,
    pub quality: DataQuality,
    /// Sub-analyses skipped for missing columns
    pub skipped: Vec<String>,
    #[serde(skip)]
    pub enriched: Vec<EnrichedRow>,
}

impl AnalysisOutput {
    pub fn summary(&self, keys: &[GroupKey]) -> Option<&[SummaryRow]> {
        self.summaries.get(&summary_name(keys)).map(Vec::as_slice)
    }
}

pub struct Pipeline {
    config: AppConfig,
    normalizer: RecordNormalizer,
    extractor: FeatureExtractor,
    aggregator: RiskAggregator,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self {
            normalizer: RecordNormalizer::new(),
            extractor: FeatureExtractor::new(config.risk.clone()),
            aggregator: RiskAggregator::new(&config.risk),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn run_file<P: AsRef<Path>>(
        &self,
        path: P,
        resolver: &mut GeoResolver,
        metrics: &RunMetrics,
    ) -> Result<AnalysisOutput> {
        let dataset = ingest::load_csv(path)?;
        self.run(dataset, resolver, metrics)
    }

    /// Load, normalize and geolocate without scoring
    pub fn prepare(&self, dataset: Dataset, resolver: &mut GeoResolver, metrics: &RunMetrics) -> Vec<Transaction> {
        use std::sync::atomic::Ordering;

        metrics.rows_loaded.fetch_add(dataset.rows.len() as u64, Ordering::Relaxed);
        metrics.timestamp_failures.fetch_add(dataset.timestamp_failures, Ordering::Relaxed);
        metrics.amount_failures.fetch_add(dataset.amount_failures, Ordering::Relaxed);

        let start = Instant::now();
        let mut transactions: Vec<Transaction> = dataset
            .rows
            .into_iter()
            .map(|row| {
                let mut tx = row.transaction;
                metrics.record_body(self.normalizer.normalize_row(&mut tx, &row.payloads));
                tx
            })
            .collect();
        metrics.record_stage("normalize", start.elapsed());

        let start = Instant::now();
        resolver.enrich(&mut transactions);
        metrics.record_geo(resolver.stats());
        metrics.record_stage("geolocate", start.elapsed());

        transactions
    }

    pub fn run(&self, dataset: Dataset, resolver: &mut GeoResolver, metrics: &RunMetrics) -> Result<AnalysisOutput> {
        let has_status = dataset.columns.has_status();
        let transactions = self.prepare(dataset, resolver, metrics);
        if transactions.is_empty() {
            return Err(AnalyticsError::EmptyInput);
        }

        let start = Instant::now();
        let (features, _activity) = self.extractor.extract_all(&transactions);
        let enriched = self.aggregator.score_all(transactions, &features);
        for row in &enriched {
            metrics.record_score(row.risk.risk_score, row.risk.risk_tier);
        }
        let alerts = self.aggregator.alerts(&enriched);
        metrics.record_alerts(alerts.len());
        let user_profiles = self.aggregator.user_profiles(&enriched);
        metrics.record_stage("score", start.elapsed());

        info!(
            rows = enriched.len(),
            alerts = alerts.len(),
            users = user_profiles.len(),
            "Risk scoring complete"
        );

        let start = Instant::now();
        let mut skipped = Vec::new();
        let mut skip = |analysis: &str, err: &AnalyticsError| {
            warn!(analysis = %analysis, error = %err, "Skipping analysis");
            metrics.record_skipped(analysis, &err.to_string());
            skipped.push(format!("{}: {}", analysis, err));
        };

        let mut summaries = BTreeMap::new();
        let mut periods = Vec::new();
        let mut declines = Vec::new();
        let mut decline_reasons = Vec::new();
        let mut drivers = Vec::new();

        if has_status {
            for keys in SUMMARY_KEYS {
                let name = summary_name(keys);
                match summary::summarize(&enriched, keys) {
                    Ok(rows) => {
                        summaries.insert(name, rows);
                    }
                    Err(e) if e.is_recoverable() => skip(&name, &e),
                    Err(e) => return Err(e),
                }
            }

            'periods: for granularity in Granularity::ALL {
                for source in GeoSource::ALL {
                    match period_metrics(&enriched, granularity, source) {
                        Ok(mut cells) => periods.append(&mut cells),
                        Err(e) if e.is_recoverable() => {
                            skip("period_metrics", &e);
                            break 'periods;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            match decline_catalog(&enriched) {
                Ok(catalog) => declines = catalog,
                Err(e) if e.is_recoverable() => skip("decline_catalog", &e),
                Err(e) => return Err(e),
            }

            let granularity = self.config.analysis.driver_granularity;
            for source in GeoSource::ALL {
                let result = declines_by_reason(&enriched, granularity, source).and_then(|mut cells| {
                    let mut last = drivers_for_last_period(&enriched, granularity, source)?;
                    decline_reasons.append(&mut cells);
                    drivers.append(&mut last);
                    Ok(())
                });
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_recoverable() => {
                        skip("decline_drivers", &e);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        } else {
            let missing = AnalyticsError::missing("status");
            skip("success_summaries", &missing);
        }

        let mut anomalies = Vec::new();
        'columns: for column in NumericColumn::ALL {
            for method in AnomalyMethod::ALL {
                match numeric_anomalies(&enriched, column, method, self.config.analysis.anomaly_threshold) {
                    Ok(summary) => anomalies.push(summary),
                    Err(e) if e.is_recoverable() => {
                        skip(&format!("anomalies_{}", column.name()), &e);
                        continue 'columns;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let quality = data_quality(&enriched);
        metrics.record_stage("summarize", start.elapsed());

        let indicator_counts = Indicator::ALL
            .iter()
            .map(|ind| {
                let fired = enriched.iter().filter(|r| r.risk.indicators.fired(*ind)).count();
                (ind.name(), fired as u64)
            })
            .collect();

        Ok(AnalysisOutput {
            generated_at: Utc::now(),
            rows: enriched.len(),
            overall_success_rate: summary::overall_success_rate(&enriched),
            geo_available: resolver.is_available(),
            indicator_counts,
            summaries,
            user_profiles,
            alerts,
            periods,
            declines,
            decline_reasons,
            drivers,
            anomalies,
            quality,
            skipped,
            enriched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::read_csv;

    const CSV: &str = "\
id,created_at,status_title,billing_country,ip_country,amount,body
1,2024-03-01 10:00:00,Completed,US,US,470,
2,2024-03-01 11:00:00,Failed,US,DE,300,{not json
";

    #[test]
    fn test_two_row_scenario() {
        let pipeline = Pipeline::new(AppConfig::default());
        let metrics = RunMetrics::new();
        let mut resolver = GeoResolver::unavailable();

        let output = pipeline
            .run(read_csv(CSV.as_bytes()).unwrap(), &mut resolver, &metrics)
            .unwrap();

        assert_eq!(output.rows, 2);
        assert!(output.enriched[0].risk.indicators.fired(Indicator::SuspiciousAmount));
        assert!(!output.enriched[0].risk.indicators.fired(Indicator::GeoMismatch));
        assert!(output.enriched[1].risk.indicators.fired(Indicator::GeoMismatch));
        assert_eq!(output.indicator_counts["geo_mismatch"], 1);

        // the geo_mismatch=true group holds only row 2
        let by_mismatch = output.summary(&[GroupKey::GeoMismatch]).unwrap();
        let flagged = by_mismatch.iter().find(|r| r.label() == "true").unwrap();
        assert_eq!(flagged.attempts, 1);
        assert_eq!(flagged.success_rate, 0.0);

        // gateway columns are absent
        assert!(output.skipped.iter().any(|s| s.starts_with("gateway_name")));
        assert!(output.skipped.iter().any(|s| s.starts_with("decline_catalog")));
        assert_eq!(metrics.bodies_malformed.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_missing_status_skips_summaries() {
        let csv = "id,amount\n1,10\n2,20\n";
        let pipeline = Pipeline::new(AppConfig::default());
        let output = pipeline
            .run(read_csv(csv.as_bytes()).unwrap(), &mut GeoResolver::unavailable(), &RunMetrics::new())
            .unwrap();

        assert!(output.summaries.is_empty());
        assert!(output.drivers.is_empty());
        assert!(output.skipped[0].starts_with("success_summaries: missing column: status"));
        // no user key, so no velocity to score
        assert_eq!(output.skipped[1], "anomalies_velocity: missing column: velocity");
        assert_eq!(output.skipped.len(), 2);
        assert_eq!(output.quality.rows, 2);

        let amount: Vec<&AnomalySummary> = output
            .anomalies
            .iter()
            .filter(|a| a.column == NumericColumn::Amount)
            .collect();
        assert_eq!(amount.len(), 3);
        assert!(amount.iter().all(|a| a.evaluated == 2));
    }

    #[test]
    fn test_three_letter_countries_match() {
        let csv = "\
id,created_at,status_title,billing_country,ip_country,bin_country,gateway_code
1,2024-03-01 10:00:00,Completed,DE,DEU,deu,00
";
        let output = Pipeline::new(AppConfig::default())
            .run(read_csv(csv.as_bytes()).unwrap(), &mut GeoResolver::unavailable(), &RunMetrics::new())
            .unwrap();

        let row = &output.enriched[0];
        assert_eq!(row.risk.indicators.get(Indicator::GeoMismatch), Some(false));
        assert_eq!(row.risk.risk_score, 0.0);
        let bin_vs_billing = output
            .quality
            .mismatches
            .iter()
            .find(|m| m.pair == "bin_vs_billing")
            .unwrap();
        assert_eq!((bin_vs_billing.compared, bin_vs_billing.mismatched), (1, 0));
        assert_eq!(output.summary(&[GroupKey::BinCountry]).unwrap().len(), 1);
    }

    #[test]
    fn test_decline_drivers_wired() {
        let csv = "\
id,created_at,status_title,billing_country,gateway_code,gateway_message
1,2024-03-04 10:00:00,Completed,US,00,Approved
2,2024-03-04 11:00:00,Failed,US,05,Do not honor
3,2024-03-11 10:00:00,Failed,US,05,Do not honor
4,2024-03-11 11:00:00,Failed,US,05,Do not honor
";
        let output = Pipeline::new(AppConfig::default())
            .run(read_csv(csv.as_bytes()).unwrap(), &mut GeoResolver::unavailable(), &RunMetrics::new())
            .unwrap();

        assert_eq!(output.decline_reasons.len(), 2);
        let driver = output
            .drivers
            .iter()
            .find(|d| d.geo_source == GeoSource::BillingCountry)
            .unwrap();
        assert_eq!(driver.period, "2024-03-11");
        assert_eq!(driver.reason, "05 | Do not honor");
        assert!((driver.delta_per_100.unwrap() - 50.0).abs() < 1e-9);
        assert!((driver.delta_approval_pct.unwrap() + 50.0).abs() < 1e-9);
    }
}
