//! Run counters and the end-of-run summary.

use crate::geo::ResolverStats;
use crate::normalizer::BodyOutcome;
use crate::types::alert::RiskTier;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Number of integer-width score buckets; the last one collects everything above
const SCORE_BUCKETS: usize = 12;

/// Metrics collector for one analysis run
pub struct RunMetrics {
    /// Rows read from the input file
    pub rows_loaded: AtomicU64,
    pub bodies_extracted: AtomicU64,
    pub bodies_empty: AtomicU64,
    pub bodies_malformed: AtomicU64,
    pub timestamp_failures: AtomicU64,
    pub amount_failures: AtomicU64,
    pub alerts_generated: AtomicU64,
    geo: RwLock<ResolverStats>,
    tiers: RwLock<BTreeMap<RiskTier, u64>>,
    score_buckets: RwLock<[u64; SCORE_BUCKETS]>,
    /// Sub-analyses skipped because an input column was missing
    skipped: RwLock<Vec<String>>,
    stage_times: RwLock<Vec<(&'static str, Duration)>>,
    start_time: Instant,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            rows_loaded: AtomicU64::new(0),
            bodies_extracted: AtomicU64::new(0),
            bodies_empty: AtomicU64::new(0),
            bodies_malformed: AtomicU64::new(0),
            timestamp_failures: AtomicU64::new(0),
            amount_failures: AtomicU64::new(0),
            alerts_generated: AtomicU64::new(0),
            geo: RwLock::new(ResolverStats::default()),
            tiers: RwLock::new(BTreeMap::new()),
            score_buckets: RwLock::new([0; SCORE_BUCKETS]),
            skipped: RwLock::new(Vec::new()),
            stage_times: RwLock::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_body(&self, outcome: BodyOutcome) {
        let counter = match outcome {
            BodyOutcome::Extracted => &self.bodies_extracted,
            BodyOutcome::Empty => &self.bodies_empty,
            BodyOutcome::Malformed => &self.bodies_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scored row
    pub fn record_score(&self, risk_score: f64, tier: RiskTier) {
        let bucket = (risk_score.max(0.0) as usize).min(SCORE_BUCKETS - 1);
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
        if let Ok(mut tiers) = self.tiers.write() {
            *tiers.entry(tier).or_insert(0) += 1;
        }
    }

    pub fn record_alerts(&self, count: usize) {
        self.alerts_generated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_geo(&self, stats: ResolverStats) {
        if let Ok(mut geo) = self.geo.write() {
            *geo = stats;
        }
    }

    pub fn record_skipped(&self, analysis: &str, reason: &str) {
        if let Ok(mut skipped) = self.skipped.write() {
            skipped.push(format!("{} ({})", analysis, reason));
        }
    }

    pub fn record_stage(&self, stage: &'static str, elapsed: Duration) {
        if let Ok(mut times) = self.stage_times.write() {
            times.push((stage, elapsed));
        }
    }

    pub fn get_tier_counts(&self) -> BTreeMap<RiskTier, u64> {
        self.tiers.read().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn get_score_distribution(&self) -> [u64; SCORE_BUCKETS] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; SCORE_BUCKETS])
    }

    pub fn get_skipped(&self) -> Vec<String> {
        self.skipped.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn get_geo(&self) -> ResolverStats {
        self.geo.read().map(|g| *g).unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let rows = self.rows_loaded.load(Ordering::Relaxed);
        let alerts = self.alerts_generated.load(Ordering::Relaxed);
        let alert_rate = if rows > 0 {
            (alerts as f64 / rows as f64) * 100.0
        } else {
            0.0
        };
        let geo = self.get_geo();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            PAYMENT RISK ANALYTICS - RUN SUMMARY              ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Rows Loaded:      {:>8}  │  Elapsed: {:>8.2} s            ║",
            rows,
            self.elapsed().as_secs_f64()
        );
        info!(
            "║ Alerts Generated: {:>8}  │  Alert Rate: {:>6.1}%           ║",
            alerts, alert_rate
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Bodies: extracted={:>6} empty={:>6} malformed={:>6}          ║",
            self.bodies_extracted.load(Ordering::Relaxed),
            self.bodies_empty.load(Ordering::Relaxed),
            self.bodies_malformed.load(Ordering::Relaxed)
        );
        info!(
            "║ Parse failures: created_at={:>6} amount={:>6}                ║",
            self.timestamp_failures.load(Ordering::Relaxed),
            self.amount_failures.load(Ordering::Relaxed)
        );
        info!(
            "║ Geo: lookups={:>6} cached={:>6} resolved={:>6} failed={:>4}  ║",
            geo.lookups, geo.cache_hits, geo.resolved, geo.failures
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Rows by Risk Tier:                                           ║");
        for (tier, count) in &self.get_tier_counts() {
            let pct = if rows > 0 {
                (*count as f64 / rows as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", tier.as_str(), count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let score_dist = self.get_score_distribution();
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            let label = if i == SCORE_BUCKETS - 1 {
                format!("{:>2}+   ", i)
            } else {
                format!("{:>2}-{:<2} ", i, i + 1)
            };
            info!("║   {}: {:>6} ({:>5.1}%) {}", label, count, pct, bar);
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let stages = self.stage_times.read().map(|s| s.clone()).unwrap_or_default();
        if !stages.is_empty() {
            info!("Stage Times (ms):");
            for (stage, elapsed) in &stages {
                info!("  {}: {:.1}", stage, elapsed.as_secs_f64() * 1000.0);
            }
        }
        for skipped in self.get_skipped() {
            info!("  skipped analysis: {}", skipped);
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = RunMetrics::new();

        metrics.record_score(0.0, RiskTier::Low);
        metrics.record_score(7.5, RiskTier::High);
        metrics.record_score(42.0, RiskTier::High);
        metrics.record_body(BodyOutcome::Malformed);
        metrics.record_alerts(2);

        let dist = metrics.get_score_distribution();
        assert_eq!(dist[0], 1);
        assert_eq!(dist[7], 1);
        assert_eq!(dist[SCORE_BUCKETS - 1], 1);
        assert_eq!(metrics.get_tier_counts().get(&RiskTier::High), Some(&2));
        assert_eq!(metrics.bodies_malformed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.alerts_generated.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_skipped_analyses() {
        let metrics = RunMetrics::new();
        metrics.record_skipped("decline_catalog", "missing column: gateway_code");
        assert_eq!(
            metrics.get_skipped(),
            vec!["decline_catalog (missing column: gateway_code)".to_string()]
        );
    }
}
