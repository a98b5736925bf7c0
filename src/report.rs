//! Markdown report composer.
//!
//! Pure string construction over an [`AnalysisOutput`]; the only thresholds used here
//! pick wording (e.g. "critical" below `analysis.critical_success_rate`).

use crate::config::AnalysisConfig;
use crate::pipeline::AnalysisOutput;
use crate::summary::reasons::descending_delta;
use crate::summary::{DeclineDriver, GroupKey, SummaryRow};
use std::fmt::{self, Write};

/// Summaries rendered as ranked sections, in order
const REPORT_SECTIONS: &[(&str, &[GroupKey])] = &[
    ("Billing country", &[GroupKey::BillingCountry]),
    ("BIN country", &[GroupKey::BinCountry]),
    ("IP country", &[GroupKey::IpCountry]),
    ("Gateway", &[GroupKey::Gateway]),
    ("Browser", &[GroupKey::BrowserFamily]),
    ("Card brand", &[GroupKey::CardBrand]),
    ("Hour of day (UTC)", &[GroupKey::HourOfDay]),
    ("Risk tier", &[GroupKey::RiskTier]),
    ("Geo mismatch", &[GroupKey::GeoMismatch]),
];

/// Format a fraction as a percentage; NaN renders as "n/a"
pub fn pct(rate: f64) -> String {
    if rate.is_finite() {
        format!("{:.1}%", rate * 100.0)
    } else {
        "n/a".to_string()
    }
}

pub struct ReportComposer {
    top_n: usize,
    critical_success_rate: f64,
    min_group_size: u64,
}

impl ReportComposer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            top_n: config.top_n,
            critical_success_rate: config.critical_success_rate,
            min_group_size: config.min_group_size,
        }
    }

    pub fn compose(&self, output: &AnalysisOutput) -> String {
        let mut out = String::new();
        let _ = self.render(&mut out, output);
        out
    }

    fn render(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        writeln!(out, "# Payment Risk Analysis")?;
        writeln!(out)?;
        writeln!(out, "_Generated {}_", output.generated_at.format("%Y-%m-%d %H:%M UTC"))?;
        writeln!(out)?;

        self.overview(out, output)?;
        self.indicators(out, output)?;
        self.users(out, output)?;

        for (title, keys) in REPORT_SECTIONS {
            if let Some(rows) = output.summary(keys) {
                self.ranked_section(out, title, rows)?;
            }
        }

        self.declines(out, output)?;
        self.drivers(out, output)?;
        self.anomalies(out, output)?;
        self.quality(out, output)?;

        if !output.skipped.is_empty() {
            writeln!(out, "## Skipped analyses")?;
            writeln!(out)?;
            for s in &output.skipped {
                writeln!(out, "- {}", s)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn overview(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        writeln!(out, "## Overview")?;
        writeln!(out)?;
        writeln!(out, "- Transactions analysed: {}", output.rows)?;

        let rate = output.overall_success_rate;
        if rate < self.critical_success_rate {
            writeln!(
                out,
                "- Overall success rate: **{}** (critical: below {})",
                pct(rate),
                pct(self.critical_success_rate)
            )?;
        } else {
            writeln!(out, "- Overall success rate: {}", pct(rate))?;
        }

        writeln!(out, "- Risk alerts: {}", output.alerts.len())?;
        writeln!(
            out,
            "- IP geolocation: {}",
            if output.geo_available {
                "offline database"
            } else {
                "unavailable (CSV country columns only)"
            }
        )?;
        writeln!(out)
    }

    fn indicators(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        writeln!(out, "## Risk indicators")?;
        writeln!(out)?;
        let mut fired: Vec<(&&str, &u64)> = output.indicator_counts.iter().filter(|(_, n)| **n > 0).collect();
        if fired.is_empty() {
            writeln!(out, "No indicator fired.")?;
            return writeln!(out);
        }
        fired.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (name, count) in fired {
            let share = *count as f64 / output.rows.max(1) as f64;
            writeln!(out, "- `{}`: {} rows ({})", name, count, pct(share))?;
        }
        writeln!(out)
    }

    fn users(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        if output.user_profiles.is_empty() {
            return Ok(());
        }
        writeln!(out, "## Highest-risk users")?;
        writeln!(out)?;
        writeln!(out, "| User | Tx | Success | Total score | Mean score | Velocity (tx/h) | Tier |")?;
        writeln!(out, "|---|---:|---:|---:|---:|---:|---|")?;
        for p in output.user_profiles.iter().take(self.top_n) {
            writeln!(
                out,
                "| {} | {} | {} | {:.1} | {:.2} | {:.1} | {} |",
                p.user_key,
                p.transactions,
                pct(p.success_rate),
                p.total_score,
                p.mean_score,
                p.velocity,
                p.risk_tier
            )?;
        }
        writeln!(out)
    }

    /// Top groups by attempts, worded by success rate
    fn ranked_section(&self, out: &mut String, title: &str, rows: &[SummaryRow]) -> fmt::Result {
        let mut ranked: Vec<&SummaryRow> = rows
            .iter()
            .filter(|r| r.attempts >= self.min_group_size)
            .collect();
        if ranked.is_empty() {
            return Ok(());
        }
        ranked.sort_by(|a, b| b.attempts.cmp(&a.attempts).then_with(|| a.group.cmp(&b.group)));

        writeln!(out, "## Success rate by {}", title.to_lowercase())?;
        writeln!(out)?;
        for row in ranked.into_iter().take(self.top_n) {
            let mut line = format!(
                "- **{}**: {} ({}/{})",
                row.label(),
                pct(row.success_rate),
                row.approved,
                row.attempts
            );
            if row.margin_of_error.is_finite() {
                line.push_str(&format!(" ±{}", pct(row.margin_of_error)));
            }
            if row.success_rate < self.critical_success_rate {
                line.push_str(" (critical)");
            }
            if row.significant {
                line.push_str(" (significant)");
            }
            writeln!(out, "{}", line)?;
        }
        writeln!(out)
    }

    fn declines(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        if output.declines.is_empty() {
            return Ok(());
        }
        writeln!(out, "## Top decline codes")?;
        writeln!(out)?;
        for entry in output.declines.iter().take(self.top_n) {
            let messages: Vec<String> = entry
                .top_messages
                .iter()
                .map(|(m, n)| format!("{} ({})", m, n))
                .collect();
            writeln!(
                out,
                "- `{}`: {} declines, {} distinct messages{}",
                entry.gateway_code,
                entry.declines,
                entry.distinct_messages,
                if messages.is_empty() {
                    String::new()
                } else {
                    format!(": {}", messages.join("; "))
                }
            )?;
        }
        writeln!(out)
    }

    /// Reasons whose declines per 100 rose most in the latest period
    fn drivers(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        let mut rising: Vec<&DeclineDriver> = output
            .drivers
            .iter()
            .filter(|d| d.delta_per_100.map_or(false, |delta| delta > 0.0))
            .collect();
        if rising.is_empty() {
            return Ok(());
        }
        rising.sort_by(|a, b| descending_delta(a.delta_per_100, b.delta_per_100));

        writeln!(out, "## Decline drivers (last {})", output.drivers[0].granularity.name())?;
        writeln!(out)?;
        for d in rising.into_iter().take(self.top_n) {
            let approval = match d.delta_approval_pct {
                Some(delta) => format!("approval {:.1}% ({:+.1} pp)", d.approval_rate_pct, delta),
                None => format!("approval {:.1}%", d.approval_rate_pct),
            };
            writeln!(
                out,
                "- **{}** ({}, {}) `{}`: {:.1} per 100 ({:+.1}), {}",
                d.country,
                d.geo_source.name(),
                d.period,
                d.reason,
                d.declines_per_100,
                d.delta_per_100.unwrap_or(0.0),
                approval
            )?;
        }
        writeln!(out)
    }

    fn anomalies(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        if output.anomalies.is_empty() {
            return Ok(());
        }
        writeln!(out, "## Numeric anomalies")?;
        writeln!(out)?;
        let mut any = false;
        for a in output.anomalies.iter().filter(|a| a.flagged > 0) {
            any = true;
            let top: Vec<String> = a
                .top
                .iter()
                .map(|r| format!("{} ({:.2}, score {:.2})", r.transaction_id, r.value, r.score))
                .collect();
            writeln!(
                out,
                "- `{}` ({}): {} of {} rows above {:.1}; top: {}",
                a.column.name(),
                a.method.name(),
                a.flagged,
                a.evaluated,
                a.threshold,
                top.join(", ")
            )?;
        }
        if !any {
            writeln!(out, "No numeric outliers.")?;
        }
        writeln!(out)
    }

    fn quality(&self, out: &mut String, output: &AnalysisOutput) -> fmt::Result {
        writeln!(out, "## Data quality")?;
        writeln!(out)?;
        for m in output.quality.missing.iter().filter(|m| m.missing > 0) {
            writeln!(out, "- `{}` missing in {:.1}% of rows", m.field, m.missing_pct)?;
        }
        for m in &output.quality.mismatches {
            if m.compared == 0 {
                writeln!(out, "- {}: no overlapping rows", m.pair)?;
            } else {
                writeln!(
                    out,
                    "- {}: {:.1}% mismatch over {} rows",
                    m.pair, m.mismatch_pct, m.compared
                )?;
            }
        }
        writeln!(out)
    }
}
