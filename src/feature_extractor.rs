//! Risk indicator derivation.
//!
//! Indicators are declared once in [`RULES`] as {indicator, predicate}; weights come
//! from configuration. A predicate returns `None` when its source attributes are
//! missing, in which case the indicator is not applied to the row and contributes 0.

use crate::config::RiskConfig;
use crate::types::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Named risk indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    GeoMismatch,
    SuspiciousBrowser,
    SyntheticData,
    UnusualSpeed,
    TimeAnomaly,
    RoundAmount,
    SuspiciousAmount,
    SuspiciousLanguage,
    SuspiciousTimezone,
    RapidSuccession,
}

impl Indicator {
    pub const ALL: [Indicator; 10] = [
        Indicator::GeoMismatch,
        Indicator::SuspiciousBrowser,
        Indicator::SyntheticData,
        Indicator::UnusualSpeed,
        Indicator::TimeAnomaly,
        Indicator::RoundAmount,
        Indicator::SuspiciousAmount,
        Indicator::SuspiciousLanguage,
        Indicator::SuspiciousTimezone,
        Indicator::RapidSuccession,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Indicator::GeoMismatch => "geo_mismatch",
            Indicator::SuspiciousBrowser => "suspicious_browser",
            Indicator::SyntheticData => "synthetic_data",
            Indicator::UnusualSpeed => "unusual_speed",
            Indicator::TimeAnomaly => "time_anomaly",
            Indicator::RoundAmount => "round_amount",
            Indicator::SuspiciousAmount => "suspicious_amount",
            Indicator::SuspiciousLanguage => "suspicious_language",
            Indicator::SuspiciousTimezone => "suspicious_timezone",
            Indicator::RapidSuccession => "rapid_succession",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs visible to an indicator predicate
pub struct RowContext<'a> {
    pub tx: &'a Transaction,
    pub config: &'a RiskConfig,
    /// Transactions per hour of the row's user; `None` without a user key or
    /// without any timestamp for that user
    pub velocity: Option<f64>,
    /// `None` without a user key or timestamp
    pub rapid_succession: Option<bool>,
}

/// One row of the indicator table
pub struct IndicatorRule {
    pub indicator: Indicator,
    pub predicate: fn(&RowContext<'_>) -> Option<bool>,
}

/// The indicator table. Adding an indicator means adding a row here and a weight.
pub const RULES: &[IndicatorRule] = &[
    IndicatorRule {
        indicator: Indicator::GeoMismatch,
        predicate: geo_mismatch,
    },
    IndicatorRule {
        indicator: Indicator::SuspiciousBrowser,
        predicate: suspicious_browser,
    },
    IndicatorRule {
        indicator: Indicator::SyntheticData,
        predicate: synthetic_data,
    },
    IndicatorRule {
        indicator: Indicator::UnusualSpeed,
        predicate: |ctx| ctx.velocity.map(|v| v > ctx.config.velocity_threshold),
    },
    IndicatorRule {
        indicator: Indicator::TimeAnomaly,
        predicate: |ctx| {
            ctx.tx.hour().map(|h| {
                h < ctx.config.active_hours_start || h >= ctx.config.active_hours_end
            })
        },
    },
    IndicatorRule {
        indicator: Indicator::RoundAmount,
        predicate: |ctx| {
            ctx.tx
                .amount
                .map(|a| (a % ctx.config.round_amount_modulus).abs() < 1e-9)
        },
    },
    IndicatorRule {
        indicator: Indicator::SuspiciousAmount,
        predicate: |ctx| {
            ctx.tx.amount.map(|a| {
                ctx.config
                    .suspicious_amounts
                    .iter()
                    .any(|s| (a - s).abs() < 1e-9)
            })
        },
    },
    IndicatorRule {
        indicator: Indicator::SuspiciousLanguage,
        predicate: suspicious_language,
    },
    IndicatorRule {
        indicator: Indicator::SuspiciousTimezone,
        predicate: |ctx| {
            ctx.tx.body.timezone.as_deref().map(|tz| {
                ctx.config
                    .test_timezones
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(tz.trim()))
            })
        },
    },
    IndicatorRule {
        indicator: Indicator::RapidSuccession,
        predicate: |ctx| ctx.rapid_succession,
    },
];

fn geo_mismatch(ctx: &RowContext<'_>) -> Option<bool> {
    let billing = ctx.tx.effective_billing_country()?.trim();
    let ip = ctx.tx.effective_ip_country()?.trim();
    if billing.is_empty() || ip.is_empty() {
        return None;
    }
    Some(!billing.eq_ignore_ascii_case(ip))
}

fn suspicious_browser(ctx: &RowContext<'_>) -> Option<bool> {
    let ua = ctx.tx.effective_user_agent()?.to_lowercase();
    Some(
        ctx.config
            .suspicious_user_agents
            .iter()
            .any(|needle| ua.contains(needle.as_str())),
    )
}

fn synthetic_data(ctx: &RowContext<'_>) -> Option<bool> {
    let resolution = ctx.tx.screen_resolution()?;
    Some(ctx.config.test_resolutions.iter().any(|r| *r == resolution))
}

fn suspicious_language(ctx: &RowContext<'_>) -> Option<bool> {
    // Accept-Language style values: take the primary tag
    let raw = ctx.tx.effective_language()?;
    let primary = raw.split([',', ';']).next().unwrap_or("").trim();
    if primary.is_empty() {
        return None;
    }
    Some(
        ctx.config
            .test_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(primary)),
    )
}

/// Per-row indicator outcomes. `None` = not evaluated (missing inputs).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndicatorSet {
    flags: [Option<bool>; 10],
}

impl IndicatorSet {
    pub fn set(&mut self, indicator: Indicator, value: Option<bool>) {
        self.flags[indicator.index()] = value;
    }

    pub fn get(&self, indicator: Indicator) -> Option<bool> {
        self.flags[indicator.index()]
    }

    pub fn fired(&self, indicator: Indicator) -> bool {
        self.get(indicator).unwrap_or(false)
    }

    /// Indicators that fired, in declaration order
    pub fn triggered(&self) -> impl Iterator<Item = Indicator> + '_ {
        Indicator::ALL.into_iter().filter(|i| self.fired(*i))
    }

    pub fn triggered_names(&self) -> Vec<String> {
        self.triggered().map(|i| i.name().to_string()).collect()
    }
}

/// Derived features for one transaction
#[derive(Debug, Clone)]
pub struct RowFeatures {
    pub user_key: Option<String>,
    pub velocity: Option<f64>,
    pub indicators: IndicatorSet,
}

/// Per-user activity computed over the whole batch
#[derive(Debug, Clone, Default)]
pub struct UserActivity {
    velocity: HashMap<String, f64>,
    rapid_rows: HashSet<usize>,
}

impl UserActivity {
    /// Velocity is transactions per hour over the user's first-to-last span. A user
    /// with one timestamped transaction, or a zero span, has velocity 0; a user with
    /// no timestamped transaction has none.
    ///
    /// A row is in rapid succession when the same user's previous transaction is
    /// less than `rapid_minutes` earlier.
    pub fn compute(transactions: &[Transaction], rapid_minutes: f64) -> Self {
        let mut by_user: HashMap<String, Vec<(DateTime<Utc>, usize)>> = HashMap::new();

        for (idx, tx) in transactions.iter().enumerate() {
            if let (Some(key), Some(ts)) = (tx.user_key(), tx.created_at) {
                by_user.entry(key).or_default().push((ts, idx));
            }
        }

        let mut velocity = HashMap::with_capacity(by_user.len());
        let mut rapid_rows = HashSet::new();

        for (key, mut events) in by_user {
            events.sort();

            let v = match (events.first(), events.last()) {
                (Some((first, _)), Some((last, _))) if events.len() > 1 => {
                    let span_hours = (*last - *first).num_milliseconds() as f64 / 3_600_000.0;
                    if span_hours > 0.0 {
                        events.len() as f64 / span_hours
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };
            velocity.insert(key, v);

            for pair in events.windows(2) {
                let gap_minutes = (pair[1].0 - pair[0].0).num_milliseconds() as f64 / 60_000.0;
                if gap_minutes < rapid_minutes {
                    rapid_rows.insert(pair[1].1);
                }
            }
        }

        Self {
            velocity,
            rapid_rows,
        }
    }

    pub fn velocity(&self, user_key: &str) -> Option<f64> {
        self.velocity.get(user_key).copied()
    }

    pub fn is_rapid(&self, row: usize) -> bool {
        self.rapid_rows.contains(&row)
    }
}

/// Evaluates the indicator table over enriched transactions.
pub struct FeatureExtractor {
    config: RiskConfig,
}

impl FeatureExtractor {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Derive features for every row; output is aligned with the input slice.
    pub fn extract_all(&self, transactions: &[Transaction]) -> (Vec<RowFeatures>, UserActivity) {
        let activity = UserActivity::compute(transactions, self.config.rapid_succession_minutes);
        let features = transactions
            .iter()
            .enumerate()
            .map(|(idx, tx)| self.extract(idx, tx, &activity))
            .collect();
        (features, activity)
    }

    /// Derive features for the transaction at position `row` of the batch
    pub fn extract(&self, row: usize, tx: &Transaction, activity: &UserActivity) -> RowFeatures {
        let user_key = tx.user_key();
        let velocity = user_key.as_deref().and_then(|k| activity.velocity(k));
        let rapid_succession = match (&user_key, tx.created_at) {
            (Some(_), Some(_)) => Some(activity.is_rapid(row)),
            _ => None,
        };

        let ctx = RowContext {
            tx,
            config: &self.config,
            velocity,
            rapid_succession,
        };

        let mut indicators = IndicatorSet::default();
        for rule in RULES {
            indicators.set(rule.indicator, (rule.predicate)(&ctx));
        }

        RowFeatures {
            user_key,
            velocity,
            indicators,
        }
    }

    pub fn feature_names(&self) -> Vec<&'static str> {
        RULES.iter().map(|r| r.indicator.name()).collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx(id: &str) -> Transaction {
        Transaction::new(id)
    }

    #[test]
    fn test_every_indicator_has_a_rule() {
        let extractor = FeatureExtractor::default();
        let names = extractor.feature_names();
        assert_eq!(names.len(), Indicator::ALL.len());
        for indicator in Indicator::ALL {
            assert!(names.contains(&indicator.name()));
        }
    }

    #[test]
    fn test_two_row_example() {
        let mut first = tx("1");
        first.amount = Some(470.0);
        first.billing_country = Some("US".to_string());
        first.ip_country = Some("US".to_string());

        let mut second = tx("2");
        second.amount = Some(300.0);
        second.billing_country = Some("US".to_string());
        second.ip_country = Some("DE".to_string());

        let (features, _) = FeatureExtractor::default().extract_all(&[first, second]);

        let row1 = &features[0].indicators;
        assert!(row1.fired(Indicator::SuspiciousAmount));
        assert_eq!(row1.get(Indicator::GeoMismatch), Some(false));

        let row2 = &features[1].indicators;
        assert!(row2.fired(Indicator::GeoMismatch));
        assert!(!row2.fired(Indicator::SuspiciousAmount));
    }

    #[test]
    fn test_missing_inputs_are_not_evaluated() {
        let (features, _) = FeatureExtractor::default().extract_all(&[tx("empty")]);
        let set = &features[0].indicators;

        for indicator in Indicator::ALL {
            assert_eq!(set.get(indicator), None, "{} should not be evaluated", indicator);
        }
        assert_eq!(set.triggered().count(), 0);
    }

    #[test]
    fn test_single_transaction_has_zero_velocity() {
        let mut only = tx("solo");
        only.user_email = Some("solo@example.com".to_string());
        only.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

        let (features, activity) = FeatureExtractor::default().extract_all(&[only]);
        assert_eq!(activity.velocity("solo@example.com"), Some(0.0));
        assert_eq!(features[0].velocity, Some(0.0));
        assert_eq!(features[0].indicators.get(Indicator::UnusualSpeed), Some(false));
    }

    #[test]
    fn test_untimed_user_has_no_velocity() {
        let mut timed = tx("timed");
        timed.user_email = Some("mixed@example.com".to_string());
        timed.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let mut mixed_untimed = tx("mixed-untimed");
        mixed_untimed.user_email = Some("mixed@example.com".to_string());
        let mut untimed = tx("untimed");
        untimed.user_email = Some("untimed@example.com".to_string());

        let (features, activity) =
            FeatureExtractor::default().extract_all(&[timed, mixed_untimed, untimed]);

        assert_eq!(activity.velocity("untimed@example.com"), None);
        assert_eq!(features[2].velocity, None);
        assert_eq!(features[2].indicators.get(Indicator::UnusualSpeed), None);
        assert_eq!(features[2].indicators.get(Indicator::RapidSuccession), None);

        // the user's timestamped row still gives the untimed row a velocity
        assert_eq!(features[1].velocity, Some(0.0));
        assert_eq!(features[1].indicators.get(Indicator::UnusualSpeed), Some(false));
    }

    #[test]
    fn test_zero_span_has_zero_velocity() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let rows: Vec<Transaction> = (0..3)
            .map(|i| {
                let mut t = tx(&i.to_string());
                t.user_email = Some("burst@example.com".to_string());
                t.created_at = Some(ts);
                t
            })
            .collect();

        let activity = UserActivity::compute(&rows, 5.0);
        assert_eq!(activity.velocity("burst@example.com"), Some(0.0));
        // identical timestamps are still rapid succession
        assert!(activity.is_rapid(1));
        assert!(activity.is_rapid(2));
        assert!(!activity.is_rapid(0));
    }

    #[test]
    fn test_high_velocity_and_rapid_succession() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
        let rows: Vec<Transaction> = (0..7)
            .map(|i| {
                let mut t = tx(&i.to_string());
                t.body.phone = Some("4915100000".to_string());
                t.created_at = Some(start + chrono::Duration::minutes(i * 10));
                t
            })
            .collect();

        let (features, activity) = FeatureExtractor::default().extract_all(&rows);

        // 7 transactions over one hour
        let v = activity.velocity("4915100000").unwrap();
        assert!((v - 7.0).abs() < 1e-9);
        assert!(features[3].indicators.fired(Indicator::UnusualSpeed));
        // 10 minute gaps are not rapid
        assert_eq!(features[3].indicators.get(Indicator::RapidSuccession), Some(false));
        // 02:xx is outside the active window
        assert!(features[0].indicators.fired(Indicator::TimeAnomaly));
    }

    #[test]
    fn test_body_driven_indicators() {
        let mut t = tx("bot");
        t.body.user_agent = Some("python-requests/2.31".to_string());
        t.body.screen_width = Some("800".to_string());
        t.body.screen_height = Some("600".to_string());
        t.body.browser_language = Some("en-US".to_string());
        t.body.timezone = Some("UTC".to_string());
        t.amount = Some(2000.0);

        let (features, _) = FeatureExtractor::default().extract_all(&[t]);
        let triggered: Vec<Indicator> = features[0].indicators.triggered().collect();

        assert_eq!(
            triggered,
            vec![
                Indicator::SuspiciousBrowser,
                Indicator::SyntheticData,
                Indicator::RoundAmount,
                Indicator::SuspiciousAmount,
                Indicator::SuspiciousLanguage,
                Indicator::SuspiciousTimezone,
            ]
        );
    }

    #[test]
    fn test_accept_language_primary_tag() {
        let mut t = tx("lang");
        t.accept_language = Some("de-DE,de;q=0.9,en-US;q=0.8".to_string());

        let (features, _) = FeatureExtractor::default().extract_all(&[t]);
        assert_eq!(features[0].indicators.get(Indicator::SuspiciousLanguage), Some(false));
    }
}
