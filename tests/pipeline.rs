//! End-to-end: CSV export → analysis → exports, report and SQLite facts table

use payment_risk_analytics::config::AppConfig;
use payment_risk_analytics::export::{self, FactsStore};
use payment_risk_analytics::feature_extractor::Indicator;
use payment_risk_analytics::geo::{CsvIpMapProvider, GeoProvider, GeoResolver};
use payment_risk_analytics::ingest;
use payment_risk_analytics::metrics::RunMetrics;
use payment_risk_analytics::normalizer::RecordNormalizer;
use payment_risk_analytics::pipeline::Pipeline;
use payment_risk_analytics::report::ReportComposer;
use payment_risk_analytics::summary::{AnomalyMethod, GeoSource, GroupKey, NumericColumn};
use payment_risk_analytics::types::RiskTier;
use std::fs;
use std::path::Path;

const EXPORT: &str = r#"id,created_at,status_title,is_final,gateway_name,gateway_code,gateway_message,amount,bin_country,ip,body
tx1,2024-03-04 10:00:00,Completed,true,stripe,00,Approved,120.50,US,198.51.100.1,"{""payer"": {""email"": ""alice@example.com"", ""billing_address"": {""country_code"": ""US""}}, ""initiator"": {""browser"": {""user_agent"": ""Mozilla/5.0 Chrome/120.0 Safari/537.36"", ""language"": ""de-DE""}}}"
tx2,2024-03-04 12:30:00,Completed,true,stripe,00,Approved,80,US,198.51.100.1,"{""payer"": {""email"": ""alice@example.com"", ""billing_address"": {""country_code"": ""US""}}}"
tx3,2024-03-05 02:00:00,Failed,true,adyen,05,Do not honor,2000,NG,203.0.113.9,"{""payer"": {""email"": ""bot@tempmail.io"", ""billing_address"": {""country_code"": ""US""}}, ""initiator"": {""browser"": {""user_agent"": ""python-requests/2.31"", ""language"": ""en-US"", ""time_zone"": ""UTC"", ""screen_width"": 800, ""screen_height"": 600}}}"
tx4,2024-03-05 02:01:00,Failed,true,adyen,05,Do not honor,470,NG,203.0.113.9,"{""payer"": {""email"": ""bot@tempmail.io"", ""billing_address"": {""country_code"": ""US""}}, ""initiator"": {""browser"": {""user_agent"": ""python-requests/2.31"", ""screen_width"": 800, ""screen_height"": 600}}}"
tx5,2024-03-05 02:02:00,Failed,false,adyen,51,Insufficient funds,5000,NG,203.0.113.9,"{""payer"": {""email"": ""bot@tempmail.io""}}"
tx6,not-a-date,Completed,true,stripe,00,Approved,55,DE,,{broken
"#;

const IP_MAP: &str = "ip,country\n198.51.100.1,US\n203.0.113.9,DE\n";

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_full_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "export.csv", EXPORT);
    let ip_map = write(dir.path(), "ip_map.csv", IP_MAP);

    let mut config = AppConfig::default();
    config.geo.ip_map_path = Some(ip_map.to_string_lossy().into_owned());

    let metrics = RunMetrics::new();
    let mut resolver = GeoResolver::from_config(&config.geo);
    assert!(resolver.is_available());

    let pipeline = Pipeline::new(config);
    let output = pipeline.run_file(&input, &mut resolver, &metrics).unwrap();

    assert_eq!(output.rows, 6);
    // tx1/tx2 share an IP, tx3..tx5 share another
    assert_eq!(resolver.cache_len(), 2);
    assert_eq!(resolver.stats().cache_hits, 3);

    let tx3 = &output.enriched[2];
    assert_eq!(tx3.tx.effective_ip_country(), Some("DE"));
    for indicator in [
        Indicator::GeoMismatch,
        Indicator::SuspiciousBrowser,
        Indicator::SyntheticData,
        Indicator::TimeAnomaly,
        Indicator::RoundAmount,
        Indicator::SuspiciousAmount,
        Indicator::SuspiciousLanguage,
        Indicator::SuspiciousTimezone,
    ] {
        assert!(tx3.risk.indicators.fired(indicator), "{} should fire", indicator);
    }
    // 3 tx in 2 minutes adds unusual_speed (2.0) on top of the 13.5 above
    assert!(tx3.risk.indicators.fired(Indicator::UnusualSpeed));
    assert!(!tx3.risk.indicators.fired(Indicator::RapidSuccession));
    assert!(output.enriched[3].risk.indicators.fired(Indicator::RapidSuccession));
    assert!((tx3.risk.risk_score - 15.5).abs() < 1e-9);
    assert_eq!(tx3.risk.risk_tier, RiskTier::High);

    // every score is non-negative
    assert!(output.enriched.iter().all(|r| r.risk.risk_score >= 0.0));

    // malformed body and timestamp degrade to nulls
    let tx6 = &output.enriched[5];
    assert!(tx6.tx.body.is_empty());
    assert!(tx6.tx.created_at.is_none());
    assert_eq!(tx6.risk.indicators.get(Indicator::TimeAnomaly), None);

    let profiles = &output.user_profiles;
    assert_eq!(profiles[0].user_key, "bot@tempmail.io");
    assert_eq!(profiles[0].transactions, 3);
    assert_eq!(profiles[0].approved, 0);
    let alice = profiles.iter().find(|p| p.user_key == "alice@example.com").unwrap();
    assert_eq!(alice.risk_tier, RiskTier::Low);

    assert!(output.alerts.iter().all(|a| a.risk_score >= 7.0));
    assert!(output.alerts.iter().any(|a| a.transaction_id == "tx3"));

    // tx5 is not final, so adyen has no approvals
    let gateways = output.summary(&[GroupKey::Gateway]).unwrap();
    let adyen = gateways.iter().find(|r| r.label() == "adyen").unwrap();
    assert_eq!((adyen.attempts, adyen.approved), (3, 0));

    assert_eq!(output.declines[0].gateway_code, "05");
    assert_eq!(output.declines[0].declines, 2);
    assert!(!output.periods.is_empty());

    let ng = output
        .decline_reasons
        .iter()
        .find(|r| r.geo_source == GeoSource::BinCountry && r.country == "NG")
        .unwrap();
    assert_eq!(ng.reason, "05 | Do not honor");
    assert_eq!((ng.declines, ng.attempts), (2, 3));
    assert!((ng.declines_per_100 - 200.0 / 3.0).abs() < 1e-9);
    // a single week has nothing to compare against
    assert!(!output.drivers.is_empty());
    assert!(output.drivers.iter().all(|d| d.delta_per_100.is_none()));

    // median 295.25, MAD 227.75
    let mad = output
        .anomalies
        .iter()
        .find(|a| a.column == NumericColumn::Amount && a.method == AnomalyMethod::Mad)
        .unwrap();
    assert_eq!(mad.evaluated, 6);
    assert_eq!(mad.flagged, 2);
    assert_eq!(mad.top[0].transaction_id, "tx5");
    assert_eq!(mad.top[1].transaction_id, "tx3");

    // exports
    let out_dir = dir.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();
    for (name, rows) in &output.summaries {
        let path = out_dir.join(format!("summary_{}.csv", name));
        export::write_file(&path, |w| export::write_summary_csv(w, rows)).unwrap();
    }
    export::write_json(&out_dir.join("analysis.json"), &output).unwrap();
    export::write_json(&out_dir.join("alerts.json"), &output.alerts).unwrap();

    let analysis: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("analysis.json")).unwrap()).unwrap();
    assert_eq!(analysis["rows"], 6);
    assert!(analysis.get("enriched").is_none());
    assert!(out_dir.join("summary_gateway_name.csv").exists());

    let report = ReportComposer::new(&pipeline.config().analysis).compose(&output);
    assert!(report.contains("## Success rate by gateway"));
    assert!(report.contains("`05`: 2 declines"));
    assert!(report.contains("critical"));
    assert!(report.contains("- `amount` (mad): 2 of 6 rows above 3.0; top: tx5"));
    assert!(!report.contains("## Decline drivers"));
}

#[test]
fn test_idempotent_geo_lookup() {
    let provider = CsvIpMapProvider::from_reader(IP_MAP.as_bytes()).unwrap();
    assert_eq!(provider.name(), "ip_map");

    let mut resolver = GeoResolver::new(vec![Box::new(provider)]);
    let first = resolver.resolve("203.0.113.9");
    let second = resolver.resolve("203.0.113.9");
    assert_eq!(first, second);
    assert_eq!(first.country.as_deref(), Some("DE"));
    assert!(resolver.resolve("192.0.2.1").is_empty());
}

#[test]
fn test_sqlite_export() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "export.csv", EXPORT);
    let db_path = dir.path().join("facts.db");

    let dataset = ingest::load_csv(&input).unwrap();
    let columns = &dataset.columns;
    columns
        .require(&[
            ("created_at", columns.created_at),
            ("status", columns.status),
            ("gateway_code", columns.gateway_code),
        ])
        .unwrap();

    let normalizer = RecordNormalizer::new();
    let transactions: Vec<_> = dataset
        .rows
        .into_iter()
        .map(|row| {
            let mut tx = row.transaction;
            normalizer.normalize_row(&mut tx, &row.payloads);
            tx
        })
        .collect();

    let mut store = FactsStore::open(&db_path).unwrap();
    // tx6 has no parseable created_at
    assert_eq!(store.write_facts(&transactions).unwrap(), 5);
    assert_eq!(store.count().unwrap(), 5);
    assert_eq!(store.indexes().unwrap().len(), 5);
}

#[test]
fn test_missing_required_columns() {
    let dataset = ingest::read_csv("id,amount\n1,10\n".as_bytes()).unwrap();
    let columns = &dataset.columns;
    let err = columns
        .require(&[
            ("created_at", columns.created_at),
            ("status", columns.status),
            ("gateway_code", columns.gateway_code),
        ])
        .unwrap_err();
    assert_eq!(err.to_string(), "missing column: created_at");
}

#[test]
fn test_empty_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "empty.csv", "");
    let pipeline = Pipeline::new(AppConfig::default());
    let result = pipeline.run_file(&input, &mut GeoResolver::unavailable(), &RunMetrics::new());
    assert!(result.is_err());
}
