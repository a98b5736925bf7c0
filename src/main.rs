//! Payment Risk Analytics - Main Entry Point
//!
//! `analyze` runs the full pipeline over a CSV export and writes summary tables,
//! risk exports and a markdown report; `to-sqlite` loads the export into a `facts` table.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use payment_risk_analytics::{
    config::{AppConfig, LoggingConfig},
    export::{self, FactsStore},
    geo::GeoResolver,
    ingest,
    metrics::RunMetrics,
    normalizer::RecordNormalizer,
    pipeline::Pipeline,
    report::ReportComposer,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "payment-risk-analytics", version, about = "Risk scoring and success-rate analysis for payment exports")]
struct Cli {
    /// Configuration file (TOML); defaults to config/config.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full analysis and write exports plus report.md
    Analyze {
        /// Input CSV export
        input: PathBuf,
        /// Offline MMDB geolocation database
        #[arg(long)]
        mmdb: Option<String>,
        /// CSV of ip,country pairs
        #[arg(long)]
        ip_map: Option<String>,
        /// Output directory
        #[arg(long, default_value = "analysis_output")]
        out_dir: PathBuf,
    },
    /// Write the export into a SQLite `facts` table
    ToSqlite {
        input: PathBuf,
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging)?;

    match cli.command {
        Command::Analyze {
            input,
            mmdb,
            ip_map,
            out_dir,
        } => analyze(config, &input, mmdb, ip_map, &out_dir),
        Command::ToSqlite { input, output } => to_sqlite(&input, &output),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_path(path),
        None if Path::new("config/config.toml").exists() => AppConfig::load(),
        None => Ok(AppConfig::default()),
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("payment_risk_analytics={}", logging.level).parse()?);

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn analyze(
    mut config: AppConfig,
    input: &Path,
    mmdb: Option<String>,
    ip_map: Option<String>,
    out_dir: &Path,
) -> Result<()> {
    info!("Starting payment risk analysis");

    if mmdb.is_some() {
        config.geo.mmdb_path = mmdb;
    }
    if ip_map.is_some() {
        config.geo.ip_map_path = ip_map;
    }
    info!(
        "Risk tiers: medium>={:.1}, high>={:.1}, alert threshold {:.1}",
        config.risk.tiers.medium, config.risk.tiers.high, config.risk.alert_threshold
    );

    let metrics = RunMetrics::new();
    let mut resolver = GeoResolver::from_config(&config.geo);
    let pipeline = Pipeline::new(config);

    let output = pipeline
        .run_file(input, &mut resolver, &metrics)
        .with_context(|| format!("Failed to analyse {}", input.display()))?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    for (name, rows) in &output.summaries {
        let path = out_dir.join(format!("summary_{}.csv", name));
        export::write_file(&path, |w| export::write_summary_csv(w, rows))?;
    }
    export::write_file(&out_dir.join("user_risk.csv"), |w| {
        export::write_profiles_csv(w, &output.user_profiles)
    })?;
    export::write_file(&out_dir.join("scores.csv"), |w| {
        export::write_scores_csv(w, &output.enriched)
    })?;
    if !output.decline_reasons.is_empty() {
        export::write_file(&out_dir.join("decline_reasons.csv"), |w| {
            export::write_records_csv(w, &output.decline_reasons)
        })?;
        export::write_file(&out_dir.join("decline_drivers.csv"), |w| {
            export::write_records_csv(w, &output.drivers)
        })?;
    }
    export::write_json(&out_dir.join("alerts.json"), &output.alerts)?;
    export::write_json(&out_dir.join("analysis.json"), &output)?;

    let report = ReportComposer::new(&pipeline.config().analysis).compose(&output);
    std::fs::write(out_dir.join("report.md"), report)?;

    info!(
        out_dir = %out_dir.display(),
        summaries = output.summaries.len(),
        alerts = output.alerts.len(),
        "Analysis written"
    );
    metrics.print_summary();

    Ok(())
}

fn to_sqlite(input: &Path, output: &Path) -> Result<()> {
    let dataset = ingest::load_csv(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let columns = &dataset.columns;
    columns
        .require(&[
            ("created_at", columns.created_at),
            ("status", columns.status),
            ("gateway_code", columns.gateway_code),
        ])
        .context("Input is missing required columns")?;

    if dataset.timestamp_failures > 0 {
        warn!(rows = dataset.timestamp_failures, "Rows with unparseable created_at will be dropped");
    }

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

    let mut store = FactsStore::open(output)
        .with_context(|| format!("Failed to open {}", output.display()))?;
    let written = store.write_facts(&transactions)?;

    info!(rows = written, db = %output.display(), "SQLite export complete");
    Ok(())
}
