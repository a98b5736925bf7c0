//! Sample Data Generator
//!
//! Writes a synthetic payment export (legitimate and bot-like attempts) for trying
//! the analysis pipeline end to end.

use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "sample-generator", about = "Write a synthetic payment export CSV")]
struct Args {
    /// Output CSV path
    #[arg(default_value = "sample_transactions.csv")]
    output: PathBuf,
    /// Number of rows
    #[arg(long, default_value_t = 500)]
    count: u64,
    /// Share of bot-like rows
    #[arg(long, default_value_t = 0.1)]
    fraud_rate: f64,
    /// RNG seed for reproducible files
    #[arg(long)]
    seed: Option<u64>,
}

/// One row in the export layout the pipeline reads
#[derive(Debug, Serialize)]
struct ExportRow {
    id: String,
    created_at: String,
    status_title: String,
    is_final: bool,
    gateway_name: String,
    gateway_code: String,
    gateway_message: String,
    amount: f64,
    currency: String,
    bin_country: String,
    billing_country: String,
    ip: String,
    body: String,
}

const COUNTRIES: &[&str] = &["US", "GB", "CA", "DE", "FR", "NL"];
const GATEWAYS: &[&str] = &["stripe", "adyen", "checkout"];
const DECLINES: &[(&str, &str)] = &[
    ("05", "Do not honor"),
    ("51", "Insufficient funds"),
    ("14", "Invalid card number"),
    ("59", "Suspected fraud"),
];
const BROWSERS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
];
const BOT_AGENTS: &[&str] = &[
    "python-requests/2.31.0",
    "curl/8.4.0",
    "Mozilla/5.0 HeadlessChrome/120.0",
];

/// Export generator
struct SampleGenerator {
    rng: StdRng,
    counter: u64,
    start: DateTime<Utc>,
}

impl SampleGenerator {
    fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seed.map(StdRng::seed_from_u64).unwrap_or_else(StdRng::from_entropy),
            counter: 0,
            start: Utc::now() - Duration::days(30),
        }
    }

    fn random_ip(&mut self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.rng.gen_range(1..224),
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(1..255)
        )
    }

    fn outcome(&mut self, success_rate: f64) -> (String, String, String) {
        if self.rng.gen_bool(success_rate) {
            ("Completed".into(), "00".into(), "Approved".into())
        } else {
            let (code, msg) = self.random_choice(DECLINES);
            ("Failed".into(), code.to_string(), msg.to_string())
        }
    }

    /// A random legitimate attempt during the day
    fn generate_legitimate(&mut self) -> ExportRow {
        self.counter += 1;
        let ts = self.start
            + Duration::days(self.rng.gen_range(0..30))
            + Duration::hours(self.rng.gen_range(7..22))
            + Duration::minutes(self.rng.gen_range(0..60));
        let country = self.random_choice(COUNTRIES);
        let (status, code, message) = self.outcome(0.88);
        let email = format!("customer{}@example.com", self.rng.gen_range(1..400));
        let ua = self.random_choice(BROWSERS);
        let ip = self.random_ip();

        let body = json!({
            "payer": {
                "email": email,
                "billing_address": {"country_code": country, "address_line_1": "1 Main St"}
            },
            "initiator": {
                "ip_address": ip,
                "browser": {
                    "user_agent": ua,
                    "language": "de-DE",
                    "time_zone": "Europe/Berlin",
                    "screen_width": 1920,
                    "screen_height": 1080
                }
            },
            "card": {"brand": self.random_choice(&["VISA", "MASTERCARD", "AMEX"]), "type": "credit"}
        });

        ExportRow {
            id: format!("tx_{:08}", self.counter),
            created_at: ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            status_title: status,
            is_final: true,
            gateway_name: self.random_choice(GATEWAYS).to_string(),
            gateway_code: code,
            gateway_message: message,
            amount: (self.rng.gen_range(10.0..500.0_f64) * 100.0).round() / 100.0,
            currency: self.random_choice(&["USD", "EUR", "GBP"]).to_string(),
            bin_country: country.to_string(),
            billing_country: country.to_string(),
            ip,
            body: body.to_string(),
        }
    }

    /// A bot-like burst attempt: night time, scripted agent, test resolution,
    /// card-testing amounts, mismatched geography
    fn generate_suspicious(&mut self) -> ExportRow {
        self.counter += 1;
        let ts = self.start
            + Duration::days(self.rng.gen_range(0..30))
            + Duration::hours(self.rng.gen_range(0..5))
            + Duration::minutes(self.rng.gen_range(0..10));
        let billing = self.random_choice(COUNTRIES);
        let bin = self.random_choice(&["NG", "RU", "BR", "US"]);
        let (status, code, message) = self.outcome(0.35);
        let email = format!("bot{}@tempmail.io", self.rng.gen_range(1..6));
        let ip = self.random_ip();

        let body = json!({
            "payer": {"email": email, "billing_address": {"country_code": billing}},
            "initiator": {
                "ip_address": ip,
                "browser": {
                    "user_agent": self.random_choice(BOT_AGENTS),
                    "language": "en-US",
                    "time_zone": "UTC",
                    "screen_width": 800,
                    "screen_height": 600
                }
            },
            "card": {"brand": "VISA", "type": "prepaid"}
        });

        ExportRow {
            id: format!("tx_{:08}", self.counter),
            created_at: ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            status_title: status,
            is_final: true,
            gateway_name: self.random_choice(GATEWAYS).to_string(),
            gateway_code: code,
            gateway_message: message,
            amount: *self.random_choice(&[470.0, 496.0, 1978.0, 2000.0, 5000.0]),
            currency: "USD".to_string(),
            bin_country: bin.to_string(),
            billing_country: billing.to_string(),
            ip,
            body: body.to_string(),
        }
    }

    fn random_choice<'a, T>(&mut self, choices: &'a [T]) -> &'a T {
        &choices[self.rng.gen_range(0..choices.len())]
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sample_generator=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(
        output = %args.output.display(),
        count = args.count,
        fraud_rate = args.fraud_rate,
        "Generating sample export"
    );

    let mut generator = SampleGenerator::new(args.seed);
    let mut writer = csv::Writer::from_path(&args.output)?;
    let fraud_rate = args.fraud_rate.clamp(0.0, 1.0);

    let mut suspicious_count = 0;
    for _ in 0..args.count {
        let row = if generator.rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };
        writer.serialize(&row)?;
    }
    writer.flush()?;

    info!(
        "Completed! Wrote {} rows ({} legitimate, {} suspicious)",
        args.count,
        args.count - suspicious_count,
        suspicious_count
    );
    Ok(())
}
