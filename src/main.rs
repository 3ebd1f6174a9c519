//! dpviews: exact and private page popularity for one scope and day.
//!
//! Reads the day's events from SQLite, runs the budget sweep, and prints the
//! reconciled report as JSON on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dpviews::adapters::sanitize::SanitizingMakeWriter;
use dpviews::adapters::{ChaChaNoiseFactory, SqliteEventSource};
use dpviews::{PopularityService, Scope, SweepConfig};

const DEFAULT_DB: &str = "dpviews.db";
const DEFAULT_SCOPE: &str = "en";

fn report_day() -> Result<NaiveDate> {
    match std::env::var("DPVIEWS_DAY") {
        Ok(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .with_context(|| format!("DPVIEWS_DAY must be YYYY-MM-DD, got {raw:?}")),
        Err(_) => Utc::now()
            .date_naive()
            .pred_opt()
            .context("no day before today"),
    }
}

fn main() -> Result<()> {
    // Stdout carries the report, so logs go to stderr or a file.
    let log_mode = std::env::var("DPVIEWS_LOG_MODE").unwrap_or_else(|_| "auto".to_string());
    let log_file = std::env::var("DPVIEWS_LOG_FILE").ok();

    let use_file = match log_mode.as_str() {
        "file" => true,
        "stderr" => false,
        // auto
        _ => log_file.is_some(),
    };

    let (writer, _guard) = if use_file {
        let log_file = log_file.unwrap_or_else(|| "dpviews.log".to_string());

        if let Some(parent) = std::path::Path::new(&log_file).parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    let config = match std::env::var("DPVIEWS_CONFIG") {
        Ok(path) => SweepConfig::from_json_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        Err(_) => SweepConfig::from_env_or_default()?,
    };

    let db = std::env::var("DPVIEWS_DB").unwrap_or_else(|_| DEFAULT_DB.to_string());
    let label = std::env::var("DPVIEWS_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string());
    let scope = Scope::new(label, report_day()?);

    tracing::info!("Starting dpviews for {scope}...");

    let source = SqliteEventSource::new(&db).with_context(|| format!("opening {db}"))?;
    let service = PopularityService::new(
        Arc::new(source),
        Arc::new(ChaChaNoiseFactory::new()),
        &config,
    )?;
    let report = service.run(&scope)?;

    let stdout = std::io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &report)?;
    println!();

    tracing::info!("dpviews finished.");
    Ok(())
}
