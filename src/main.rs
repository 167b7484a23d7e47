//! CLI entry point for the hospital operations report.
//!
//! `report` runs the full pipeline and writes charts, CSV exports and a JSON
//! summary. `validate` only loads the sources and reports rejected rows and
//! join coverage.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use hospital_analytics::parser::parse_date;
use hospital_analytics::pipeline::enrich::default_reference_date;
use hospital_analytics::pipeline::merge::TreatmentJoin;
use hospital_analytics::report::{ReportConfig, run_report, validate};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "hospital_analytics")]
#[command(about = "Hospital operations analytics over patient, hospital and treatment CSVs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Patient CSV (path or URL)
    #[arg(long, default_value = "patient_data.csv")]
    patients: String,

    /// Hospital CSV (path or URL)
    #[arg(long, default_value = "hospital_data.csv")]
    hospitals: String,

    /// Treatment CSV (path or URL)
    #[arg(long, default_value = "treatment_data.csv")]
    treatments: String,

    /// How conditions with several treatments are joined
    #[arg(long, value_enum, default_value_t = TreatmentJoin::FanOut)]
    treatment_join: TreatmentJoin,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the report
    Report {
        #[command(flatten)]
        sources: SourceArgs,

        /// Directory for charts and exports
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Date ages are computed against (falls back to REFERENCE_DATE, then 2024-01-01)
        #[arg(long, value_parser = parse_reference_date)]
        reference_date: Option<NaiveDate>,

        /// Gzip compress the CSV exports
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Fail on the first malformed row instead of excluding it
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Skip writing SVG charts
        #[arg(long, default_value_t = false)]
        no_charts: bool,

        /// Number of conditions listed in the readmission ranking
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
    /// Load the sources and report rejected rows and join coverage
    Validate {
        #[command(flatten)]
        sources: SourceArgs,
    },
}

fn parse_reference_date(value: &str) -> Result<NaiveDate, String> {
    parse_date(value)
}

/// `--reference-date`, else `REFERENCE_DATE`, else the fixed default.
fn resolve_reference_date(flag: Option<NaiveDate>) -> Result<NaiveDate> {
    if let Some(date) = flag {
        return Ok(date);
    }
    match std::env::var("REFERENCE_DATE") {
        Ok(value) => parse_reference_date(&value)
            .map_err(anyhow::Error::msg)
            .context("invalid REFERENCE_DATE"),
        Err(_) => Ok(default_reference_date()),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/hospital_analytics.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("hospital_analytics.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Report {
            sources,
            output_dir,
            reference_date,
            gzip,
            strict,
            no_charts,
            top,
        } => {
            let config = ReportConfig {
                patients: sources.patients,
                hospitals: sources.hospitals,
                treatments: sources.treatments,
                output_dir,
                reference_date: resolve_reference_date(reference_date)?,
                treatment_join: sources.treatment_join,
                gzip,
                strict,
                charts: !no_charts,
                top_n: top,
            };
            let outcome = run_report(&config)?;
            for path in &outcome.written {
                info!(path = %path.display(), "Wrote");
            }
        }
        Commands::Validate { sources } => {
            let config = ReportConfig {
                patients: sources.patients,
                hospitals: sources.hospitals,
                treatments: sources.treatments,
                treatment_join: sources.treatment_join,
                ..ReportConfig::default()
            };
            let validation = validate(&config)?;
            info!(
                patients = validation.patients,
                hospitals = validation.hospitals,
                treatments = validation.treatments,
                rejected = validation.row_errors.len(),
                unmatched_hospital = validation.merge.unmatched_hospital,
                unmatched_treatment = validation.merge.unmatched_treatment,
                fanned_out_patients = validation.merge.fanned_out_patients,
                "Validation summary"
            );
        }
    }

    Ok(())
}
