//! Runs the whole report: load, merge, clean, enrich, aggregate, write.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analyzers::{Aggregates, ConditionRate, high_risk_patients};
use crate::charts::write_charts;
use crate::error::RowError;
use crate::fetch::load_source;
use crate::output::{
    export_avg_stay_by_condition, export_data_quality, export_path,
    export_readmission_by_condition, export_rows, export_table, print_key_metrics, print_pretty,
    write_json,
};
use crate::parser::{parse_hospitals, parse_patients, parse_treatments};
use crate::pipeline::clean::{FillReport, clean};
use crate::pipeline::enrich::{StayAnomaly, default_reference_date, enrich};
use crate::pipeline::merge::{MergeReport, TreatmentJoin, merge};
use crate::records::{EnrichedTable, HospitalRecord, Loaded, PatientRecord, TreatmentRecord};

pub const FULL_TABLE: &str = "full_patient_analysis.csv";
pub const AVG_STAY_BY_CONDITION: &str = "avg_stay_by_condition.csv";
pub const READMISSION_BY_CONDITION: &str = "readmission_by_condition.csv";
pub const HIGH_RISK_PATIENTS: &str = "high_risk_patients.csv";
pub const DATA_QUALITY: &str = "data_quality.csv";
pub const SUMMARY_JSON: &str = "summary.json";

#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Path or URL of each source.
    pub patients: String,
    pub hospitals: String,
    pub treatments: String,
    pub output_dir: PathBuf,
    pub reference_date: NaiveDate,
    pub treatment_join: TreatmentJoin,
    pub gzip: bool,
    /// Abort on the first malformed row instead of excluding it.
    pub strict: bool,
    pub charts: bool,
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            patients: "patient_data.csv".to_string(),
            hospitals: "hospital_data.csv".to_string(),
            treatments: "treatment_data.csv".to_string(),
            output_dir: PathBuf::from("."),
            reference_date: default_reference_date(),
            treatment_join: TreatmentJoin::default(),
            gzip: false,
            strict: false,
            charts: true,
            top_n: 5,
        }
    }
}

/// The three parsed sources.
#[derive(Debug, Clone)]
pub struct Sources {
    pub patients: Loaded<PatientRecord>,
    pub hospitals: Loaded<HospitalRecord>,
    pub treatments: Loaded<TreatmentRecord>,
}

impl Sources {
    #[tracing::instrument]
    pub fn load(patients: &str, hospitals: &str, treatments: &str) -> Result<Self> {
        let sources = Sources {
            patients: parse_patients("patients", &load_source(patients)?)?,
            hospitals: parse_hospitals("hospitals", &load_source(hospitals)?)?,
            treatments: parse_treatments("treatments", &load_source(treatments)?)?,
        };
        for error in sources.row_errors() {
            warn!(
                source = %error.source_name,
                line = error.line,
                column = %error.column,
                value = %error.value,
                "Rejected row: {}",
                error.message
            );
        }
        info!(
            patients = sources.patients.rows.len(),
            hospitals = sources.hospitals.rows.len(),
            treatments = sources.treatments.rows.len(),
            rejected = sources.row_errors().len(),
            "Sources loaded"
        );
        Ok(sources)
    }

    /// Rejected rows across all sources.
    pub fn row_errors(&self) -> Vec<RowError> {
        self.patients
            .errors
            .iter()
            .chain(&self.hospitals.errors)
            .chain(&self.treatments.errors)
            .cloned()
            .collect()
    }
}

/// Everything computed from the sources, before anything is written.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub table: EnrichedTable,
    pub merge: MergeReport,
    pub fill: FillReport,
    pub anomalies: Vec<StayAnomaly>,
    pub aggregates: Aggregates,
}

/// Runs merge, clean, enrich and aggregate over loaded sources.
pub fn analyze(
    sources: &Sources,
    reference_date: NaiveDate,
    treatment_join: TreatmentJoin,
) -> Result<Analysis> {
    let (merged, merge_report) = merge(
        &sources.patients.rows,
        &sources.hospitals,
        &sources.treatments,
        treatment_join,
    );
    let (cleaned, fill_report) = clean(merged);
    let (table, anomalies) = enrich(cleaned, reference_date);
    let aggregates = Aggregates::from_rows(&table.rows)?;

    Ok(Analysis {
        table,
        merge: merge_report,
        fill: fill_report,
        anomalies,
        aggregates,
    })
}

#[derive(Debug, Serialize)]
pub struct ReportSummary<'a> {
    pub schema_version: u8,
    pub generated_at: DateTime<Utc>,
    pub reference_date: NaiveDate,
    pub treatment_join: TreatmentJoin,
    pub merge: &'a MergeReport,
    pub fill: &'a FillReport,
    pub rejected_rows: usize,
    pub stay_anomalies: usize,
    pub top_readmission_conditions: Vec<ConditionRate>,
    pub aggregates: &'a Aggregates,
}

#[derive(Debug)]
pub struct ReportOutcome {
    pub analysis: Analysis,
    pub row_errors: Vec<RowError>,
    pub written: Vec<PathBuf>,
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))
}

/// Loads the sources, runs the pipeline and writes every report artifact.
#[tracing::instrument(skip(config), fields(output_dir = %config.output_dir.display()))]
pub fn run_report(config: &ReportConfig) -> Result<ReportOutcome> {
    let sources = Sources::load(&config.patients, &config.hospitals, &config.treatments)?;
    let row_errors = sources.row_errors();

    if config.strict && !row_errors.is_empty() {
        bail!(
            "{} malformed row(s); first: {}",
            row_errors.len(),
            row_errors[0]
        );
    }
    if !row_errors.is_empty() {
        warn!(
            rejected = row_errors.len(),
            "Malformed rows were excluded; see {DATA_QUALITY}"
        );
    }

    let analysis = analyze(&sources, config.reference_date, config.treatment_join)?;
    print_pretty(&analysis.aggregates);
    print_key_metrics(&analysis.aggregates, config.top_n);

    let dir = config.output_dir.as_path();
    ensure_dir(dir)?;
    let mut written = Vec::new();

    if config.charts {
        written.extend(write_charts(dir, &analysis.aggregates)?);
    }

    let path = export_path(dir, FULL_TABLE, config.gzip);
    export_table(&path, &analysis.table, config.gzip)?;
    written.push(path);

    let path = export_path(dir, AVG_STAY_BY_CONDITION, config.gzip);
    export_avg_stay_by_condition(&path, &analysis.aggregates.avg_stay_by_condition, config.gzip)?;
    written.push(path);

    let path = export_path(dir, READMISSION_BY_CONDITION, config.gzip);
    export_readmission_by_condition(
        &path,
        &analysis.aggregates.readmission_by_condition,
        config.gzip,
    )?;
    written.push(path);

    let path = export_path(dir, HIGH_RISK_PATIENTS, config.gzip);
    export_rows(
        &path,
        &analysis.table,
        high_risk_patients(&analysis.table.rows),
        config.gzip,
    )?;
    written.push(path);

    let path = export_path(dir, DATA_QUALITY, config.gzip);
    export_data_quality(&path, &row_errors, &analysis.anomalies, config.gzip)?;
    written.push(path);

    let summary = ReportSummary {
        schema_version: 1,
        generated_at: Utc::now(),
        reference_date: config.reference_date,
        treatment_join: config.treatment_join,
        merge: &analysis.merge,
        fill: &analysis.fill,
        rejected_rows: row_errors.len(),
        stay_anomalies: analysis.anomalies.len(),
        top_readmission_conditions: analysis.aggregates.top_readmission_conditions(config.top_n),
        aggregates: &analysis.aggregates,
    };
    let path = dir.join(SUMMARY_JSON);
    write_json(&path, &summary)?;
    written.push(path);

    info!(files = written.len(), "Report written");

    Ok(ReportOutcome {
        analysis,
        row_errors,
        written,
    })
}

/// Load-only check of the sources and their join coverage.
#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub patients: usize,
    pub hospitals: usize,
    pub treatments: usize,
    pub row_errors: Vec<RowError>,
    pub merge: MergeReport,
}

pub fn validate(config: &ReportConfig) -> Result<Validation> {
    let sources = Sources::load(&config.patients, &config.hospitals, &config.treatments)?;
    let (_, merge_report) = merge(
        &sources.patients.rows,
        &sources.hospitals,
        &sources.treatments,
        config.treatment_join,
    );

    Ok(Validation {
        patients: sources.patients.rows.len(),
        hospitals: sources.hospitals.rows.len(),
        treatments: sources.treatments.rows.len(),
        row_errors: sources.row_errors(),
        merge: merge_report,
    })
}
