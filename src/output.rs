//! Output formatting and persistence for the report.
//!
//! Supports structured logging of key metrics, CSV export (optionally
//! gzip-compressed), and JSON serialization.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analyzers::Aggregates;
use crate::analyzers::utility::pct;
use crate::error::RowError;
use crate::pipeline::enrich::StayAnomaly;
use crate::records::{EnrichedRow, EnrichedTable};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// File sink that may gzip what it is given.
enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn create(path: &Path, gzip: bool) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(if gzip {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        })
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
        }
    }
}

/// Final path of a CSV export, with `.gz` appended when compressing.
pub fn export_path(dir: &Path, file_name: &str, gzip: bool) -> PathBuf {
    if gzip {
        dir.join(format!("{file_name}.gz"))
    } else {
        dir.join(file_name)
    }
}

/// Writes a CSV file through `fill`, finishing the gzip stream if any.
/// Header rows are written by `fill` so empty exports still carry them.
fn write_csv(
    path: &Path,
    gzip: bool,
    fill: impl FnOnce(&mut csv::Writer<Sink>) -> Result<()>,
) -> Result<()> {
    let run = || -> Result<()> {
        let sink = Sink::create(path, gzip)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(sink);
        fill(&mut writer)?;
        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.finish()?;
        Ok(())
    };
    run().with_context(|| format!("failed to write {}", path.display()))?;

    debug!(path = %path.display(), gzip, "CSV written");
    Ok(())
}

fn cell<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Attribute names present in both the hospital and treatment sources get
/// `_x` (hospital) and `_y` (treatment) suffixes.
fn suffixed(column: &str, other: &[String], suffix: &str) -> String {
    if other.iter().any(|o| o == column) {
        format!("{column}{suffix}")
    } else {
        column.to_string()
    }
}

/// Column names of the full table, in export order.
pub fn table_header(table: &EnrichedTable) -> Vec<String> {
    let mut header: Vec<String> = [
        "Patient_ID",
        "DOB",
        "Admission_Date",
        "Discharge_Date",
        "Gender",
        "Condition",
        "Hospital_ID",
        "Readmitted",
        "Outcome",
        "Department",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    header.extend(
        table
            .hospital_columns
            .iter()
            .map(|c| suffixed(c, &table.treatment_columns, "_x")),
    );
    header.extend(["Treatment_Type", "Effectiveness_Rate"].map(String::from));
    header.extend(
        table
            .treatment_columns
            .iter()
            .map(|c| suffixed(c, &table.hospital_columns, "_y")),
    );
    header.extend(
        [
            "Age",
            "Age_Group",
            "Admission_Month",
            "Discharge_Month",
            "Length_of_Stay",
        ]
        .map(String::from),
    );
    header
}

/// One exported line of the full table, aligned with [`table_header`].
pub fn table_record(row: &EnrichedRow) -> Vec<String> {
    let p = &row.row.patient;
    let date = |d: &Option<chrono::NaiveDate>| {
        d.map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default()
    };

    let mut record = vec![
        cell(&p.patient_id),
        date(&p.date_of_birth),
        date(&p.admission_date),
        date(&p.discharge_date),
        cell(&p.gender),
        cell(&p.condition),
        cell(&p.hospital_id),
        cell(&p.readmitted.map(u8::from)),
        cell(&p.outcome),
        cell(&row.row.department),
    ];
    record.extend(row.row.hospital_attributes.iter().map(cell));
    record.push(cell(&row.row.treatment_type));
    record.push(cell(&row.row.effectiveness_rate));
    record.extend(row.row.treatment_attributes.iter().map(cell));
    record.extend([
        cell(&row.age),
        cell(&row.age_group),
        cell(&row.admission_month),
        cell(&row.discharge_month),
        cell(&row.length_of_stay),
    ]);
    record
}

/// Exports every row of the enriched table.
pub fn export_table(path: &Path, table: &EnrichedTable, gzip: bool) -> Result<()> {
    export_rows(path, table, table.rows.iter(), gzip)
}

/// Exports a subset of rows with the full table's columns.
pub fn export_rows<'a>(
    path: &Path,
    table: &EnrichedTable,
    rows: impl IntoIterator<Item = &'a EnrichedRow>,
    gzip: bool,
) -> Result<()> {
    write_csv(path, gzip, |writer| {
        writer.write_record(table_header(table))?;
        for row in rows {
            writer.write_record(table_record(row))?;
        }
        Ok(())
    })
}

#[derive(Serialize)]
struct StayByCondition<'a> {
    #[serde(rename = "Condition")]
    condition: &'a str,
    #[serde(rename = "Length_of_Stay")]
    length_of_stay: f64,
}

#[derive(Serialize)]
struct ReadmissionByCondition<'a> {
    #[serde(rename = "Condition")]
    condition: &'a str,
    #[serde(rename = "Readmitted")]
    readmitted: f64,
}

pub fn export_avg_stay_by_condition(
    path: &Path,
    avg_stay: &BTreeMap<String, f64>,
    gzip: bool,
) -> Result<()> {
    write_csv(path, gzip, |writer| {
        writer.write_record(["Condition", "Length_of_Stay"])?;
        for (condition, days) in avg_stay {
            writer.serialize(StayByCondition {
                condition,
                length_of_stay: *days,
            })?;
        }
        Ok(())
    })
}

pub fn export_readmission_by_condition(
    path: &Path,
    readmission: &BTreeMap<String, f64>,
    gzip: bool,
) -> Result<()> {
    write_csv(path, gzip, |writer| {
        writer.write_record(["Condition", "Readmitted"])?;
        for (condition, rate) in readmission {
            writer.serialize(ReadmissionByCondition {
                condition,
                readmitted: *rate,
            })?;
        }
        Ok(())
    })
}

/// A row of the data-quality log.
#[derive(Debug, Serialize)]
struct QualityRecord<'a> {
    kind: &'static str,
    source: &'a str,
    line: u64,
    column: &'a str,
    value: String,
    message: &'a str,
}

/// Writes rejected rows and negative stays to one CSV.
pub fn export_data_quality(
    path: &Path,
    row_errors: &[RowError],
    anomalies: &[StayAnomaly],
    gzip: bool,
) -> Result<()> {
    write_csv(path, gzip, |writer| {
        writer.write_record(["kind", "source", "line", "column", "value", "message"])?;
        for error in row_errors {
            writer.serialize(QualityRecord {
                kind: "row_error",
                source: &error.source_name,
                line: error.line,
                column: &error.column,
                value: error.value.clone(),
                message: &error.message,
            })?;
        }
        for anomaly in anomalies {
            writer.serialize(QualityRecord {
                kind: "negative_stay",
                source: "patients",
                line: anomaly.line,
                column: "Length_of_Stay",
                value: anomaly.length_of_stay.to_string(),
                message: "discharge date precedes admission date",
            })?;
        }
        Ok(())
    })
}

/// Writes a value as pretty-printed JSON.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "JSON written");
    Ok(())
}

/// Logs aggregates using Rust's debug pretty-print format.
pub fn print_pretty(aggregates: &Aggregates) {
    debug!("{:#?}", aggregates);
}

/// Logs the headline metrics.
pub fn print_key_metrics(aggregates: &Aggregates, top_n: usize) {
    let rate_pct = (aggregates.readmission_rate * 100.0 * 100.0).round() / 100.0;
    info!(
        readmission_rate_pct = rate_pct,
        rows = aggregates.total_rows,
        "Readmission rate"
    );

    for (condition, days) in &aggregates.avg_stay_by_condition {
        info!(condition = %condition, avg_stay_days = days, "Average stay by condition");
    }
    for (department, days) in &aggregates.avg_stay_by_department {
        info!(department = %department, avg_stay_days = days, "Average stay by department");
    }
    for (treatment, rate) in &aggregates.effectiveness_summary {
        info!(treatment = %treatment, effectiveness = rate, "Treatment effectiveness");
    }
    for (outcome, count) in &aggregates.outcome_segment {
        info!(
            outcome = %outcome,
            patients = count,
            share_pct = pct(*count, aggregates.total_rows),
            "Outcome segment"
        );
    }
    for (rank, entry) in aggregates
        .top_readmission_conditions(top_n)
        .iter()
        .enumerate()
    {
        info!(
            rank = rank + 1,
            condition = %entry.condition,
            readmission_rate = entry.rate,
            "Top condition by readmission"
        );
    }
    for (condition, treatment) in &aggregates.interventions {
        info!(condition = %condition, treatment = %treatment, "Suggested intervention");
    }
    info!(patients = aggregates.high_risk_count, "High-risk patients");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{AgeGroup, PatientRecord, Table, UnifiedRow};
    use chrono::NaiveDate;
    use flate2::read::GzDecoder;
    use std::env;
    use std::fs;
    use std::io::Read;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn table() -> EnrichedTable {
        Table {
            hospital_columns: vec!["Name".to_string()],
            treatment_columns: Vec::new(),
            rows: vec![EnrichedRow {
                row: UnifiedRow {
                    patient: PatientRecord {
                        line: 2,
                        patient_id: Some("P1".to_string()),
                        date_of_birth: NaiveDate::from_ymd_opt(2000, 1, 1),
                        admission_date: NaiveDate::from_ymd_opt(2024, 1, 5),
                        discharge_date: NaiveDate::from_ymd_opt(2024, 1, 10),
                        gender: Some("F".to_string()),
                        condition: Some("Flu".to_string()),
                        hospital_id: Some("H1".to_string()),
                        readmitted: Some(true),
                        outcome: Some("Improved".to_string()),
                    },
                    department: Some("General".to_string()),
                    hospital_attributes: vec![Some("St. Mary, North".to_string())],
                    treatment_type: Some("Antiviral".to_string()),
                    effectiveness_rate: Some(0.8),
                    treatment_attributes: Vec::new(),
                    hospital_matched: true,
                    treatment_matched: true,
                },
                age: Some(24),
                age_group: Some(AgeGroup::YoungAdult),
                admission_month: Some(1),
                discharge_month: Some(1),
                length_of_stay: Some(5),
            }],
        }
    }

    #[test]
    fn test_table_record_aligns_with_header() {
        let table = table();
        let header = table_header(&table);
        let record = table_record(&table.rows[0]);

        assert_eq!(header.len(), record.len());
        let pos = |name: &str| header.iter().position(|h| h == name).unwrap();
        assert_eq!(record[pos("DOB")], "2000-01-01");
        assert_eq!(record[pos("Readmitted")], "1");
        assert_eq!(record[pos("Name")], "St. Mary, North");
        assert_eq!(record[pos("Age_Group")], "Young Adult");
        assert_eq!(record[pos("Length_of_Stay")], "5");
    }

    #[test]
    fn test_shared_attribute_names_are_suffixed() {
        let mut table = table();
        table.hospital_columns = vec!["Notes".to_string(), "Name".to_string()];
        table.treatment_columns = vec!["Notes".to_string()];

        let header = table_header(&table);

        assert!(header.contains(&"Notes_x".to_string()));
        assert!(header.contains(&"Notes_y".to_string()));
        assert!(header.contains(&"Name".to_string()));
        assert!(!header.contains(&"Notes".to_string()));
    }

    #[test]
    fn test_export_table_quotes_fields() {
        let path = temp_path("hospital_analytics_test_table.csv");
        let _ = fs::remove_file(&path);

        export_table(&path, &table(), false).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Patient_ID,DOB,"));
        assert!(lines[1].contains("\"St. Mary, North\""));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_export_gzip_round_trip() {
        let path = temp_path("hospital_analytics_test_stay.csv.gz");
        let _ = fs::remove_file(&path);
        let avg = BTreeMap::from([("Flu".to_string(), 5.0), ("Asthma".to_string(), 2.5)]);

        export_avg_stay_by_condition(&path, &avg, true).unwrap();

        let mut content = String::new();
        GzDecoder::new(fs::File::open(&path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "Condition,Length_of_Stay\nAsthma,2.5\nFlu,5.0\n");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_export_path_appends_gz() {
        let dir = Path::new("out");
        assert_eq!(export_path(dir, "a.csv", false), Path::new("out/a.csv"));
        assert_eq!(export_path(dir, "a.csv", true), Path::new("out/a.csv.gz"));
    }

    #[test]
    fn test_export_data_quality() {
        let path = temp_path("hospital_analytics_test_quality.csv");
        let _ = fs::remove_file(&path);

        let errors = vec![RowError::new("patients", 7, "dob", "31/02/2020", "bad date")];
        let anomalies = vec![StayAnomaly {
            line: 9,
            patient_id: Some("P9".to_string()),
            length_of_stay: -2,
        }];
        export_data_quality(&path, &errors, &anomalies, false).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "kind,source,line,column,value,message");
        assert_eq!(lines[1], "row_error,patients,7,dob,31/02/2020,bad date");
        assert!(lines[2].starts_with("negative_stay,patients,9,Length_of_Stay,-2,"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_to_missing_dir_fails_with_path() {
        let path = Path::new("/nonexistent-dir/hospital_analytics/out.csv");
        let err = export_table(path, &table(), false).unwrap_err();
        assert!(err.to_string().contains("out.csv"));
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        let aggregates = crate::analyzers::Aggregates::from_rows(&table().rows).unwrap();
        print_pretty(&aggregates);
        print_key_metrics(&aggregates, 5);
    }
}
