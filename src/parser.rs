//! CSV parsing for the patient, hospital and treatment sources.
//!
//! Cells are parsed into typed values. An empty cell is a missing value; a
//! non-empty cell that does not parse is a [`RowError`] and the row is kept
//! out of the table.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{LoadError, RowError};
use crate::records::{HospitalRecord, Loaded, PatientRecord, TreatmentRecord};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

const PATIENT_COLUMNS: &[&str] = &[
    "patient_id",
    "dob",
    "admission_date",
    "discharge_date",
    "gender",
    "condition",
    "hospital_id",
    "readmitted",
    "outcome",
];
const HOSPITAL_COLUMNS: &[&str] = &["hospital_id", "department"];
const TREATMENT_COLUMNS: &[&str] = &["condition", "treatment_type", "effectiveness_rate"];

/// Canonical form of a header: trimmed, lower-case, `_` for spaces and hyphens.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Parses a calendar date, truncating datetimes to their date.
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    let value = value.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(datetime.date());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|datetime| datetime.date_naive())
        .map_err(|_| "unrecognized date format".to_string())
}

/// Parses a binary indicator.
pub fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" => Ok(true),
        "0" | "0.0" | "false" | "no" | "n" => Ok(false),
        _ => Err("expected a 0/1 indicator".to_string()),
    }
}

/// How bare numbers in an effectiveness column are scaled.
///
/// The scale is decided once per column: a `%` cell is always a percentage,
/// and any bare value above 1 makes every bare value in the column a
/// percentage. A column that mixes `%` cells with bare values no larger than 1
/// is ambiguous, and its bare values are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScale {
    Fraction,
    Percent,
    Mixed,
}

impl RateScale {
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let (mut suffixed, mut bare_fraction, mut bare_percent) = (false, false, false);
        for value in values.into_iter().map(str::trim) {
            if value.is_empty() {
                continue;
            }
            if value.ends_with('%') {
                suffixed = true;
                continue;
            }
            match value.parse::<f64>() {
                Ok(number) if number > 1.0 => bare_percent = true,
                Ok(_) => bare_fraction = true,
                Err(_) => {}
            }
        }

        match (bare_percent, suffixed, bare_fraction) {
            (true, _, _) | (false, true, false) => RateScale::Percent,
            (false, true, true) => RateScale::Mixed,
            (false, false, _) => RateScale::Fraction,
        }
    }

    /// Parses one rate into a 0..=1 fraction.
    pub fn parse(self, value: &str) -> Result<f64, String> {
        let value = value.trim();
        let (number, suffixed) = match value.strip_suffix('%') {
            Some(number) => (number.trim(), true),
            None => (value, false),
        };
        let parsed: f64 = number
            .parse()
            .map_err(|_| "expected a number or percentage".to_string())?;
        if !parsed.is_finite() || parsed < 0.0 {
            return Err("rate must be a non-negative number".to_string());
        }

        let rate = match (suffixed, self) {
            (true, _) | (false, RateScale::Percent) => parsed / 100.0,
            (false, RateScale::Fraction) => parsed,
            (false, RateScale::Mixed) => {
                return Err("ambiguous scale: column mixes percentages and fractions".to_string());
            }
        };
        if rate > 1.0 {
            return Err("rate exceeds 100%".to_string());
        }
        Ok(rate)
    }
}

/// Scale of the effectiveness column, from a first pass over the source.
/// Unreadable input falls back to fractions; the main pass reports it.
fn rate_scale(bytes: &[u8]) -> RateScale {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(bytes);
    let Some(idx) = rdr.headers().ok().and_then(|headers| {
        headers
            .iter()
            .position(|h| normalize_header(h) == "effectiveness_rate")
    }) else {
        return RateScale::Fraction;
    };

    let values: Vec<String> = rdr
        .records()
        .filter_map(Result::ok)
        .filter_map(|record| record.get(idx).map(str::to_string))
        .collect();
    RateScale::infer(values.iter().map(String::as_str))
}

/// Header lookup for one source.
struct Columns {
    source_name: String,
    index: HashMap<String, usize>,
    headers: Vec<String>,
}

impl Columns {
    fn new(source_name: &str, headers: &StringRecord) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        let mut index = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            // First occurrence wins on duplicate headers.
            index.entry(normalize_header(header)).or_insert(i);
        }
        Self {
            source_name: source_name.to_string(),
            index,
            headers,
        }
    }

    fn require(&self, column: &'static str) -> Result<usize, LoadError> {
        self.index
            .get(column)
            .copied()
            .ok_or_else(|| LoadError::MissingColumn {
                source_name: self.source_name.clone(),
                column,
            })
    }

    /// Positions and original names of columns outside `known`.
    fn extras(&self, known: &[&str]) -> (Vec<usize>, Vec<String>) {
        self.headers
            .iter()
            .enumerate()
            .filter(|(i, header)| {
                let name = normalize_header(header);
                !known.contains(&name.as_str()) && self.index.get(&name) == Some(i)
            })
            .map(|(i, header)| (i, header.clone()))
            .unzip()
    }
}

/// Typed access to the cells of one record, collecting parse failures.
struct Cells<'a> {
    source_name: &'a str,
    line: u64,
    record: &'a StringRecord,
    errors: Vec<RowError>,
}

impl<'a> Cells<'a> {
    fn text(&self, idx: usize) -> Option<String> {
        self.record
            .get(idx)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn parse<T>(
        &mut self,
        idx: usize,
        column: &str,
        parser: impl Fn(&str) -> Result<T, String>,
    ) -> Option<T> {
        let value = self.text(idx)?;
        match parser(&value) {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                self.errors.push(RowError::new(
                    self.source_name,
                    self.line,
                    column,
                    &value,
                    message,
                ));
                None
            }
        }
    }
}

/// Walks every record of a source, handing well-formed ones to `build`.
fn read_rows<T>(
    source_name: &str,
    bytes: &[u8],
    known: &[&'static str],
    mut build: impl FnMut(&Columns, &mut Cells, &[usize]) -> Result<T, LoadError>,
) -> Result<Loaded<T>, LoadError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = rdr.headers().map_err(|error| LoadError::Csv {
        source_name: source_name.to_string(),
        error,
    })?;
    let columns = Columns::new(source_name, headers);
    for column in known {
        columns.require(column)?;
    }
    let (extra_positions, extra_columns) = columns.extras(known);

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for result in rdr.records() {
        let record = match result {
            Ok(record) => record,
            Err(error) if error.is_io_error() => {
                return Err(LoadError::Csv {
                    source_name: source_name.to_string(),
                    error,
                });
            }
            Err(error) => {
                let line = error.position().map_or(0, |p| p.line());
                errors.push(RowError::new(source_name, line, "*", "", error.to_string()));
                continue;
            }
        };

        let line = record.position().map_or(0, |p| p.line());
        let mut cells = Cells {
            source_name,
            line,
            record: &record,
            errors: Vec::new(),
        };
        let row = build(&columns, &mut cells, &extra_positions)?;

        if cells.errors.is_empty() {
            rows.push(row);
        } else {
            errors.append(&mut cells.errors);
        }
    }

    debug!(
        source = source_name,
        rows = rows.len(),
        rejected = errors.len(),
        "Source parsed"
    );

    Ok(Loaded {
        source_name: source_name.to_string(),
        extra_columns,
        rows,
        errors,
    })
}

pub fn parse_patients(source_name: &str, bytes: &[u8]) -> Result<Loaded<PatientRecord>, LoadError> {
    read_rows(source_name, bytes, PATIENT_COLUMNS, |columns, cells, _| {
        Ok(PatientRecord {
            line: cells.line,
            patient_id: cells.text(columns.require("patient_id")?),
            date_of_birth: cells.parse(columns.require("dob")?, "dob", parse_date),
            admission_date: cells.parse(
                columns.require("admission_date")?,
                "admission_date",
                parse_date,
            ),
            discharge_date: cells.parse(
                columns.require("discharge_date")?,
                "discharge_date",
                parse_date,
            ),
            gender: cells.text(columns.require("gender")?),
            condition: cells.text(columns.require("condition")?),
            hospital_id: cells.text(columns.require("hospital_id")?),
            readmitted: cells.parse(columns.require("readmitted")?, "readmitted", parse_flag),
            outcome: cells.text(columns.require("outcome")?),
        })
    })
}

pub fn parse_hospitals(
    source_name: &str,
    bytes: &[u8],
) -> Result<Loaded<HospitalRecord>, LoadError> {
    read_rows(source_name, bytes, HOSPITAL_COLUMNS, |columns, cells, extras| {
        Ok(HospitalRecord {
            hospital_id: cells.text(columns.require("hospital_id")?),
            department: cells.text(columns.require("department")?),
            attributes: extras.iter().map(|&i| cells.text(i)).collect(),
        })
    })
}

pub fn parse_treatments(
    source_name: &str,
    bytes: &[u8],
) -> Result<Loaded<TreatmentRecord>, LoadError> {
    let scale = rate_scale(bytes);
    if scale == RateScale::Mixed {
        warn!(
            source = source_name,
            "Effectiveness column mixes percentages and fractions; bare values are rejected"
        );
    }

    read_rows(source_name, bytes, TREATMENT_COLUMNS, |columns, cells, extras| {
        Ok(TreatmentRecord {
            condition: cells.text(columns.require("condition")?),
            treatment_type: cells.text(columns.require("treatment_type")?),
            effectiveness_rate: cells.parse(
                columns.require("effectiveness_rate")?,
                "effectiveness_rate",
                |value| scale.parse(value),
            ),
            attributes: extras.iter().map(|&i| cells.text(i)).collect(),
        })
    })
}
