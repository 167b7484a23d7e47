//! Derived columns: age, age group, admission/discharge month, length of stay.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::warn;

use crate::records::{AgeGroup, EnrichedRow, EnrichedTable, UnifiedRow, UnifiedTable};

/// Date ages are computed against unless configured otherwise.
pub fn default_reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("2024-01-01 is a valid date")
}

/// A row whose discharge precedes its admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StayAnomaly {
    pub line: u64,
    pub patient_id: Option<String>,
    pub length_of_stay: i64,
}

/// Whole years between birth and `reference`, as `floor(days / 365)`.
pub fn age_in_years(date_of_birth: NaiveDate, reference: NaiveDate) -> i64 {
    (reference - date_of_birth).num_days().div_euclid(365)
}

/// Days between admission and discharge. Negative when the dates are inverted.
pub fn length_of_stay(admission: NaiveDate, discharge: NaiveDate) -> i64 {
    (discharge - admission).num_days()
}

pub fn enrich_row(row: UnifiedRow, reference: NaiveDate) -> EnrichedRow {
    let patient = &row.patient;
    let age = patient
        .date_of_birth
        .map(|dob| age_in_years(dob, reference));
    let stay = match (patient.admission_date, patient.discharge_date) {
        (Some(admission), Some(discharge)) => Some(length_of_stay(admission, discharge)),
        _ => None,
    };

    EnrichedRow {
        age,
        age_group: age.and_then(AgeGroup::from_age),
        admission_month: patient.admission_date.map(|d| d.month()),
        discharge_month: patient.discharge_date.map(|d| d.month()),
        length_of_stay: stay,
        row,
    }
}

/// Enriches every row and flags negative stays.
#[tracing::instrument(skip(table), fields(rows = table.len()))]
pub fn enrich(table: UnifiedTable, reference: NaiveDate) -> (EnrichedTable, Vec<StayAnomaly>) {
    let table = table.map_rows(|row| enrich_row(row, reference));

    let anomalies: Vec<StayAnomaly> = table
        .rows
        .iter()
        .filter_map(|r| {
            let days = r.length_of_stay.filter(|days| *days < 0)?;
            Some(StayAnomaly {
                line: r.row.patient.line,
                patient_id: r.row.patient.patient_id.clone(),
                length_of_stay: days,
            })
        })
        .collect();

    for anomaly in &anomalies {
        warn!(
            line = anomaly.line,
            patient_id = anomaly.patient_id.as_deref().unwrap_or(""),
            length_of_stay = anomaly.length_of_stay,
            "Discharge precedes admission; stay excluded from aggregates"
        );
    }

    (table, anomalies)
}
