//! Left joins of patients onto hospitals and treatments.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::records::{
    HospitalRecord, Loaded, PatientRecord, Table, TreatmentRecord, UnifiedRow, UnifiedTable,
};

/// How a condition with several treatment rows is joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TreatmentJoin {
    /// One output row per matching treatment (relational left join).
    #[default]
    FanOut,
    /// Only the first matching treatment in source order.
    FirstMatch,
}

/// Join coverage of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub patient_rows: usize,
    pub merged_rows: usize,
    /// Patients with no hospital match.
    pub unmatched_hospital: usize,
    /// Patients with no treatment match.
    pub unmatched_treatment: usize,
    /// Patients that produced more than one merged row.
    pub fanned_out_patients: usize,
}

/// Groups right-table rows by key, keeping source order within a key.
/// Rows without a key are never joined.
fn index_by<'a, T>(
    rows: &'a [T],
    key: impl Fn(&T) -> Option<&str>,
) -> HashMap<&'a str, Vec<&'a T>> {
    let mut index: HashMap<&str, Vec<&T>> = HashMap::new();
    for row in rows {
        if let Some(k) = key(row) {
            index.entry(k).or_default().push(row);
        }
    }
    index
}

/// Left-joins patients to hospitals on hospital id, then the result to
/// treatments on condition.
#[tracing::instrument(skip_all, fields(policy = ?policy))]
pub fn merge(
    patients: &[PatientRecord],
    hospitals: &Loaded<HospitalRecord>,
    treatments: &Loaded<TreatmentRecord>,
    policy: TreatmentJoin,
) -> (UnifiedTable, MergeReport) {
    let hospital_index = index_by(&hospitals.rows, |h| h.hospital_id.as_deref());
    let treatment_index = index_by(&treatments.rows, |t| t.condition.as_deref());

    let mut report = MergeReport {
        patient_rows: patients.len(),
        ..Default::default()
    };
    let mut rows = Vec::with_capacity(patients.len());

    for patient in patients {
        let hospital_matches = patient
            .hospital_id
            .as_deref()
            .and_then(|id| hospital_index.get(id))
            .map(Vec::as_slice)
            .unwrap_or_default();
        if hospital_matches.is_empty() {
            report.unmatched_hospital += 1;
        }

        // A hospital id is expected to be unique; a duplicate fans out like any left join.
        let hospital_rows: Vec<Option<&HospitalRecord>> = if hospital_matches.is_empty() {
            vec![None]
        } else {
            hospital_matches.iter().copied().map(Some).collect()
        };

        let treatment_matches = patient
            .condition
            .as_deref()
            .and_then(|condition| treatment_index.get(condition))
            .map(Vec::as_slice)
            .unwrap_or_default();
        if treatment_matches.is_empty() {
            report.unmatched_treatment += 1;
        }
        let treatment_rows: Vec<Option<&TreatmentRecord>> = match treatment_matches {
            [] => vec![None],
            [first, ..] if policy == TreatmentJoin::FirstMatch => vec![Some(*first)],
            all => all.iter().copied().map(Some).collect(),
        };

        let produced = hospital_rows.len() * treatment_rows.len();
        if produced > 1 {
            report.fanned_out_patients += 1;
        }

        for hospital in &hospital_rows {
            for treatment in &treatment_rows {
                rows.push(unify(
                    patient,
                    *hospital,
                    *treatment,
                    hospitals.extra_columns.len(),
                    treatments.extra_columns.len(),
                ));
            }
        }
    }

    report.merged_rows = rows.len();

    if report.merged_rows > report.patient_rows {
        warn!(
            patient_rows = report.patient_rows,
            merged_rows = report.merged_rows,
            fanned_out_patients = report.fanned_out_patients,
            "Join fanned out patient rows; counts and rates are computed over merged rows"
        );
    }
    info!(
        merged_rows = report.merged_rows,
        unmatched_hospital = report.unmatched_hospital,
        unmatched_treatment = report.unmatched_treatment,
        "Merge complete"
    );

    let table = Table {
        hospital_columns: hospitals.extra_columns.clone(),
        treatment_columns: treatments.extra_columns.clone(),
        rows,
    };
    (table, report)
}

fn unify(
    patient: &PatientRecord,
    hospital: Option<&HospitalRecord>,
    treatment: Option<&TreatmentRecord>,
    hospital_width: usize,
    treatment_width: usize,
) -> UnifiedRow {
    UnifiedRow {
        patient: patient.clone(),
        department: hospital.and_then(|h| h.department.clone()),
        hospital_attributes: hospital
            .map(|h| h.attributes.clone())
            .unwrap_or_else(|| vec![None; hospital_width]),
        treatment_type: treatment.and_then(|t| t.treatment_type.clone()),
        effectiveness_rate: treatment.and_then(|t| t.effectiveness_rate),
        treatment_attributes: treatment
            .map(|t| t.attributes.clone())
            .unwrap_or_else(|| vec![None; treatment_width]),
        hospital_matched: hospital.is_some(),
        treatment_matched: treatment.is_some(),
    }
}
