//! Row types flowing through the pipeline.
//!
//! Every field that can be absent in the source data is an `Option`, so a
//! missing cell survives until the cleaner decides what to do with it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RowError;

/// Outcome label that marks a patient as high risk.
pub const DETERIORATED: &str = "Deteriorated";

/// Output of a loader: parsed rows plus the rows that could not be parsed.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub source_name: String,
    /// Non-key columns carried through as-is, in source order.
    pub extra_columns: Vec<String>,
    pub rows: Vec<T>,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientRecord {
    /// 1-based line in the patient source.
    pub line: u64,
    pub patient_id: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub admission_date: Option<NaiveDate>,
    pub discharge_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub condition: Option<String>,
    pub hospital_id: Option<String>,
    pub readmitted: Option<bool>,
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HospitalRecord {
    pub hospital_id: Option<String>,
    pub department: Option<String>,
    pub attributes: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreatmentRecord {
    pub condition: Option<String>,
    pub treatment_type: Option<String>,
    /// Fraction in 0..=1.
    pub effectiveness_rate: Option<f64>,
    pub attributes: Vec<Option<String>>,
}

/// A patient row widened with its hospital and treatment columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnifiedRow {
    pub patient: PatientRecord,
    pub department: Option<String>,
    pub hospital_attributes: Vec<Option<String>>,
    pub treatment_type: Option<String>,
    pub effectiveness_rate: Option<f64>,
    pub treatment_attributes: Vec<Option<String>>,
    /// False when no hospital row matched; the hospital cells are join gaps.
    pub hospital_matched: bool,
    /// False when no treatment row matched; the treatment cells are join gaps.
    pub treatment_matched: bool,
}

/// A unified row with its derived columns.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    pub row: UnifiedRow,
    pub age: Option<i64>,
    pub age_group: Option<AgeGroup>,
    pub admission_month: Option<u32>,
    pub discharge_month: Option<u32>,
    pub length_of_stay: Option<i64>,
}

impl EnrichedRow {
    /// Length of stay if it is usable for aggregation. Negative stays are
    /// data errors and are reported separately.
    pub fn valid_stay(&self) -> Option<i64> {
        self.length_of_stay.filter(|days| *days >= 0)
    }

    pub fn is_high_risk(&self) -> bool {
        self.row.patient.outcome.as_deref() == Some(DETERIORATED)
    }
}

/// A table with its dynamic column layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table<R> {
    pub hospital_columns: Vec<String>,
    pub treatment_columns: Vec<String>,
    pub rows: Vec<R>,
}

pub type UnifiedTable = Table<UnifiedRow>;
pub type EnrichedTable = Table<EnrichedRow>;

impl<R> Table<R> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Builds a new table with the same layout from transformed rows.
    pub fn map_rows<S>(self, f: impl FnMut(R) -> S) -> Table<S> {
        Table {
            hospital_columns: self.hospital_columns,
            treatment_columns: self.treatment_columns,
            rows: self.rows.into_iter().map(f).collect(),
        }
    }
}

/// Fixed age brackets over half-open intervals `(lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    Child,
    #[serde(rename = "Young Adult")]
    YoungAdult,
    Adult,
    #[serde(rename = "Middle Aged")]
    MiddleAged,
    Senior,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 5] = [
        AgeGroup::Child,
        AgeGroup::YoungAdult,
        AgeGroup::Adult,
        AgeGroup::MiddleAged,
        AgeGroup::Senior,
    ];

    /// Assigns an age in whole years to its bracket. Ages outside `(0, 100]`
    /// are unclassified.
    ///
    /// | Age       | Group       |
    /// |-----------|-------------|
    /// | (0, 18]   | Child       |
    /// | (18, 35]  | Young Adult |
    /// | (35, 50]  | Adult       |
    /// | (50, 65]  | Middle Aged |
    /// | (65, 100] | Senior      |
    pub fn from_age(age: i64) -> Option<Self> {
        match age {
            1..=18 => Some(AgeGroup::Child),
            19..=35 => Some(AgeGroup::YoungAdult),
            36..=50 => Some(AgeGroup::Adult),
            51..=65 => Some(AgeGroup::MiddleAged),
            66..=100 => Some(AgeGroup::Senior),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgeGroup::Child => "Child",
            AgeGroup::YoungAdult => "Young Adult",
            AgeGroup::Adult => "Adult",
            AgeGroup::MiddleAged => "Middle Aged",
            AgeGroup::Senior => "Senior",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgeGroup::ALL
            .into_iter()
            .find(|group| group.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown age group {s:?}"))
    }
}
