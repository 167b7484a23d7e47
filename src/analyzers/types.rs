//! Data types produced by the aggregation stage.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::records::AgeGroup;

/// Box-plot statistics for one group of stays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxStats {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    /// Most extreme values within 1.5 IQR of the quartiles.
    pub lower_whisker: f64,
    pub upper_whisker: f64,
    pub outliers: Vec<f64>,
}

/// A condition and its readmission rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionRate {
    pub condition: String,
    pub rate: f64,
}

/// Every named summary computed from the enriched table.
///
/// Groups with no rows are absent from the maps rather than zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregates {
    pub total_rows: usize,
    /// Patients per admission month (1-12).
    pub admission_trend: BTreeMap<u32, usize>,
    pub discharge_trend: BTreeMap<u32, usize>,
    pub avg_stay_by_condition: BTreeMap<String, f64>,
    pub avg_stay_by_department: BTreeMap<String, f64>,
    pub stay_stddev_by_condition: BTreeMap<String, f64>,
    pub stay_distribution_by_condition: BTreeMap<String, BoxStats>,
    pub readmission_rate: f64,
    pub readmission_by_condition: BTreeMap<String, f64>,
    pub outcome_segment: BTreeMap<String, usize>,
    pub effectiveness_summary: BTreeMap<String, f64>,
    pub gender_distribution: BTreeMap<String, usize>,
    pub age_group_distribution: BTreeMap<AgeGroup, usize>,
    /// Most frequent treatment among readmitted patients, per condition.
    pub interventions: BTreeMap<String, String>,
    pub high_risk_count: usize,
}
