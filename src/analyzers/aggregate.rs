use std::collections::BTreeMap;
use tracing::info;

use crate::analyzers::types::{Aggregates, BoxStats, ConditionRate};
use crate::analyzers::utility::{mean, quantile, stddev};
use crate::error::AnalysisError;
use crate::records::{AgeGroup, EnrichedRow};

/// Counts rows per key. Rows without a key are skipped.
pub fn count_by<K: Ord>(
    rows: &[EnrichedRow],
    key: impl Fn(&EnrichedRow) -> Option<K>,
) -> BTreeMap<K, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        if let Some(k) = key(row) {
            *counts.entry(k).or_insert(0) += 1;
        }
    }
    counts
}

/// Collects the values of each group. Rows missing the key or the value are skipped,
/// so a group only exists when it has at least one value.
fn group_values<K: Ord>(
    rows: &[EnrichedRow],
    key: impl Fn(&EnrichedRow) -> Option<K>,
    value: impl Fn(&EnrichedRow) -> Option<f64>,
) -> BTreeMap<K, Vec<f64>> {
    let mut groups: BTreeMap<K, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let (Some(k), Some(v)) = (key(row), value(row)) {
            groups.entry(k).or_default().push(v);
        }
    }
    groups
}

/// Mean of `value` per key.
pub fn mean_by<K: Ord>(
    rows: &[EnrichedRow],
    key: impl Fn(&EnrichedRow) -> Option<K>,
    value: impl Fn(&EnrichedRow) -> Option<f64>,
) -> BTreeMap<K, f64> {
    group_values(rows, key, value)
        .into_iter()
        .filter_map(|(k, values)| Some((k, mean(&values)?)))
        .collect()
}

fn condition(row: &EnrichedRow) -> Option<String> {
    row.row.patient.condition.clone()
}

fn department(row: &EnrichedRow) -> Option<String> {
    row.row.department.clone()
}

fn stay(row: &EnrichedRow) -> Option<f64> {
    row.valid_stay().map(|days| days as f64)
}

fn readmitted(row: &EnrichedRow) -> Option<f64> {
    row.row
        .patient
        .readmitted
        .map(|flag| if flag { 1.0 } else { 0.0 })
}

pub fn admission_trend(rows: &[EnrichedRow]) -> BTreeMap<u32, usize> {
    count_by(rows, |r| r.admission_month)
}

pub fn discharge_trend(rows: &[EnrichedRow]) -> BTreeMap<u32, usize> {
    count_by(rows, |r| r.discharge_month)
}

pub fn avg_stay_by_condition(rows: &[EnrichedRow]) -> BTreeMap<String, f64> {
    mean_by(rows, condition, stay)
}

pub fn avg_stay_by_department(rows: &[EnrichedRow]) -> BTreeMap<String, f64> {
    mean_by(rows, department, stay)
}

pub fn stay_stddev_by_condition(rows: &[EnrichedRow]) -> BTreeMap<String, f64> {
    group_values(rows, condition, stay)
        .into_iter()
        .filter_map(|(k, values)| {
            let avg = mean(&values)?;
            Some((k, stddev(&values, avg)))
        })
        .collect()
}

/// Fraction of rows flagged as readmitted. Rows without a flag are ignored.
pub fn readmission_rate(rows: &[EnrichedRow]) -> Result<f64, AnalysisError> {
    let flags: Vec<f64> = rows.iter().filter_map(readmitted).collect();
    mean(&flags).ok_or(AnalysisError::EmptyTable)
}

pub fn readmission_by_condition(rows: &[EnrichedRow]) -> BTreeMap<String, f64> {
    mean_by(rows, condition, readmitted)
}

pub fn outcome_segment(rows: &[EnrichedRow]) -> BTreeMap<String, usize> {
    count_by(rows, |r| r.row.patient.outcome.clone())
}

pub fn effectiveness_summary(rows: &[EnrichedRow]) -> BTreeMap<String, f64> {
    mean_by(
        rows,
        |r| r.row.treatment_type.clone(),
        |r| r.row.effectiveness_rate,
    )
}

pub fn gender_distribution(rows: &[EnrichedRow]) -> BTreeMap<String, usize> {
    count_by(rows, |r| r.row.patient.gender.clone())
}

pub fn age_group_distribution(rows: &[EnrichedRow]) -> BTreeMap<AgeGroup, usize> {
    count_by(rows, |r| r.age_group)
}

/// Rows whose outcome is "Deteriorated", in table order.
pub fn high_risk_patients(rows: &[EnrichedRow]) -> Vec<&EnrichedRow> {
    rows.iter().filter(|r| r.is_high_risk()).collect()
}

/// Most frequent treatment type per condition among readmitted rows.
///
/// On a tie, the treatment type seen first in table order wins.
pub fn interventions(rows: &[EnrichedRow]) -> BTreeMap<String, String> {
    // Per condition: (treatment type, count) in first-seen order.
    let mut tallies: BTreeMap<&str, Vec<(&str, usize)>> = BTreeMap::new();

    for row in rows {
        let patient = &row.row.patient;
        if patient.readmitted != Some(true) {
            continue;
        }
        let (Some(condition), Some(treatment)) =
            (patient.condition.as_deref(), row.row.treatment_type.as_deref())
        else {
            continue;
        };

        let tally = tallies.entry(condition).or_default();
        match tally.iter_mut().find(|(kind, _)| *kind == treatment) {
            Some((_, count)) => *count += 1,
            None => tally.push((treatment, 1)),
        }
    }

    tallies
        .into_iter()
        .filter_map(|(condition, tally)| {
            let mut best: Option<(&str, usize)> = None;
            for (kind, count) in tally {
                if best.is_none_or(|(_, top)| count > top) {
                    best = Some((kind, count));
                }
            }
            best.map(|(kind, _)| (condition.to_string(), kind.to_string()))
        })
        .collect()
}

/// The `n` conditions with the highest readmission rate. Equal rates are
/// ordered by condition name.
pub fn top_readmission_conditions(
    readmission_by_condition: &BTreeMap<String, f64>,
    n: usize,
) -> Vec<ConditionRate> {
    let mut ranked: Vec<ConditionRate> = readmission_by_condition
        .iter()
        .map(|(condition, rate)| ConditionRate {
            condition: condition.clone(),
            rate: *rate,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.rate
            .total_cmp(&a.rate)
            .then_with(|| a.condition.cmp(&b.condition))
    });
    ranked.truncate(n);
    ranked
}

/// Five-number summary with 1.5 IQR whiskers.
pub fn box_stats(values: &[f64]) -> Option<BoxStats> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q1 = quantile(&sorted, 0.25)?;
    let median = quantile(&sorted, 0.5)?;
    let q3 = quantile(&sorted, 0.75)?;
    let iqr = q3 - q1;
    let (low_fence, high_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    let inside = sorted
        .iter()
        .copied()
        .filter(|v| (low_fence..=high_fence).contains(v));
    let lower_whisker = inside.clone().fold(f64::INFINITY, f64::min);
    let upper_whisker = inside.fold(f64::NEG_INFINITY, f64::max);

    Some(BoxStats {
        count: sorted.len(),
        min: sorted[0],
        q1,
        median,
        q3,
        max: sorted[sorted.len() - 1],
        lower_whisker,
        upper_whisker,
        outliers: sorted
            .iter()
            .copied()
            .filter(|v| !(low_fence..=high_fence).contains(v))
            .collect(),
    })
}

pub fn stay_distribution_by_condition(rows: &[EnrichedRow]) -> BTreeMap<String, BoxStats> {
    group_values(rows, condition, stay)
        .into_iter()
        .filter_map(|(k, values)| Some((k, box_stats(&values)?)))
        .collect()
}

impl Aggregates {
    /// Computes every summary over the enriched rows.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::EmptyTable`] when no row carries a readmitted flag.
    #[tracing::instrument(skip_all, fields(rows = rows.len()))]
    pub fn from_rows(rows: &[EnrichedRow]) -> Result<Self, AnalysisError> {
        let aggregates = Aggregates {
            total_rows: rows.len(),
            admission_trend: admission_trend(rows),
            discharge_trend: discharge_trend(rows),
            avg_stay_by_condition: avg_stay_by_condition(rows),
            avg_stay_by_department: avg_stay_by_department(rows),
            stay_stddev_by_condition: stay_stddev_by_condition(rows),
            stay_distribution_by_condition: stay_distribution_by_condition(rows),
            readmission_rate: readmission_rate(rows)?,
            readmission_by_condition: readmission_by_condition(rows),
            outcome_segment: outcome_segment(rows),
            effectiveness_summary: effectiveness_summary(rows),
            gender_distribution: gender_distribution(rows),
            age_group_distribution: age_group_distribution(rows),
            interventions: interventions(rows),
            high_risk_count: high_risk_patients(rows).len(),
        };

        info!(
            total_rows = aggregates.total_rows,
            conditions = aggregates.avg_stay_by_condition.len(),
            departments = aggregates.avg_stay_by_department.len(),
            high_risk = aggregates.high_risk_count,
            "Aggregation complete"
        );
        Ok(aggregates)
    }

    pub fn top_readmission_conditions(&self, n: usize) -> Vec<ConditionRate> {
        top_readmission_conditions(&self.readmission_by_condition, n)
    }
}
