//! Missing-value handling for the merged table.
//!
//! Two kinds of gaps exist. Join gaps are hospital or treatment cells left
//! empty because the join found no match. Recorded gaps are cells that were
//! empty in the source files. Each kind has its own entry point. Both
//! currently resolve by forward-filling the previous non-missing value of
//! the same column, so running both is the same as one column-wise forward
//! fill over the whole table. Gaps in the first rows of a column stay empty.

use serde::Serialize;
use tracing::info;

use crate::records::{UnifiedRow, UnifiedTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    Join,
    Recorded,
}

/// Cell counts touched by [`clean`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FillReport {
    pub join_gap_fills: usize,
    pub recorded_gap_fills: usize,
    pub still_missing: usize,
}

/// Which joined table a column came from.
#[derive(Debug, Clone, Copy)]
enum Side {
    Patient,
    Hospital,
    Treatment,
}

fn gap_kind(row: &UnifiedRow, side: Side) -> GapKind {
    let matched = match side {
        Side::Patient => true,
        Side::Hospital => row.hospital_matched,
        Side::Treatment => row.treatment_matched,
    };
    if matched {
        GapKind::Recorded
    } else {
        GapKind::Join
    }
}

/// Fills eligible empty cells of one column with the last value seen above them.
fn forward_fill<T: Clone>(
    rows: &mut [UnifiedRow],
    cell: impl Fn(&mut UnifiedRow) -> &mut Option<T>,
    eligible: impl Fn(&UnifiedRow) -> bool,
) -> usize {
    let mut last: Option<T> = None;
    let mut filled = 0;

    for row in rows.iter_mut() {
        let fill_here = eligible(row);
        let value = cell(row);
        if let Some(v) = value.as_ref() {
            last = Some(v.clone());
        } else if fill_here {
            if let Some(prev) = &last {
                *value = Some(prev.clone());
                filled += 1;
            }
        }
    }

    filled
}

fn fill_gaps(mut table: UnifiedTable, kind: GapKind) -> (UnifiedTable, usize) {
    let mut filled = 0;

    macro_rules! fill {
        ($side:expr, $($field:tt)+) => {
            filled += forward_fill(
                &mut table.rows,
                |r| &mut r.$($field)+,
                |r| gap_kind(r, $side) == kind,
            );
        };
    }

    fill!(Side::Patient, patient.patient_id);
    fill!(Side::Patient, patient.date_of_birth);
    fill!(Side::Patient, patient.admission_date);
    fill!(Side::Patient, patient.discharge_date);
    fill!(Side::Patient, patient.gender);
    fill!(Side::Patient, patient.condition);
    fill!(Side::Patient, patient.hospital_id);
    fill!(Side::Patient, patient.readmitted);
    fill!(Side::Patient, patient.outcome);
    fill!(Side::Hospital, department);
    fill!(Side::Treatment, treatment_type);
    fill!(Side::Treatment, effectiveness_rate);

    for i in 0..table.hospital_columns.len() {
        filled += forward_fill(
            &mut table.rows,
            |r| &mut r.hospital_attributes[i],
            |r| gap_kind(r, Side::Hospital) == kind,
        );
    }
    for i in 0..table.treatment_columns.len() {
        filled += forward_fill(
            &mut table.rows,
            |r| &mut r.treatment_attributes[i],
            |r| gap_kind(r, Side::Treatment) == kind,
        );
    }

    (table, filled)
}

/// Fills cells left empty by an unmatched hospital or treatment join.
pub fn fill_join_gaps(table: UnifiedTable) -> (UnifiedTable, usize) {
    fill_gaps(table, GapKind::Join)
}

/// Fills cells that were empty in the source data.
pub fn fill_recorded_gaps(table: UnifiedTable) -> (UnifiedTable, usize) {
    fill_gaps(table, GapKind::Recorded)
}

fn missing_cells(row: &UnifiedRow) -> usize {
    let p = &row.patient;
    let fixed = [
        p.patient_id.is_none(),
        p.date_of_birth.is_none(),
        p.admission_date.is_none(),
        p.discharge_date.is_none(),
        p.gender.is_none(),
        p.condition.is_none(),
        p.hospital_id.is_none(),
        p.readmitted.is_none(),
        p.outcome.is_none(),
        row.department.is_none(),
        row.treatment_type.is_none(),
        row.effectiveness_rate.is_none(),
    ];
    let dynamic = row
        .hospital_attributes
        .iter()
        .chain(&row.treatment_attributes)
        .filter(|cell| cell.is_none())
        .count();

    fixed.iter().filter(|missing| **missing).count() + dynamic
}

/// Resolves join gaps, then recorded gaps.
#[tracing::instrument(skip_all, fields(rows = table.len()))]
pub fn clean(table: UnifiedTable) -> (UnifiedTable, FillReport) {
    let (table, join_gap_fills) = fill_join_gaps(table);
    let (table, recorded_gap_fills) = fill_recorded_gaps(table);
    let still_missing = table.rows.iter().map(missing_cells).sum();

    let report = FillReport {
        join_gap_fills,
        recorded_gap_fills,
        still_missing,
    };
    info!(
        join_gap_fills,
        recorded_gap_fills, still_missing, "Forward fill complete"
    );

    (table, report)
}
