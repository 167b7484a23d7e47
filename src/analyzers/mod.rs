//! Grouped summaries over the enriched patient table.
//!
//! Every summary is a pure function of the rows. Groups with no rows are
//! absent from the result maps, so no mean is ever taken over an empty group.

pub mod aggregate;
pub mod types;
pub mod utility;

pub use aggregate::high_risk_patients;
pub use types::{Aggregates, BoxStats, ConditionRate};
