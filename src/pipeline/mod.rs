//! Table transformations between loading and aggregation.
//!
//! Each stage takes the previous stage's table by value and returns a new
//! one: merge, then clean, then enrich.

pub mod clean;
pub mod enrich;
pub mod merge;
