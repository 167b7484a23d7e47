//! Error types shared by the loading and analysis stages.

use serde::Serialize;

/// Failure that makes a whole source unusable.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{source_name}: missing required column `{column}`")]
    MissingColumn {
        source_name: String,
        column: &'static str,
    },
    #[error("{source_name}: malformed CSV: {error}")]
    Csv {
        source_name: String,
        #[source]
        error: csv::Error,
    },
}

/// A single malformed row, reported instead of being coerced to a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{source_name} line {line}: column `{column}` value {value:?}: {message}")]
pub struct RowError {
    pub source_name: String,
    /// 1-based line in the source file, header included.
    pub line: u64,
    pub column: String,
    pub value: String,
    pub message: String,
}

impl RowError {
    pub fn new(
        source_name: &str,
        line: u64,
        column: &str,
        value: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.to_string(),
            line,
            column: column.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// Aggregations that are undefined for the given table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("readmission rate is undefined: no rows with a readmitted value")]
    EmptyTable,
}
