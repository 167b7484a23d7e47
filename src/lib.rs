pub mod analyzers;
pub mod charts;
pub mod error;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod records;
pub mod report;
