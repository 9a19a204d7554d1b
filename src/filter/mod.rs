//! Row filters for trial tables.

pub mod rows;

pub use rows::{apply_filters, drop_missing, keep_equal, Condition, FilterConfig, FilterSummary};
