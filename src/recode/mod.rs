//! Column recoding: lookup and substitution mappings, column copies and
//! numeric conversion.

pub mod mapping;

pub use mapping::{apply_steps, copy, lookup, replace, to_numeric, RecodeStep};
