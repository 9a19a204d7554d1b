//! Data structures for trial-level analysis.

mod aggregated;
mod design_matrix;
mod formula;
mod random_effects;
mod trials;

pub use aggregated::{AggregatedRow, AggregatedTable};
pub use design_matrix::{Coding, DesignMatrix, FactorSpec};
pub use formula::{Formula, Term};
pub use random_effects::{GroupingFactor, MixedFormula, RandomEffect};
pub use trials::{compare_keys, ColumnKind, ColumnSpec, TrialTable, Value};
