//! Awareness × Attention Analysis Library
//!
//! Mixed-effects analysis of a psychophysics experiment crossing visual
//! awareness, spatial attention, stimulation region and attentional task.
//!
//! # Overview
//!
//! The library is organized into pipeline stages:
//!
//! - **data**: Trial tables, aggregated tables, formulas and design matrices
//! - **recode**: Lookup and substitution mappings, column copies
//! - **filter**: Missing-value and equality filters
//! - **aggregate**: Group-wise means for plotting
//! - **model**: Generalized linear mixed models with a random intercept
//! - **test**: Omnibus Wald tests and post-hoc pairwise contrasts
//! - **correct**: Multiple testing correction (Bonferroni, Holm, BH)
//! - **plot**: Box, strip and point figures with significance brackets
//! - **pipeline**: YAML-configured runs, presets and reports
//!
//! # Example
//!
//! ```no_run
//! use awareness_analysis::prelude::*;
//!
//! let config = preset("rt").unwrap();
//! let options = RunOptions {
//!     input: Some("rt_filtered.csv".into()),
//!     ..Default::default()
//! };
//! let report = run(&config, &options).unwrap();
//! println!("{}", report);
//! ```

pub mod aggregate;
pub mod correct;
pub mod data;
pub mod error;
pub mod filter;
pub mod model;
pub mod pipeline;
pub mod plot;
pub mod recode;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::aggregate::aggregate_mean;
    pub use crate::correct::{correct_bh, correct_bonferroni, correct_holm, PAdjust};
    pub use crate::data::{
        AggregatedRow, AggregatedTable, Coding, ColumnKind, ColumnSpec, DesignMatrix, FactorSpec,
        Formula, MixedFormula, TrialTable, Value,
    };
    pub use crate::error::{AnalysisError, Result};
    pub use crate::filter::{apply_filters, drop_missing, keep_equal, Condition, FilterConfig};
    pub use crate::model::{fit_glmm, Family, GlmmFit, GlmmSpec, Link};
    pub use crate::pipeline::{preset, run, AnalysisConfig, ModelStep, Report, RunOptions};
    pub use crate::plot::{
        draw_figure, significance_label, Annotation, Estimator, FigureSpec, Palette,
    };
    pub use crate::recode::{apply_steps, RecodeStep};
    pub use crate::test::{anova, post_hoc, AnovaTable, PostHoc, PostHocSpec};
}
