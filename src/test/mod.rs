//! Hypothesis tests on fitted mixed models.

pub mod posthoc;

pub use anova::{anova, AnovaRow, AnovaTable, TestStatistic};
pub use posthoc::{post_hoc, Contrast, MarginalMean, PostHoc, PostHocSpec};
