//! Mixed-effects models for trial-level outcomes.

pub mod family;
pub mod glmm;
pub mod lmm;

pub use family::{Family, Link};
pub use glmm::{fit_glmm, CoefficientTest, GlmmFit, GlmmSpec};
pub use lmm::{fit_weighted_lmm, Dispersion, LmmConfig, LmmSolution};
