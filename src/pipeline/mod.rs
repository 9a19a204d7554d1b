//! Configuration-driven analysis runs.

mod config;
mod presets;
mod report;
mod runner;

pub use config::{AnalysisConfig, ModelStep};
pub use presets::{acc, preset, rt, PRESETS};
pub use report::{BracketReport, FigureReport, ModelReport, Report};
pub use runner::{
    figure_data, prepare_trials, resolve_brackets, run, run_model, subset_trials, PreparedTrials,
    RunOptions,
};
