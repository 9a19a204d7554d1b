//! Error types for the awareness-analysis library.

use thiserror::Error;

/// Errors raised by any stage of an analysis.
///
/// Every stage fails fast; nothing is retried or partially recovered.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Invalid value '{value}' in column '{column}': {reason}")]
    InvalidValue {
        column: String,
        value: String,
        reason: String,
    },

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("No data: {0}")]
    EmptyData(String),

    #[error("Model fitting failed: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported random-effects structure: {0}")]
    UnsupportedStructure(String),

    #[error("Plot error: {0}")]
    Plot(String),

    /// A named analysis step failed; wraps the underlying error message.
    #[error("{0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;
