//! Missing-value and equality filters over trial rows.

use crate::data::TrialTable;
use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Keep rows whose `column` equals `equals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub equals: String,
}

impl Condition {
    pub fn new(column: &str, equals: &str) -> Self {
        Self {
            column: column.to_string(),
            equals: equals.to_string(),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} == {:?}", self.column, self.equals)
    }
}

/// Filtering applied after recoding: drop-missing first, then each condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Drop rows with a missing value in any selected column.
    #[serde(default = "default_true")]
    pub drop_missing: bool,
    /// Conditions every kept row must satisfy.
    #[serde(default)]
    pub keep: Vec<Condition>,
}

fn default_true() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            drop_missing: true,
            keep: vec![Condition::new("TargetPresence", "Present")],
        }
    }
}

/// Row counts around one filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSummary {
    /// Filter description.
    pub filter: String,
    /// Number of rows before filtering.
    pub n_before: usize,
    /// Number of rows after filtering.
    pub n_after: usize,
}

impl FilterSummary {
    /// Number of rows removed.
    pub fn n_removed(&self) -> usize {
        self.n_before - self.n_after
    }
}

impl std::fmt::Display for FilterSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {} rows ({} removed)",
            self.filter,
            self.n_before,
            self.n_after,
            self.n_removed()
        )
    }
}

/// Drop rows with a missing value in any of `columns` (every column when `None`).
pub fn drop_missing(
    table: &TrialTable,
    columns: Option<&[String]>,
) -> Result<(TrialTable, FilterSummary)> {
    let columns: Vec<String> = match columns {
        Some(cols) => {
            for c in cols {
                if !table.has_column(c) {
                    return Err(AnalysisError::MissingColumn(c.clone()));
                }
            }
            cols.to_vec()
        }
        None => table.column_names().to_vec(),
    };

    let keep: Vec<usize> = (0..table.n_rows())
        .filter(|&row| !table.row_has_missing(row, &columns))
        .collect();

    let summary = FilterSummary {
        filter: "drop missing".to_string(),
        n_before: table.n_rows(),
        n_after: keep.len(),
    };
    info!("{}", summary);

    Ok((table.select_rows(&keep), summary))
}

/// Keep rows whose value in `column` has the canonical text `value`.
pub fn keep_equal(
    table: &TrialTable,
    column: &str,
    value: &str,
) -> Result<(TrialTable, FilterSummary)> {
    let keep: Vec<usize> = table
        .column(column)?
        .iter()
        .enumerate()
        .filter(|(_, v)| v.key().as_deref() == Some(value))
        .map(|(row, _)| row)
        .collect();

    let summary = FilterSummary {
        filter: Condition::new(column, value).to_string(),
        n_before: table.n_rows(),
        n_after: keep.len(),
    };
    info!("{}", summary);

    Ok((table.select_rows(&keep), summary))
}

/// Apply a filter configuration. Fails if no rows remain.
pub fn apply_filters(
    table: &TrialTable,
    config: &FilterConfig,
) -> Result<(TrialTable, Vec<FilterSummary>)> {
    let mut summaries = Vec::new();
    let mut current = table.clone();

    if config.drop_missing {
        let (filtered, summary) = drop_missing(&current, None)?;
        current = filtered;
        summaries.push(summary);
    }

    for condition in &config.keep {
        let (filtered, summary) = keep_equal(&current, &condition.column, &condition.equals)?;
        current = filtered;
        summaries.push(summary);
    }

    if current.n_rows() == 0 {
        return Err(AnalysisError::EmptyData(
            "No trials remain after filtering".to_string(),
        ));
    }

    Ok((current, summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    fn create_test_table() -> TrialTable {
        let presence = ["Present", "Present", "Absent", "Present", "Absent", "Present"];
        let acc = [
            Value::Number(1.0),
            Value::Missing,
            Value::Number(1.0),
            Value::Number(0.0),
            Value::Missing,
            Value::Number(1.0),
        ];
        TrialTable::from_columns(vec![
            (
                "TargetPresence".to_string(),
                presence.iter().map(|p| Value::Text(p.to_string())).collect(),
            ),
            ("Target.ACC".to_string(), acc.to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn test_drop_missing() {
        let table = create_test_table();
        let (filtered, summary) = drop_missing(&table, None).unwrap();
        assert_eq!(filtered.n_rows(), 4);
        assert_eq!(summary.n_removed(), 2);
    }

    #[test]
    fn test_drop_missing_unknown_column() {
        let table = create_test_table();
        let cols = vec!["Target.RT".to_string()];
        assert!(drop_missing(&table, Some(&cols)).is_err());
    }

    #[test]
    fn test_keep_equal() {
        let table = create_test_table();
        let (filtered, _) = keep_equal(&table, "TargetPresence", "Present").unwrap();
        assert_eq!(filtered.n_rows(), 4);
        assert!(filtered
            .text_column("TargetPresence")
            .unwrap()
            .iter()
            .all(|p| p == "Present"));
    }

    #[test]
    fn test_apply_filters_cardinality() {
        let table = create_test_table();
        let (filtered, summaries) = apply_filters(&table, &FilterConfig::default()).unwrap();

        // Present and non-missing: rows 0, 3, 5
        assert_eq!(filtered.n_rows(), 3);
        assert_eq!(filtered.n_columns(), table.n_columns());
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].n_after, 4);
        assert_eq!(summaries[1].n_after, 3);
    }

    #[test]
    fn test_apply_filters_empty_result() {
        let table = create_test_table();
        let config = FilterConfig {
            drop_missing: true,
            keep: vec![Condition::new("TargetPresence", "Unknown")],
        };
        assert!(matches!(
            apply_filters(&table, &config),
            Err(AnalysisError::EmptyData(_))
        ));
    }

    #[test]
    fn test_summary_display() {
        let summary = FilterSummary {
            filter: "drop missing".to_string(),
            n_before: 10,
            n_after: 7,
        };
        assert_eq!(summary.to_string(), "drop missing: 10 -> 7 rows (3 removed)");
    }
}
