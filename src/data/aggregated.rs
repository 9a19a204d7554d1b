//! Per-group summaries of a trial table.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};

/// One group of an aggregated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    /// Group key, aligned with `AggregatedTable::group_by`.
    pub keys: Vec<String>,
    /// Mean outcome of the group (NaN if every value was missing).
    pub mean: f64,
    /// Number of non-missing outcome values.
    pub n: usize,
}

/// Mean outcome per observed group, in sorted key order.
///
/// Used for plots only; models work on the trial-level table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTable {
    /// Grouping columns.
    pub group_by: Vec<String>,
    /// Outcome column that was averaged.
    pub outcome: String,
    /// One row per observed group.
    pub rows: Vec<AggregatedRow>,
}

impl AggregatedTable {
    /// Number of groups.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Position of a grouping column.
    pub fn key_index(&self, column: &str) -> Result<usize> {
        self.group_by
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| AnalysisError::MissingColumn(column.to_string()))
    }

    /// Distinct values of a grouping column, in table order.
    pub fn categories(&self, column: &str) -> Result<Vec<String>> {
        let idx = self.key_index(column)?;
        let mut categories: Vec<String> = Vec::new();
        for row in &self.rows {
            if !categories.contains(&row.keys[idx]) {
                categories.push(row.keys[idx].clone());
            }
        }
        Ok(categories)
    }

    /// Means of the groups whose `column` equals `level`.
    pub fn values_for(&self, column: &str, level: &str) -> Result<Vec<f64>> {
        let idx = self.key_index(column)?;
        Ok(self
            .rows
            .iter()
            .filter(|r| r.keys[idx] == level)
            .map(|r| r.mean)
            .collect())
    }

    /// Keep the groups whose `column` equals `level`.
    pub fn subset(&self, column: &str, level: &str) -> Result<Self> {
        let idx = self.key_index(column)?;
        Ok(Self {
            group_by: self.group_by.clone(),
            outcome: self.outcome.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| r.keys[idx] == level)
                .cloned()
                .collect(),
        })
    }

    /// Mean for an exact group key.
    pub fn mean_of(&self, keys: &[&str]) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.keys.iter().map(|k| k.as_str()).eq(keys.iter().copied()))
            .map(|r| r.mean)
    }

    /// Plain-text table with 3-decimal means.
    pub fn to_table_string(&self) -> String {
        let mut widths: Vec<usize> = self.group_by.iter().map(|c| c.len()).collect();
        for row in &self.rows {
            for (w, k) in widths.iter_mut().zip(&row.keys) {
                *w = (*w).max(k.len());
            }
        }
        let mean_width = self.outcome.len().max(8);

        let mut out = String::new();
        for (c, w) in self.group_by.iter().zip(&widths) {
            out.push_str(&format!("{:<w$}  ", c, w = *w));
        }
        out.push_str(&format!("{:>w$}\n", self.outcome, w = mean_width));

        for row in &self.rows {
            for (k, w) in row.keys.iter().zip(&widths) {
                out.push_str(&format!("{:<w$}  ", k, w = *w));
            }
            out.push_str(&format!("{:>w$.3}\n", row.mean, w = mean_width));
        }
        out
    }
}

impl std::fmt::Display for AggregatedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_table_string())
    }
}
