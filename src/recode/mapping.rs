//! Value mappings applied column by column.
//!
//! Two mapping semantics are kept apart:
//! - [`lookup`]: every value must be a key of the mapping; anything else
//!   (including missing) becomes missing in the target column.
//! - [`replace`]: mapped values are substituted, everything else passes
//!   through unchanged.

use crate::data::{ColumnKind, TrialTable, Value};
use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One recoding step of an analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecodeStep {
    /// Derive `target` from `source` by lookup; unmapped values become missing.
    Lookup {
        source: String,
        target: String,
        mapping: BTreeMap<String, String>,
    },
    /// Substitute mapped values of `column` in place.
    Replace {
        column: String,
        mapping: BTreeMap<String, String>,
    },
    /// Copy `source` into `target`.
    Copy { source: String, target: String },
    /// Convert a column to numbers; unparsable values become missing.
    ToNumeric { column: String },
}

impl RecodeStep {
    /// Apply this step to a table in place.
    pub fn apply(&self, table: &mut TrialTable) -> Result<()> {
        match self {
            RecodeStep::Lookup {
                source,
                target,
                mapping,
            } => lookup(table, source, target, mapping),
            RecodeStep::Replace { column, mapping } => replace(table, column, mapping),
            RecodeStep::Copy { source, target } => copy(table, source, target),
            RecodeStep::ToNumeric { column } => to_numeric(table, column),
        }
    }

    /// Column read by this step.
    pub fn source_column(&self) -> &str {
        match self {
            RecodeStep::Lookup { source, .. } | RecodeStep::Copy { source, .. } => source,
            RecodeStep::Replace { column, .. } | RecodeStep::ToNumeric { column } => column,
        }
    }

    /// Column written by this step.
    pub fn target_column(&self) -> &str {
        match self {
            RecodeStep::Lookup { target, .. } | RecodeStep::Copy { target, .. } => target,
            RecodeStep::Replace { column, .. } | RecodeStep::ToNumeric { column } => column,
        }
    }
}

/// Apply recoding steps in order.
pub fn apply_steps(table: &mut TrialTable, steps: &[RecodeStep]) -> Result<()> {
    for step in steps {
        step.apply(table)?;
    }
    Ok(())
}

/// Derive `target` from `source` through `mapping` with lookup semantics.
///
/// Values are matched by their canonical text, so a numeric `1.0` matches
/// the key `"1"`. Values absent from the mapping become missing.
pub fn lookup(
    table: &mut TrialTable,
    source: &str,
    target: &str,
    mapping: &BTreeMap<String, String>,
) -> Result<()> {
    let mapped: Vec<Value> = table
        .column(source)?
        .iter()
        .map(|v| match v.key().and_then(|k| mapping.get(&k)) {
            Some(label) => Value::Text(label.clone()),
            None => Value::Missing,
        })
        .collect();

    let n_missing = mapped.iter().filter(|v| v.is_missing()).count();
    debug!(source, target, n_missing, "lookup recode");

    table.set_column(target, mapped, ColumnKind::Text)
}

/// Substitute values of `column` through `mapping`; unmapped values pass through.
pub fn replace(
    table: &mut TrialTable,
    column: &str,
    mapping: &BTreeMap<String, String>,
) -> Result<()> {
    let kind = table.column_kind(column).unwrap_or(ColumnKind::Text);
    let mut n_replaced = 0usize;
    let replaced: Vec<Value> = table
        .column(column)?
        .iter()
        .map(|v| match v.key().and_then(|k| mapping.get(&k)) {
            Some(label) => {
                n_replaced += 1;
                Value::Text(label.clone())
            }
            None => v.clone(),
        })
        .collect();

    let kind = if n_replaced > 0 { ColumnKind::Text } else { kind };
    debug!(column, n_replaced, "replace recode");

    table.set_column(column, replaced, kind)
}

/// Copy a column under a new name.
pub fn copy(table: &mut TrialTable, source: &str, target: &str) -> Result<()> {
    let values = table.column(source)?.to_vec();
    let kind = table.column_kind(source).unwrap_or(ColumnKind::Text);
    table.set_column(target, values, kind)
}

/// Convert a column to numbers; text that does not parse becomes missing.
pub fn to_numeric(table: &mut TrialTable, column: &str) -> Result<()> {
    if !table.has_column(column) {
        return Err(AnalysisError::MissingColumn(column.to_string()));
    }
    let values: Vec<Value> = table
        .column(column)?
        .iter()
        .map(|v| match v {
            Value::Number(x) => Value::Number(*x),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .unwrap_or(Value::Missing),
            Value::Missing => Value::Missing,
        })
        .collect();
    table.set_column(column, values, ColumnKind::Number)
}
