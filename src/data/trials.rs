//! Trial-level tables loaded from delimited experiment exports.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;

/// Tokens read as missing values; the usual spreadsheet and data-frame
/// export markers. Lowercase `na` is an ordinary label.
const MISSING_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// A single cell of a trial table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Text value (identifiers, factor labels, raw codes).
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Missing value.
    Missing,
}

impl Value {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Try to get as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical text form used for matching and grouping.
    ///
    /// Integral numbers print without a fractional part, so `1.0` and `"1"`
    /// share the key `"1"`.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Number(v) => Some(number_key(*v)),
            Value::Missing => None,
        }
    }

    fn parse(raw: &str, kind: ColumnKind) -> Self {
        let raw = raw.trim();
        if MISSING_TOKENS.contains(&raw) {
            return Value::Missing;
        }
        match kind {
            ColumnKind::Text => Value::Text(raw.to_string()),
            ColumnKind::Number => raw
                .parse::<f64>()
                .map(Value::Number)
                .unwrap_or(Value::Missing),
        }
    }
}

fn number_key(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Number,
}

/// A column to select from the input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Text,
        }
    }

    pub fn number(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Number,
        }
    }
}

/// Column-oriented table of trial records.
#[derive(Debug, Clone, Default)]
pub struct TrialTable {
    /// Column names in order.
    column_names: Vec<String>,
    /// Values per column.
    columns: HashMap<String, Vec<Value>>,
    /// Declared kind per column.
    column_kinds: HashMap<String, ColumnKind>,
    /// Number of rows.
    n_rows: usize,
}

impl TrialTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the declared columns from a delimited file.
    ///
    /// The first row must be a header. Only the columns in `columns` are kept,
    /// in the declared order; any declared column absent from the header is an
    /// error. Short records yield missing values for the absent fields.
    pub fn from_delimited<P: AsRef<Path>>(
        path: P,
        delimiter: u8,
        columns: &[ColumnSpec],
    ) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut positions = Vec::with_capacity(columns.len());
        for spec in columns {
            let pos = header
                .iter()
                .position(|h| h == &spec.name)
                .ok_or_else(|| AnalysisError::MissingColumn(spec.name.clone()))?;
            positions.push(pos);
        }

        let mut values: Vec<Vec<Value>> = vec![Vec::new(); columns.len()];
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            for (col_idx, (spec, &pos)) in columns.iter().zip(&positions).enumerate() {
                let value = match record.get(pos) {
                    Some(raw) => Value::parse(raw, spec.kind),
                    None => Value::Missing,
                };
                values[col_idx].push(value);
            }
        }

        let n_rows = values.first().map(|v| v.len()).unwrap_or(0);
        if n_rows == 0 {
            return Err(AnalysisError::EmptyData(format!(
                "No trials in '{}'",
                path.as_ref().display()
            )));
        }

        let mut table = Self::new();
        table.n_rows = n_rows;
        for (spec, col) in columns.iter().zip(values) {
            table.column_names.push(spec.name.clone());
            table.column_kinds.insert(spec.name.clone(), spec.kind);
            table.columns.insert(spec.name.clone(), col);
        }
        Ok(table)
    }

    /// Build a table from in-memory columns.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Self> {
        let mut table = Self::new();
        for (name, values) in columns {
            let kind = if values.iter().any(|v| matches!(v, Value::Text(_))) {
                ColumnKind::Text
            } else {
                ColumnKind::Number
            };
            table.set_column(&name, values, kind)?;
        }
        Ok(table)
    }

    /// Insert or replace a column.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>, kind: ColumnKind) -> Result<()> {
        if self.column_names.is_empty() {
            self.n_rows = values.len();
        } else if values.len() != self.n_rows {
            return Err(AnalysisError::InvalidParameter(format!(
                "Column '{}' has {} values, table has {} rows",
                name,
                values.len(),
                self.n_rows
            )));
        }
        if !self.has_column(name) {
            self.column_names.push(name.to_string());
        }
        self.column_kinds.insert(name.to_string(), kind);
        self.columns.insert(name.to_string(), values);
        Ok(())
    }

    /// Column names in order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Get the declared kind of a column.
    pub fn column_kind(&self, column: &str) -> Option<ColumnKind> {
        self.column_kinds.get(column).copied()
    }

    /// Get all values of a column.
    pub fn column(&self, column: &str) -> Result<&[Value]> {
        self.columns
            .get(column)
            .map(|v| v.as_slice())
            .ok_or_else(|| AnalysisError::MissingColumn(column.to_string()))
    }

    /// Get a single cell.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        self.columns.get(column).and_then(|c| c.get(row))
    }

    /// Column as numbers. Text cells are parsed; missing or unparsable cells are errors.
    pub fn numeric_column(&self, column: &str) -> Result<Vec<f64>> {
        self.column(column)?
            .iter()
            .map(|v| match v {
                Value::Number(x) => Ok(*x),
                Value::Text(s) => s.trim().parse::<f64>().map_err(|_| AnalysisError::InvalidValue {
                    column: column.to_string(),
                    value: s.clone(),
                    reason: "not a number".to_string(),
                }),
                Value::Missing => Err(AnalysisError::InvalidValue {
                    column: column.to_string(),
                    value: "NA".to_string(),
                    reason: "missing value".to_string(),
                }),
            })
            .collect()
    }

    /// Column as canonical text keys. Missing cells are errors.
    pub fn text_column(&self, column: &str) -> Result<Vec<String>> {
        self.column(column)?
            .iter()
            .map(|v| {
                v.key().ok_or_else(|| AnalysisError::InvalidValue {
                    column: column.to_string(),
                    value: "NA".to_string(),
                    reason: "missing value".to_string(),
                })
            })
            .collect()
    }

    /// Distinct non-missing values of a column, in sorted key order.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let set: BTreeSet<String> = self.column(column)?.iter().filter_map(|v| v.key()).collect();
        let mut levels: Vec<String> = set.into_iter().collect();
        levels.sort_by(|a, b| compare_keys(a, b));
        Ok(levels)
    }

    /// Whether any of the given columns is missing in a row.
    pub fn row_has_missing(&self, row: usize, columns: &[String]) -> bool {
        columns.iter().any(|c| {
            self.columns
                .get(c)
                .and_then(|vals| vals.get(row))
                .map(|v| v.is_missing())
                .unwrap_or(true)
        })
    }

    /// Keep only the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let kept: Vec<Value> = rows.iter().map(|&r| values[r].clone()).collect();
                (name.clone(), kept)
            })
            .collect();
        Self {
            column_names: self.column_names.clone(),
            columns,
            column_kinds: self.column_kinds.clone(),
            n_rows: rows.len(),
        }
    }
}

/// Order group keys: numerically when both parse as numbers, lexically otherwise.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::text("Subject"),
            ColumnSpec::text("Awareness"),
            ColumnSpec::text("Region"),
            ColumnSpec::number("Target.ACC"),
            ColumnSpec::text("TargetPresence"),
        ]
    }

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Subject;Awareness;Region;Target.ACC;TargetPresence;Extra").unwrap();
        writeln!(file, "1;1;F;1;Present;x").unwrap();
        writeln!(file, "1;0;V;0;Present;x").unwrap();
        writeln!(file, "2;1;F;;Absent;x").unwrap();
        writeln!(file, "10;0;V;NA;Present;x").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_selects_declared_columns() {
        let file = create_test_csv();
        let table = TrialTable::from_delimited(file.path(), b';', &specs()).unwrap();

        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.n_columns(), 5);
        assert!(!table.has_column("Extra"));
        assert_eq!(
            table.column_names(),
            &["Subject", "Awareness", "Region", "Target.ACC", "TargetPresence"]
        );
    }

    #[test]
    fn test_load_types_and_missing() {
        let file = create_test_csv();
        let table = TrialTable::from_delimited(file.path(), b';', &specs()).unwrap();

        assert_eq!(table.get(0, "Awareness").unwrap().as_text(), Some("1"));
        assert_eq!(table.get(0, "Target.ACC").unwrap().as_number(), Some(1.0));
        assert!(table.get(2, "Target.ACC").unwrap().is_missing());
        assert!(table.get(3, "Target.ACC").unwrap().is_missing());
        assert_eq!(table.column_kind("Target.ACC"), Some(ColumnKind::Number));
    }

    #[test]
    fn test_lowercase_na_is_a_label() {
        assert_eq!(Value::parse("na", ColumnKind::Text), Value::Text("na".into()));
        assert_eq!(Value::parse(" NA ", ColumnKind::Text), Value::Missing);
        assert_eq!(Value::parse("#N/A", ColumnKind::Text), Value::Missing);
        assert_eq!(Value::parse("None", ColumnKind::Number), Value::Missing);
        assert_eq!(Value::parse("na", ColumnKind::Number), Value::Missing);
    }

    #[test]
    fn test_missing_declared_column_fails() {
        let file = create_test_csv();
        let mut cols = specs();
        cols.push(ColumnSpec::number("Target.RT"));
        let err = TrialTable::from_delimited(file.path(), b';', &cols).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn(c) if c == "Target.RT"));
    }

    #[test]
    fn test_missing_file_fails() {
        let result = TrialTable::from_delimited("does/not/exist.csv", b';', &specs());
        assert!(matches!(result, Err(AnalysisError::Io(_))));
    }

    #[test]
    fn test_levels_sorted_numerically() {
        let file = create_test_csv();
        let table = TrialTable::from_delimited(file.path(), b';', &specs()).unwrap();
        assert_eq!(table.levels("Subject").unwrap(), vec!["1", "2", "10"]);
        assert_eq!(table.levels("Region").unwrap(), vec!["F", "V"]);
    }

    #[test]
    fn test_number_key_matches_text_code() {
        assert_eq!(Value::Number(1.0).key(), Some("1".to_string()));
        assert_eq!(Value::Number(0.5).key(), Some("0.5".to_string()));
        assert_eq!(Value::Missing.key(), None);
    }

    #[test]
    fn test_select_rows_and_numeric_column() {
        let file = create_test_csv();
        let table = TrialTable::from_delimited(file.path(), b';', &specs()).unwrap();
        let subset = table.select_rows(&[0, 1]);

        assert_eq!(subset.n_rows(), 2);
        assert_eq!(subset.numeric_column("Target.ACC").unwrap(), vec![1.0, 0.0]);
        assert!(table.numeric_column("Target.ACC").is_err());
    }

    #[test]
    fn test_set_column_length_mismatch() {
        let mut table = TrialTable::from_columns(vec![(
            "Subject".to_string(),
            vec![Value::Text("S1".into()), Value::Text("S2".into())],
        )])
        .unwrap();
        let err = table.set_column("Seen", vec![Value::Number(1.0)], ColumnKind::Number);
        assert!(err.is_err());
    }
}
