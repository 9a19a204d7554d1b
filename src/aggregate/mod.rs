//! Group-wise means of a trial-level outcome.

use crate::data::{compare_keys, AggregatedRow, AggregatedTable, TrialTable, Value};
use crate::error::{AnalysisError, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::info;

/// Mean of `outcome` within each observed combination of `group_by`.
///
/// Missing outcome values are skipped; a group whose outcome is entirely
/// missing has a NaN mean. Rows with a missing grouping key are skipped.
/// Groups are sorted by key, numerically where both keys parse as numbers.
pub fn aggregate_mean(
    table: &TrialTable,
    group_by: &[String],
    outcome: &str,
) -> Result<AggregatedTable> {
    if group_by.is_empty() {
        return Err(AnalysisError::InvalidParameter(
            "At least one grouping column is required".to_string(),
        ));
    }

    let key_columns: Vec<&[Value]> = group_by
        .iter()
        .map(|c| table.column(c))
        .collect::<Result<_>>()?;
    let values = table.column(outcome)?;

    let mut sums: HashMap<Vec<String>, (f64, usize)> = HashMap::new();
    for row in 0..table.n_rows() {
        let key: Option<Vec<String>> = key_columns.iter().map(|col| col[row].key()).collect();
        let Some(key) = key else { continue };

        let entry = sums.entry(key).or_insert((0.0, 0));
        match &values[row] {
            Value::Number(x) => {
                entry.0 += x;
                entry.1 += 1;
            }
            Value::Missing => {}
            Value::Text(s) => {
                let x = s.trim().parse::<f64>().map_err(|_| AnalysisError::InvalidValue {
                    column: outcome.to_string(),
                    value: s.clone(),
                    reason: "outcome is not numeric".to_string(),
                })?;
                entry.0 += x;
                entry.1 += 1;
            }
        }
    }

    let mut rows: Vec<AggregatedRow> = sums
        .into_iter()
        .map(|(keys, (sum, n))| AggregatedRow {
            keys,
            mean: if n == 0 { f64::NAN } else { sum / n as f64 },
            n,
        })
        .collect();
    rows.sort_by(|a, b| compare_key_tuples(&a.keys, &b.keys));

    info!(
        outcome,
        group_by = %group_by.join(","),
        n_groups = rows.len(),
        "aggregated"
    );

    Ok(AggregatedTable {
        group_by: group_by.to_vec(),
        outcome: outcome.to_string(),
        rows,
    })
}

fn compare_key_tuples(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match compare_keys(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn text(values: &[&str]) -> Vec<Value> {
        values.iter().map(|v| Value::Text(v.to_string())).collect()
    }

    fn numbers(values: &[f64]) -> Vec<Value> {
        values.iter().map(|v| Value::Number(*v)).collect()
    }

    /// 3 subjects × 2 regions, 2 trials per cell.
    fn create_test_table() -> TrialTable {
        TrialTable::from_columns(vec![
            (
                "Subject".to_string(),
                text(&["S1", "S1", "S1", "S1", "S2", "S2", "S2", "S2", "S3", "S3", "S3", "S3"]),
            ),
            (
                "Region".to_string(),
                text(&[
                    "FEF", "FEF", "Vertex", "Vertex", "FEF", "FEF", "Vertex", "Vertex", "FEF",
                    "FEF", "Vertex", "Vertex",
                ]),
            ),
            (
                "Target.RT".to_string(),
                numbers(&[
                    400.0, 420.0, 500.0, 520.0, 300.0, 310.0, 350.0, 370.0, 600.0, 640.0, 610.0,
                    590.0,
                ]),
            ),
        ])
        .unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mean_per_group() {
        let table = create_test_table();
        let agg = aggregate_mean(&table, &cols(&["Region", "Subject"]), "Target.RT").unwrap();

        assert_eq!(agg.n_rows(), 6);
        assert_relative_eq!(agg.mean_of(&["FEF", "S1"]).unwrap(), 410.0);
        assert_relative_eq!(agg.mean_of(&["Vertex", "S2"]).unwrap(), 360.0);
        assert_relative_eq!(agg.mean_of(&["Vertex", "S3"]).unwrap(), 600.0);
        assert!(agg.rows.iter().all(|r| r.n == 2));
    }

    #[test]
    fn test_sorted_keys_and_categories() {
        let table = create_test_table();
        let agg = aggregate_mean(&table, &cols(&["Region", "Subject"]), "Target.RT").unwrap();

        assert_eq!(agg.rows[0].keys, vec!["FEF", "S1"]);
        assert_eq!(agg.rows[5].keys, vec!["Vertex", "S3"]);
        assert_eq!(agg.categories("Region").unwrap(), vec!["FEF", "Vertex"]);
        assert_eq!(agg.values_for("Region", "FEF").unwrap(), vec![410.0, 305.0, 620.0]);
    }

    #[test]
    fn test_no_zero_filling() {
        let table = create_test_table().select_rows(&[0, 1, 2, 3, 4]);
        let agg = aggregate_mean(&table, &cols(&["Region", "Subject"]), "Target.RT").unwrap();
        assert_eq!(agg.n_rows(), 3);
        assert!(agg.mean_of(&["Vertex", "S2"]).is_none());
    }

    #[test]
    fn test_missing_outcome_skipped() {
        let table = TrialTable::from_columns(vec![
            ("Subject".to_string(), text(&["S1", "S1", "S2"])),
            (
                "Target.ACC".to_string(),
                vec![Value::Number(1.0), Value::Missing, Value::Missing],
            ),
        ])
        .unwrap();
        let agg = aggregate_mean(&table, &cols(&["Subject"]), "Target.ACC").unwrap();

        assert_relative_eq!(agg.mean_of(&["S1"]).unwrap(), 1.0);
        assert_eq!(agg.rows[0].n, 1);
        assert!(agg.mean_of(&["S2"]).unwrap().is_nan());
    }

    #[test]
    fn test_numeric_keys_sort_numerically() {
        let table = TrialTable::from_columns(vec![
            ("Subject".to_string(), text(&["10", "2", "1"])),
            ("Target.ACC".to_string(), numbers(&[1.0, 0.0, 1.0])),
        ])
        .unwrap();
        let agg = aggregate_mean(&table, &cols(&["Subject"]), "Target.ACC").unwrap();
        let keys: Vec<&str> = agg.rows.iter().map(|r| r.keys[0].as_str()).collect();
        assert_eq!(keys, vec!["1", "2", "10"]);
    }

    #[test]
    fn test_table_string_three_decimals() {
        let table = create_test_table();
        let agg = aggregate_mean(&table, &cols(&["Region"]), "Target.RT").unwrap();
        let printed = agg.to_table_string();
        assert!(printed.starts_with("Region  Target.RT"));
        assert!(printed.contains("FEF       445.000"));
    }

    #[test]
    fn test_unknown_column() {
        let table = create_test_table();
        let result = aggregate_mean(&table, &cols(&["Task"]), "Target.RT");
        assert!(matches!(result, Err(AnalysisError::MissingColumn(_))));
        assert!(aggregate_mean(&table, &[], "Target.RT").is_err());
    }
}
