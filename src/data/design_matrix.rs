//! Design matrix construction from trial tables and formulas.
//!
//! Factor levels are declared explicitly, in order; the first declared level is
//! the reference level for treatment (dummy) coding, and the declared order is
//! the polynomial order for polynomial coding.

use crate::data::{ColumnKind, Formula, Term, TrialTable};
use crate::error::{AnalysisError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Contrast coding for categorical factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coding {
    /// Dummy coding against the first level.
    #[default]
    Treatment,
    /// Orthonormal polynomial contrasts over the level order.
    Polynomial,
}

/// A categorical factor with an explicit level order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorSpec {
    pub name: String,
    pub levels: Vec<String>,
}

impl FactorSpec {
    pub fn new(name: &str, levels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            levels: levels.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Position of a level.
    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }
}

/// How a formula variable enters the design.
#[derive(Debug, Clone)]
enum Encoding {
    Factor {
        spec: FactorSpec,
        /// levels × coding columns.
        contrasts: DMatrix<f64>,
        /// Column name suffix per coding column.
        suffixes: Vec<String>,
    },
    Continuous {
        mean: f64,
    },
}

/// A value assigned to a variable when encoding a row.
#[derive(Debug, Clone, Copy)]
enum Cell {
    Level(usize),
    Number(f64),
}

/// A design matrix for mixed modeling.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (trials × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Fixed terms, in formula order.
    terms: Vec<Term>,
    /// Column indices of each term.
    term_columns: Vec<Vec<usize>>,
    /// Encoding per formula variable.
    encodings: Vec<(String, Encoding)>,
    /// Whether the first column is an intercept.
    intercept: bool,
    /// Contrast coding used for factors.
    coding: Coding,
}

impl DesignMatrix {
    /// Build a design matrix from a trial table and formula.
    ///
    /// Variables listed in `factors` use the declared levels. Other text
    /// variables are factors with sorted observed levels; numeric variables
    /// enter as a single continuous column.
    pub fn from_formula(
        table: &TrialTable,
        formula: &Formula,
        factors: &[FactorSpec],
        coding: Coding,
    ) -> Result<Self> {
        let n = table.n_rows();
        let mut encodings: Vec<(String, Encoding)> = Vec::new();
        let mut cells: HashMap<String, Vec<Cell>> = HashMap::new();

        for var in formula.variables() {
            if !table.has_column(var) {
                return Err(AnalysisError::MissingColumn(var.to_string()));
            }

            let declared = factors.iter().find(|f| f.name == var);
            let is_numeric = declared.is_none() && table.column_kind(var) == Some(ColumnKind::Number);

            if is_numeric {
                let values = table.numeric_column(var)?;
                let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
                cells.insert(var.to_string(), values.into_iter().map(Cell::Number).collect());
                encodings.push((var.to_string(), Encoding::Continuous { mean }));
                continue;
            }

            let spec = match declared {
                Some(spec) => spec.clone(),
                None => FactorSpec {
                    name: var.to_string(),
                    levels: table.levels(var)?,
                },
            };
            if spec.levels.is_empty() {
                return Err(AnalysisError::InvalidParameter(format!(
                    "Factor '{}' has no levels",
                    var
                )));
            }

            let keys = table.text_column(var)?;
            let mut var_cells = Vec::with_capacity(n);
            for key in &keys {
                let idx = spec.level_index(key).ok_or_else(|| AnalysisError::InvalidValue {
                    column: var.to_string(),
                    value: key.clone(),
                    reason: format!("not a declared level {:?}", spec.levels),
                })?;
                var_cells.push(Cell::Level(idx));
            }
            cells.insert(var.to_string(), var_cells);

            let (contrasts, suffixes) = contrast_matrix(&spec.levels, coding);
            encodings.push((
                var.to_string(),
                Encoding::Factor {
                    spec,
                    contrasts,
                    suffixes,
                },
            ));
        }

        let mut design = Self {
            matrix: DMatrix::zeros(0, 0),
            coefficient_names: Vec::new(),
            terms: formula.terms.clone(),
            term_columns: Vec::new(),
            encodings,
            intercept: formula.intercept,
            coding,
        };
        design.layout_columns();

        let p = design.coefficient_names.len();
        let mut matrix = DMatrix::zeros(n, p);
        for row in 0..n {
            let assignment: HashMap<&str, Cell> = cells
                .iter()
                .map(|(name, col)| (name.as_str(), col[row]))
                .collect();
            let encoded = design.encode(&assignment);
            for (j, v) in encoded.into_iter().enumerate() {
                matrix[(row, j)] = v;
            }
        }
        design.matrix = matrix;

        Ok(design)
    }

    /// Compute coefficient names and term column indices.
    fn layout_columns(&mut self) {
        let mut names = Vec::new();
        let mut term_columns = Vec::new();

        if self.intercept {
            names.push("(Intercept)".to_string());
        }

        for term in &self.terms {
            let mut term_names: Vec<String> = Vec::new();
            for (pos, var) in term.variables().iter().enumerate() {
                let labels = self.variable_labels(var);
                if pos == 0 {
                    term_names = labels;
                    continue;
                }
                // First variable varies fastest.
                let mut next = Vec::with_capacity(term_names.len() * labels.len());
                for label in &labels {
                    for prefix in &term_names {
                        next.push(format!("{}:{}", prefix, label));
                    }
                }
                term_names = next;
            }
            let start = names.len();
            names.extend(term_names);
            term_columns.push((start..names.len()).collect());
        }

        self.coefficient_names = names;
        self.term_columns = term_columns;
    }

    fn encoding(&self, var: &str) -> Option<&Encoding> {
        self.encodings.iter().find(|(n, _)| n == var).map(|(_, e)| e)
    }

    fn variable_labels(&self, var: &str) -> Vec<String> {
        match self.encoding(var) {
            Some(Encoding::Factor { suffixes, .. }) => {
                suffixes.iter().map(|s| format!("{}{}", var, s)).collect()
            }
            _ => vec![var.to_string()],
        }
    }

    /// Coding column values of one variable for an assigned cell.
    fn variable_values(&self, var: &str, cell: Cell) -> Vec<f64> {
        match (self.encoding(var), cell) {
            (Some(Encoding::Factor { contrasts, .. }), Cell::Level(idx)) => {
                contrasts.row(idx).iter().copied().collect()
            }
            (_, Cell::Number(x)) => vec![x],
            (_, Cell::Level(idx)) => vec![idx as f64],
        }
    }

    /// Encode one design row from an assignment of every formula variable.
    fn encode(&self, assignment: &HashMap<&str, Cell>) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.coefficient_names.len());
        if self.intercept {
            row.push(1.0);
        }
        for term in &self.terms {
            let mut products: Vec<f64> = vec![1.0];
            for (pos, var) in term.variables().iter().enumerate() {
                let values = self.variable_values(var, assignment[var]);
                let mut next = Vec::with_capacity(products.len() * values.len());
                for v in &values {
                    for p in &products {
                        next.push(if pos == 0 { *v } else { p * v });
                    }
                }
                products = next;
            }
            row.extend(products);
        }
        row
    }

    /// Design row for a level assignment (reference grids).
    ///
    /// Every factor of the design must be assigned; continuous variables are
    /// held at their sample mean.
    pub fn row_for(&self, levels: &HashMap<String, String>) -> Result<Vec<f64>> {
        let mut assignment: HashMap<&str, Cell> = HashMap::new();
        for (name, encoding) in &self.encodings {
            let cell = match encoding {
                Encoding::Continuous { mean } => Cell::Number(*mean),
                Encoding::Factor { spec, .. } => {
                    let level = levels.get(name).ok_or_else(|| {
                        AnalysisError::InvalidParameter(format!("No level given for '{}'", name))
                    })?;
                    let idx = spec.level_index(level).ok_or_else(|| AnalysisError::InvalidValue {
                        column: name.clone(),
                        value: level.clone(),
                        reason: format!("not a declared level {:?}", spec.levels),
                    })?;
                    Cell::Level(idx)
                }
            };
            assignment.insert(name.as_str(), cell);
        }
        Ok(self.encode(&assignment))
    }

    /// Factors of the design with their level order, in formula order.
    pub fn factors(&self) -> Vec<&FactorSpec> {
        self.encodings
            .iter()
            .filter_map(|(_, e)| match e {
                Encoding::Factor { spec, .. } => Some(spec),
                Encoding::Continuous { .. } => None,
            })
            .collect()
    }

    /// Get a factor by name.
    pub fn factor(&self, name: &str) -> Option<&FactorSpec> {
        self.factors().into_iter().find(|f| f.name == name)
    }

    /// Fail when a column is identically zero (an unobserved level or cell).
    pub fn check_estimable(&self) -> Result<()> {
        for (j, name) in self.coefficient_names.iter().enumerate() {
            if self.matrix.column(j).iter().all(|v| *v == 0.0) {
                return Err(AnalysisError::Numerical(format!(
                    "Coefficient '{}' is not estimable: its column is all zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Fixed terms, in formula order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Column indices of each term, aligned with `terms()`.
    pub fn term_columns(&self) -> &[Vec<usize>] {
        &self.term_columns
    }

    /// Number of trials (rows).
    pub fn n_obs(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.intercept
    }

    /// Contrast coding used for factors.
    pub fn coding(&self) -> Coding {
        self.coding
    }
}

/// Contrast matrix (levels × columns) and column name suffixes.
fn contrast_matrix(levels: &[String], coding: Coding) -> (DMatrix<f64>, Vec<String>) {
    let k = levels.len();
    if k < 2 {
        return (DMatrix::zeros(k, 0), Vec::new());
    }
    match coding {
        Coding::Treatment => {
            let contrasts = DMatrix::from_fn(k, k - 1, |i, j| if i == j + 1 { 1.0 } else { 0.0 });
            (contrasts, levels[1..].to_vec())
        }
        Coding::Polynomial => (polynomial_contrasts(k), polynomial_suffixes(k)),
    }
}

/// Orthonormal polynomial contrasts over equally spaced scores 1..k.
fn polynomial_contrasts(k: usize) -> DMatrix<f64> {
    let scores: Vec<f64> = (1..=k).map(|x| x as f64).collect();
    let mean = scores.iter().sum::<f64>() / k as f64;
    let mut basis: Vec<Vec<f64>> = vec![vec![1.0 / (k as f64).sqrt(); k]];

    for degree in 1..k {
        let mut col: Vec<f64> = scores.iter().map(|x| (x - mean).powi(degree as i32)).collect();
        for b in &basis {
            let proj: f64 = col.iter().zip(b).map(|(c, v)| c * v).sum();
            for (c, v) in col.iter_mut().zip(b) {
                *c -= proj * v;
            }
        }
        let norm = col.iter().map(|c| c * c).sum::<f64>().sqrt();
        for c in col.iter_mut() {
            *c /= norm;
        }
        basis.push(col);
    }

    DMatrix::from_fn(k, k - 1, |i, j| basis[j + 1][i])
}

fn polynomial_suffixes(k: usize) -> Vec<String> {
    (1..k)
        .map(|d| match d {
            1 => ".L".to_string(),
            2 => ".Q".to_string(),
            3 => ".C".to_string(),
            _ => format!("^{}", d),
        })
        .collect()
}
