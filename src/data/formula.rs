//! Formula parsing for model specification.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};

/// Largest number of factors accepted in a single `*` expansion.
const MAX_CROSSED: usize = 10;

/// A term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Intercept term (constant).
    Intercept,
    /// Main effect of a variable.
    Main(String),
    /// Interaction between two or more variables.
    Interaction(Vec<String>),
}

impl Term {
    fn from_vars(mut vars: Vec<String>) -> Self {
        if vars.len() == 1 {
            Term::Main(vars.remove(0))
        } else {
            Term::Interaction(vars)
        }
    }

    /// Get the variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Intercept => vec![],
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }

    /// Interaction order (1 for main effects).
    pub fn order(&self) -> usize {
        match self {
            Term::Intercept => 0,
            Term::Main(_) => 1,
            Term::Interaction(vs) => vs.len(),
        }
    }

    /// Whether two terms involve the same set of variables.
    fn same_as(&self, other: &Term) -> bool {
        let mut a = self.variables();
        let mut b = other.variables();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Intercept => write!(f, "1"),
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(vs) => write!(f, "{}", vs.join(":")),
        }
    }
}

/// A parsed fixed-effects formula.
///
/// Supports R-style formula syntax:
/// - `y ~ a` - intercept + a
/// - `y ~ a + b` - intercept + a + b
/// - `y ~ a * b * c` - all main effects and interactions of a, b, c
/// - `y ~ 0 + a` - no intercept
/// - `y ~ a:b` - intercept + interaction only
///
/// Terms are kept in R order: by interaction order, then by appearance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Response variable (left of `~`), if given.
    pub response: Option<String>,
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in the formula (excluding intercept).
    pub terms: Vec<Term>,
    /// Formula as written.
    pub formula_str: String,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use awareness_analysis::data::Formula;
    /// let f = Formula::parse("Target.ACC ~ Region * Task").unwrap();
    /// assert_eq!(f.response.as_deref(), Some("Target.ACC"));
    /// assert_eq!(f.terms.len(), 3);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let (lhs, rhs) = formula.split_once('~').ok_or_else(|| {
            AnalysisError::FormulaParse("Formula must contain '~'".to_string())
        })?;

        let response = match lhs.trim() {
            "" => None,
            name => Some(name.to_string()),
        };

        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(AnalysisError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        // Check for explicit no-intercept
        let (intercept, rhs) = if rhs == "0" || rhs == "-1" {
            return Err(AnalysisError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        } else if rhs.starts_with("0 +") || rhs.starts_with("0+") {
            (false, rhs.trim_start_matches('0').trim_start().trim_start_matches('+').trim())
        } else if rhs.starts_with("-1 +") || rhs.starts_with("-1+") {
            (false, rhs.trim_start_matches("-1").trim_start().trim_start_matches('+').trim())
        } else {
            (true, rhs)
        };

        let mut terms: Vec<Term> = Vec::new();

        for term_str in rhs.split('+').map(|s| s.trim()) {
            if term_str.is_empty() || term_str == "1" {
                continue;
            }

            if term_str.contains('*') {
                let parts = split_names(term_str, '*')?;
                if parts.len() > MAX_CROSSED {
                    return Err(AnalysisError::FormulaParse(format!(
                        "Too many crossed factors in '{}'",
                        term_str
                    )));
                }
                for term in expand_crossed(&parts) {
                    push_term(&mut terms, term);
                }
            } else if term_str.contains(':') {
                let parts = split_names(term_str, ':')?;
                push_term(&mut terms, Term::from_vars(parts));
            } else {
                push_term(&mut terms, Term::Main(term_str.to_string()));
            }
        }

        if terms.is_empty() && !intercept {
            return Err(AnalysisError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        // Stable: keeps appearance order within each interaction order.
        terms.sort_by_key(|t| t.order());

        Ok(Self {
            response,
            intercept,
            terms,
            formula_str,
        })
    }

    /// Get all variable names used in the formula, in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        for v in self.terms.iter().flat_map(|t| t.variables()) {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
        vars
    }

    /// Check if a variable is used in the formula.
    pub fn uses_variable(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.variables().contains(&name))
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(response) = &self.response {
            write!(f, "{} ", response)?;
        }
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        if self.terms.is_empty() {
            return write!(f, "1");
        }
        let term_strs: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", term_strs.join(" + "))
    }
}

fn push_term(terms: &mut Vec<Term>, term: Term) {
    if !terms.iter().any(|t| t.same_as(&term)) {
        terms.push(term);
    }
}

fn split_names(term_str: &str, sep: char) -> Result<Vec<String>> {
    let parts: Vec<String> = term_str.split(sep).map(|s| s.trim().to_string()).collect();
    if parts.len() < 2 || parts.iter().any(|p| p.is_empty() || p.contains([':', '*'])) {
        return Err(AnalysisError::FormulaParse(format!(
            "Invalid interaction term: {}",
            term_str
        )));
    }
    Ok(parts)
}

/// All non-empty subsets of `parts`, by size and then by bitmask order.
fn expand_crossed(parts: &[String]) -> Vec<Term> {
    let k = parts.len();
    let mut masks: Vec<u32> = (1..(1u32 << k)).collect();
    masks.sort_by_key(|m| (m.count_ones(), *m));
    masks
        .into_iter()
        .map(|mask| {
            let vars: Vec<String> = (0..k)
                .filter(|i| mask & (1 << i) != 0)
                .map(|i| parts[i].clone())
                .collect();
            Term::from_vars(vars)
        })
        .collect()
}
