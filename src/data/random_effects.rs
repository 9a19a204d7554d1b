//! Random effects specification for mixed models.
//!
//! Random effects use the bar syntax:
//! - `(1 | Subject)` - random intercept per subject
//! - `(1 + time | Subject)` - random intercept and slope (parsed, not fitted)
//! - `(0 + time | Subject)` - random slope only (parsed, not fitted)

use crate::data::{compare_keys, Formula, TrialTable};
use crate::error::{AnalysisError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single random effect term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomEffect {
    /// Terms in the random effect (e.g., ["1"] for intercept, ["1", "time"] for intercept + slope).
    pub terms: Vec<String>,
    /// Grouping variable (e.g., "Subject").
    pub grouping: String,
    /// Whether to include a random intercept.
    pub has_intercept: bool,
}

impl RandomEffect {
    /// Parse a random effect specification string.
    ///
    /// - `(1 | Subject)` -> intercept only
    /// - `(1 + time | Subject)` -> intercept + slope
    /// - `(0 + time | Subject)` -> slope only
    /// - `(time | Subject)` -> intercept + slope (implicit intercept)
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();

        if !spec.starts_with('(') || !spec.ends_with(')') {
            return Err(AnalysisError::FormulaParse(format!(
                "Random effect must be wrapped in parentheses: {}",
                spec
            )));
        }

        let inner = spec[1..spec.len() - 1].trim();

        let parts: Vec<&str> = inner.split('|').collect();
        if parts.len() != 2 {
            return Err(AnalysisError::FormulaParse(format!(
                "Random effect must have exactly one '|': {}",
                spec
            )));
        }

        let terms_str = parts[0].trim();
        let grouping = parts[1].trim().to_string();

        if grouping.is_empty() {
            return Err(AnalysisError::FormulaParse(
                "Random effect grouping variable cannot be empty".to_string(),
            ));
        }

        let mut terms = Vec::new();
        let mut has_intercept = true;

        let terms_str = if terms_str.starts_with("0 +") || terms_str.starts_with("0+") {
            has_intercept = false;
            terms_str.trim_start_matches('0').trim_start().trim_start_matches('+').trim()
        } else if terms_str.starts_with("-1 +") || terms_str.starts_with("-1+") {
            has_intercept = false;
            terms_str.trim_start_matches("-1").trim_start().trim_start_matches('+').trim()
        } else {
            terms_str
        };

        for term in terms_str.split('+') {
            let term = term.trim();
            if term.is_empty() || term == "1" {
                continue;
            }
            if term == "0" || term == "-1" {
                has_intercept = false;
                continue;
            }
            terms.push(term.to_string());
        }

        if has_intercept {
            terms.insert(0, "1".to_string());
        }

        if terms.is_empty() {
            return Err(AnalysisError::FormulaParse(
                "Random effect must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            terms,
            grouping,
            has_intercept,
        })
    }

    /// Check if this is a random intercept only.
    pub fn is_intercept_only(&self) -> bool {
        self.terms.len() == 1 && self.terms[0] == "1"
    }

    /// Number of random effect terms per group.
    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }
}

impl std::fmt::Display for RandomEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} | {})", self.terms.join(" + "), self.grouping)
    }
}

/// A formula with a response, fixed effects and random effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedFormula {
    /// Fixed effects formula (carries the response).
    pub fixed: Formula,
    /// Random effects.
    pub random: Vec<RandomEffect>,
    /// Formula as written.
    pub formula_str: String,
}

impl MixedFormula {
    /// Parse a mixed model formula.
    ///
    /// # Examples
    /// ```
    /// use awareness_analysis::data::MixedFormula;
    /// let f = MixedFormula::parse("Target.RT ~ Attention*Region + (1|Subject)").unwrap();
    /// assert_eq!(f.response(), Some("Target.RT"));
    /// assert_eq!(f.fixed.terms.len(), 3);
    /// assert!(f.random[0].is_intercept_only());
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let (lhs, rhs) = formula.split_once('~').ok_or_else(|| {
            AnalysisError::FormulaParse("Formula must contain '~'".to_string())
        })?;

        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(AnalysisError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let re = Regex::new(r"\([^)]+\|[^)]+\)")
            .map_err(|e| AnalysisError::FormulaParse(e.to_string()))?;
        let random_strs: Vec<&str> = re.find_iter(rhs).map(|m| m.as_str()).collect();

        let random: Vec<RandomEffect> = random_strs
            .iter()
            .map(|s| RandomEffect::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let mut fixed_str = rhs.to_string();
        for re_str in &random_strs {
            fixed_str = fixed_str.replace(re_str, "");
        }

        let fixed_str = fixed_str
            .split('+')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" + ");

        let fixed_rhs = if fixed_str.is_empty() { "1".to_string() } else { fixed_str };
        let fixed = Formula::parse(&format!("{} ~ {}", lhs.trim(), fixed_rhs))?;

        Ok(Self {
            fixed,
            random,
            formula_str,
        })
    }

    /// Response variable, if given.
    pub fn response(&self) -> Option<&str> {
        self.fixed.response.as_deref()
    }

    /// Check if the formula has any random effects.
    pub fn has_random_effects(&self) -> bool {
        !self.random.is_empty()
    }

    /// Get all grouping variables.
    pub fn grouping_variables(&self) -> Vec<&str> {
        self.random.iter().map(|r| r.grouping.as_str()).collect()
    }

    /// All variables used: response, fixed effects, random grouping and slope terms.
    pub fn all_variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        if let Some(response) = self.response() {
            vars.push(response);
        }
        vars.extend(self.fixed.variables());
        for re in &self.random {
            vars.push(&re.grouping);
            vars.extend(re.terms.iter().filter(|t| *t != "1").map(|t| t.as_str()));
        }
        let mut seen = Vec::new();
        vars.retain(|v| {
            if seen.contains(v) {
                false
            } else {
                seen.push(*v);
                true
            }
        });
        vars
    }
}

impl std::fmt::Display for MixedFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.formula_str)
    }
}

/// Group membership for a random intercept.
///
/// Stores one group index per trial instead of a dense Z matrix; every model in
/// this crate has a single random intercept, so Z is a pure indicator.
#[derive(Debug, Clone)]
pub struct GroupingFactor {
    /// Grouping column name.
    pub column: String,
    /// Group index of each trial.
    pub group_indices: Vec<usize>,
    /// Unique group IDs, in sorted order.
    pub group_ids: Vec<String>,
    /// Number of groups.
    pub n_groups: usize,
}

impl GroupingFactor {
    /// Build group membership from a trial table and a random effect.
    pub fn from_random_effect(table: &TrialTable, random_effect: &RandomEffect) -> Result<Self> {
        if !random_effect.is_intercept_only() {
            return Err(AnalysisError::UnsupportedStructure(
                "Random slopes are not supported. Use (1 | group) for random intercepts."
                    .to_string(),
            ));
        }
        Self::from_column(table, &random_effect.grouping)
    }

    /// Build group membership from a column.
    pub fn from_column(table: &TrialTable, column: &str) -> Result<Self> {
        let keys = table.text_column(column)?;

        let mut group_ids: Vec<String> = keys.clone();
        group_ids.sort_by(|a, b| compare_keys(a, b));
        group_ids.dedup();

        let index: HashMap<&str, usize> = group_ids
            .iter()
            .enumerate()
            .map(|(i, g)| (g.as_str(), i))
            .collect();
        let group_indices: Vec<usize> = keys.iter().map(|k| index[k.as_str()]).collect();

        Ok(Self {
            column: column.to_string(),
            n_groups: group_ids.len(),
            group_indices,
            group_ids,
        })
    }

    /// Number of trials.
    pub fn n_obs(&self) -> usize {
        self.group_indices.len()
    }

    /// Trial indices belonging to each group.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.n_groups];
        for (i, &g) in self.group_indices.iter().enumerate() {
            members[g].push(i);
        }
        members
    }

    /// Get number of observations per group.
    pub fn observations_per_group(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_groups];
        for &idx in &self.group_indices {
            counts[idx] += 1;
        }
        counts
    }
}
