//! Marginal means and pairwise contrasts over a reference grid.
//!
//! The reference grid holds every combination of the model's factor levels,
//! weighted equally. A marginal mean for a combination of the requested
//! variables averages the grid's design rows over all other factors;
//! continuous covariates sit at their sample mean. Pairwise contrasts
//! (earlier level minus later level) are adjusted within each `by` group.

use crate::correct::PAdjust;
use crate::data::FactorSpec;
use crate::error::{AnalysisError, Result};
use crate::model::GlmmFit;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use std::collections::HashMap;

/// A post-hoc request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostHocSpec {
    /// Variables whose level combinations are compared.
    pub marginal_vars: Vec<String>,
    /// Variables defining separate contrast families.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,
    /// Correction applied within each family.
    #[serde(default)]
    pub adjust: PAdjust,
}

impl PostHocSpec {
    pub fn new(marginal_vars: &[&str]) -> Self {
        Self {
            marginal_vars: marginal_vars.iter().map(|v| v.to_string()).collect(),
            by: Vec::new(),
            adjust: PAdjust::default(),
        }
    }

    /// Builder: set `by` variables.
    pub fn by(mut self, by: &[&str]) -> Self {
        self.by = by.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Builder: set the adjustment method.
    pub fn adjust(mut self, adjust: PAdjust) -> Self {
        self.adjust = adjust;
        self
    }
}

/// Estimated marginal mean of one cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginalMean {
    /// Levels of the marginal variables.
    pub levels: Vec<String>,
    /// Levels of the `by` variables.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,
    /// Estimate on the link scale.
    pub estimate: f64,
    pub std_error: f64,
    /// Lower 95% confidence limit (link scale).
    pub lower: f64,
    /// Upper 95% confidence limit (link scale).
    pub upper: f64,
    /// Estimate mapped through the inverse link.
    pub response: f64,
}

impl MarginalMean {
    /// Cell label, levels joined by spaces.
    pub fn label(&self) -> String {
        self.levels.join(" ")
    }
}

/// A pairwise contrast between two cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contrast {
    /// `first - second`.
    pub contrast: String,
    pub first: String,
    pub second: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,
    pub estimate: f64,
    pub std_error: f64,
    /// z (or t for linear models).
    pub statistic: f64,
    /// Unadjusted p-value.
    pub p_value: f64,
    /// Adjusted p-value.
    pub p_adjusted: f64,
}

impl Contrast {
    /// Whether this contrast compares `a` and `b`, in either order.
    pub fn compares(&self, a: &str, b: &str) -> bool {
        (self.first == a && self.second == b) || (self.first == b && self.second == a)
    }
}

/// Result of a post-hoc analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostHoc {
    pub marginal_vars: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,
    pub adjust: PAdjust,
    /// Residual degrees of freedom for t statistics; absent for z statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub df: Option<usize>,
    pub means: Vec<MarginalMean>,
    pub contrasts: Vec<Contrast>,
}

impl PostHoc {
    /// Find the contrast between two cell labels.
    pub fn find(&self, a: &str, b: &str) -> Option<&Contrast> {
        self.contrasts.iter().find(|c| c.compares(a, b))
    }
}

/// All level combinations, first variable varying fastest.
fn level_combinations(factors: &[&FactorSpec]) -> Vec<Vec<String>> {
    let mut combos: Vec<Vec<String>> = vec![Vec::new()];
    for factor in factors {
        let mut next = Vec::with_capacity(combos.len() * factor.levels.len());
        for level in &factor.levels {
            for combo in &combos {
                let mut c = combo.clone();
                c.push(level.clone());
                next.push(c);
            }
        }
        combos = next;
    }
    combos
}

/// Marginal means and pairwise contrasts for `spec.marginal_vars`.
pub fn post_hoc(fit: &GlmmFit, spec: &PostHocSpec) -> Result<PostHoc> {
    if spec.marginal_vars.is_empty() {
        return Err(AnalysisError::InvalidParameter(
            "Post-hoc needs at least one marginal variable".to_string(),
        ));
    }
    if let Some(v) = spec.by.iter().find(|v| spec.marginal_vars.contains(v)) {
        return Err(AnalysisError::InvalidParameter(format!(
            "'{}' cannot be both a marginal and a by variable",
            v
        )));
    }

    let design = &fit.design;
    let factor = |name: &String| {
        design.factor(name).ok_or_else(|| {
            AnalysisError::InvalidParameter(format!(
                "'{}' is not a factor of model '{}'",
                name, fit.formula
            ))
        })
    };
    let marginal: Vec<&FactorSpec> = spec.marginal_vars.iter().map(factor).collect::<Result<_>>()?;
    let by: Vec<&FactorSpec> = spec.by.iter().map(factor).collect::<Result<_>>()?;

    // Reference grid
    let factors = design.factors();
    let grid: Vec<(Vec<String>, DVector<f64>)> = level_combinations(&factors)
        .into_iter()
        .map(|levels| {
            let assignment: HashMap<String, String> = factors
                .iter()
                .map(|f| f.name.clone())
                .zip(levels.iter().cloned())
                .collect();
            let row = design.row_for(&assignment)?;
            Ok((levels, DVector::from_vec(row)))
        })
        .collect::<Result<_>>()?;

    let position = |name: &str| factors.iter().position(|f| f.name == name);
    let cell_vars: Vec<&FactorSpec> = marginal.iter().chain(by.iter()).copied().collect();
    let cell_positions: Vec<usize> = cell_vars
        .iter()
        .filter_map(|f| position(&f.name))
        .collect();

    let beta = DVector::from_column_slice(&fit.coefficients);
    let variance = |l: &DVector<f64>| (l.transpose() * &fit.covariance * l)[(0, 0)];

    let df = fit.is_linear().then(|| fit.df_residual());
    let quantile = match df {
        Some(df) => StudentsT::new(0.0, 1.0, df as f64)
            .map_err(|e| AnalysisError::Numerical(e.to_string()))?
            .inverse_cdf(0.975),
        None => Normal::new(0.0, 1.0)
            .map_err(|e| AnalysisError::Numerical(e.to_string()))?
            .inverse_cdf(0.975),
    };

    let n_marginal = marginal.len();
    let mut means = Vec::new();
    let mut weights: Vec<DVector<f64>> = Vec::new();
    for cell in level_combinations(&cell_vars) {
        let members: Vec<&DVector<f64>> = grid
            .iter()
            .filter(|(levels, _)| {
                cell_positions
                    .iter()
                    .zip(&cell)
                    .all(|(&pos, level)| &levels[pos] == level)
            })
            .map(|(_, row)| row)
            .collect();
        let mut l = DVector::zeros(beta.len());
        for row in &members {
            l += *row;
        }
        l /= members.len().max(1) as f64;

        let estimate = l.dot(&beta);
        let std_error = variance(&l).max(0.0).sqrt();
        means.push(MarginalMean {
            levels: cell[..n_marginal].to_vec(),
            by: cell[n_marginal..].to_vec(),
            estimate,
            std_error,
            lower: estimate - quantile * std_error,
            upper: estimate + quantile * std_error,
            response: fit.link.linkinv(estimate),
        });
        weights.push(l);
    }

    let mut contrasts = Vec::new();
    for by_levels in level_combinations(&by) {
        let in_group: Vec<usize> = (0..means.len())
            .filter(|&i| means[i].by == by_levels)
            .collect();

        let mut family = Vec::new();
        for (a, &i) in in_group.iter().enumerate() {
            for &j in &in_group[a + 1..] {
                let l = &weights[i] - &weights[j];
                let estimate = l.dot(&beta);
                let std_error = variance(&l).max(0.0).sqrt();
                let statistic = if std_error > 0.0 {
                    estimate / std_error
                } else {
                    f64::NAN
                };
                let first = means[i].label();
                let second = means[j].label();
                family.push(Contrast {
                    contrast: format!("{} - {}", first, second),
                    first,
                    second,
                    by: by_levels.clone(),
                    estimate,
                    std_error,
                    statistic,
                    p_value: fit.wald_p_value(statistic)?,
                    p_adjusted: f64::NAN,
                });
            }
        }

        let raw: Vec<f64> = family.iter().map(|c| c.p_value).collect();
        for (c, p) in family.iter_mut().zip(spec.adjust.apply(&raw)) {
            c.p_adjusted = p;
        }
        contrasts.extend(family);
    }

    Ok(PostHoc {
        marginal_vars: spec.marginal_vars.clone(),
        by: spec.by.clone(),
        adjust: spec.adjust,
        df,
        means,
        contrasts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Coding, TrialTable, Value};
    use crate::model::{fit_glmm, Family, GlmmSpec};
    use approx::assert_relative_eq;

    /// 6 subjects × Attention × Region × 3 trials.
    /// Unattended adds 20 ms; Vertex adds 40 ms only when unattended.
    fn create_table() -> TrialTable {
        let mut cols: [Vec<Value>; 4] = Default::default();
        let noise = [3.0, -2.0, -1.0];
        for s in 0..6 {
            for (a, att) in ["Attended", "Unattended"].iter().enumerate() {
                for (r, reg) in ["FEF", "Vertex"].iter().enumerate() {
                    for k in 0..3 {
                        let rt = 400.0
                            + 20.0 * a as f64
                            + 40.0 * (a * r) as f64
                            + 6.0 * s as f64
                            + noise[(k + s) % 3];
                        cols[0].push(Value::Text(format!("S{}", s)));
                        cols[1].push(Value::Text(att.to_string()));
                        cols[2].push(Value::Text(reg.to_string()));
                        cols[3].push(Value::Number(rt));
                    }
                }
            }
        }
        let [subject, attention, region, rt] = cols;
        TrialTable::from_columns(vec![
            ("Subject".to_string(), subject),
            ("Attention".to_string(), attention),
            ("Region".to_string(), region),
            ("Target.RT".to_string(), rt),
        ])
        .unwrap()
    }

    fn fit(coding: Coding) -> GlmmFit {
        let spec = GlmmSpec::new("Target.RT ~ Attention*Region + (1|Subject)", Family::Gaussian)
            .with_factors(vec![
                FactorSpec::new("Attention", &["Attended", "Unattended"]),
                FactorSpec::new("Region", &["FEF", "Vertex"]),
            ])
            .with_coding(coding);
        fit_glmm(&create_table(), &spec).unwrap()
    }

    #[test]
    fn test_two_level_factor_single_contrast() {
        let fit = fit(Coding::Treatment);
        let ph = post_hoc(&fit, &PostHocSpec::new(&["Region"])).unwrap();

        assert_eq!(ph.means.len(), 2);
        assert_eq!(ph.contrasts.len(), 1);
        let c = &ph.contrasts[0];
        assert_eq!(c.contrast, "FEF - Vertex");
        assert_relative_eq!(
            c.estimate,
            ph.means[0].estimate - ph.means[1].estimate,
            epsilon = 1e-9
        );
        // Averaged over attention: Vertex is 20 ms slower.
        assert_relative_eq!(c.estimate, -20.0, epsilon = 1e-6);
        // One contrast: Bonferroni leaves the p-value unchanged.
        assert_relative_eq!(c.p_adjusted, c.p_value);
    }

    #[test]
    fn test_marginal_means_match_cell_averages() {
        let fit = fit(Coding::Treatment);
        let ph = post_hoc(&fit, &PostHocSpec::new(&["Attention"])).unwrap();

        // Attended: 400 + mean subject offset 15; Unattended: +20 +20.
        assert_relative_eq!(ph.means[0].estimate, 415.0, epsilon = 1e-6);
        assert_relative_eq!(ph.means[1].estimate, 455.0, epsilon = 1e-6);
        assert!(ph.means[0].lower < 415.0 && ph.means[0].upper > 415.0);
        assert_eq!(ph.df, Some(72 - 4));
        assert_eq!(ph.means[0].response, ph.means[0].estimate);
    }

    #[test]
    fn test_coding_does_not_change_marginal_means() {
        let treatment = post_hoc(&fit(Coding::Treatment), &PostHocSpec::new(&["Region"])).unwrap();
        let polynomial = post_hoc(&fit(Coding::Polynomial), &PostHocSpec::new(&["Region"])).unwrap();
        for (a, b) in treatment.means.iter().zip(&polynomial.means) {
            assert_relative_eq!(a.estimate, b.estimate, epsilon = 1e-6);
            assert_relative_eq!(a.std_error, b.std_error, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_two_variable_cells_bonferroni() {
        let fit = fit(Coding::Treatment);
        let ph = post_hoc(&fit, &PostHocSpec::new(&["Attention", "Region"])).unwrap();

        assert_eq!(ph.means.len(), 4);
        assert_eq!(ph.means[1].label(), "Unattended FEF");
        assert_eq!(ph.contrasts.len(), 6);
        for c in &ph.contrasts {
            assert_relative_eq!(c.p_adjusted, (c.p_value * 6.0).min(1.0), epsilon = 1e-12);
        }
        let c = ph.find("Unattended Vertex", "Unattended FEF").unwrap();
        assert_relative_eq!(c.estimate.abs(), 40.0, epsilon = 1e-6);
    }

    #[test]
    fn test_by_groups_adjust_separately() {
        let fit = fit(Coding::Treatment);
        let spec = PostHocSpec::new(&["Region"]).by(&["Attention"]);
        let ph = post_hoc(&fit, &spec).unwrap();

        assert_eq!(ph.contrasts.len(), 2);
        assert_eq!(ph.contrasts[0].by, vec!["Attended"]);
        assert_relative_eq!(ph.contrasts[0].estimate, 0.0, epsilon = 1e-6);
        assert_relative_eq!(ph.contrasts[1].estimate, -40.0, epsilon = 1e-6);
        for c in &ph.contrasts {
            assert_relative_eq!(c.p_adjusted, c.p_value);
        }
    }

    #[test]
    fn test_unknown_variable() {
        let fit = fit(Coding::Treatment);
        assert!(post_hoc(&fit, &PostHocSpec::new(&["Task"])).is_err());
        assert!(post_hoc(&fit, &PostHocSpec::new(&[])).is_err());
        let overlap = PostHocSpec::new(&["Region"]).by(&["Region"]);
        assert!(post_hoc(&fit, &overlap).is_err());
    }

    #[test]
    fn test_level_combinations_order() {
        let a = FactorSpec::new("A", &["a1", "a2"]);
        let b = FactorSpec::new("B", &["b1", "b2"]);
        let combos = level_combinations(&[&a, &b]);
        assert_eq!(combos[0], vec!["a1", "b1"]);
        assert_eq!(combos[1], vec!["a2", "b1"]);
        assert_eq!(combos[3], vec!["a2", "b2"]);
        assert_eq!(level_combinations(&[]), vec![Vec::<String>::new()]);
    }
}
