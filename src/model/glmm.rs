//! Generalized linear mixed models with a per-subject random intercept.
//!
//! Gaussian models with the identity link are fitted directly by REML.
//! Every other family is fitted by penalized quasi-likelihood: each outer
//! iteration forms the IRLS working response and weights from the current
//! linear predictor and refits a weighted LMM, until the fixed effects
//! settle.
//!
//! # Example
//! ```ignore
//! use awareness_analysis::model::{fit_glmm, Family, GlmmSpec};
//!
//! let spec = GlmmSpec::new("Target.ACC ~ Region*Task + (1|Subject)", Family::Binomial);
//! let fit = fit_glmm(&trials, &spec)?;
//! for test in fit.coefficient_tests()? {
//!     println!("{} {:.3} {:.3}", test.name, test.estimate, test.p_value);
//! }
//! ```

use crate::data::{Coding, DesignMatrix, FactorSpec, GroupingFactor, MixedFormula, TrialTable};
use crate::error::{AnalysisError, Result};
use crate::model::family::{Family, Link};
use crate::model::lmm::{fit_weighted_lmm, Dispersion, LmmConfig, LmmSolution};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use tracing::{debug, info, warn};

fn default_max_iter() -> usize {
    50
}

fn default_tol() -> f64 {
    1e-6
}

/// Model specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlmmSpec {
    /// Mixed formula, e.g. `Target.RT ~ Attention*Region + (1|Subject)`.
    pub formula: String,
    /// Response distribution.
    pub family: Family,
    /// Link override; the family's canonical link when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
    /// Declared factor levels (first level is the reference).
    #[serde(default)]
    pub factors: Vec<FactorSpec>,
    /// Contrast coding for factors.
    #[serde(default)]
    pub coding: Coding,
    /// Maximum outer (PQL) iterations.
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Relative change of the fixed effects that ends the outer loop.
    #[serde(default = "default_tol")]
    pub tol: f64,
}

impl GlmmSpec {
    pub fn new(formula: &str, family: Family) -> Self {
        Self {
            formula: formula.to_string(),
            family,
            link: None,
            factors: Vec::new(),
            coding: Coding::default(),
            max_iter: default_max_iter(),
            tol: default_tol(),
        }
    }

    /// Builder: declare factor levels.
    pub fn with_factors(mut self, factors: Vec<FactorSpec>) -> Self {
        self.factors = factors;
        self
    }

    /// Builder: set the contrast coding.
    pub fn with_coding(mut self, coding: Coding) -> Self {
        self.coding = coding;
        self
    }

    /// Builder: override the link.
    pub fn with_link(mut self, link: Link) -> Self {
        self.link = Some(link);
        self
    }

    /// Link in effect.
    pub fn link(&self) -> Link {
        self.link.unwrap_or_else(|| self.family.default_link())
    }
}

/// A fitted mixed model.
#[derive(Debug, Clone)]
pub struct GlmmFit {
    /// Formula as given.
    pub formula: String,
    /// Response column.
    pub response: String,
    pub family: Family,
    pub link: Link,
    /// Fixed effects design (kept for reference grids and term tests).
    pub design: DesignMatrix,
    /// Fixed effect estimates (link scale).
    pub coefficients: Vec<f64>,
    /// Standard errors of the fixed effects.
    pub std_errors: Vec<f64>,
    /// Covariance of the fixed effects.
    pub covariance: DMatrix<f64>,
    /// Random intercept variance τ².
    pub tau2: f64,
    /// Residual dispersion φ (1 for binomial and Poisson).
    pub dispersion: f64,
    /// Grouping column of the random intercept.
    pub grouping: String,
    /// Predicted random intercept per group.
    pub random_effects: Vec<(String, f64)>,
    /// Number of trials.
    pub n_obs: usize,
    /// Number of groups.
    pub n_groups: usize,
    /// Outer iterations used.
    pub iterations: usize,
    /// Whether fitting converged.
    pub converged: bool,
    /// Whether the random intercept variance collapsed to zero.
    pub singular: bool,
    /// REML criterion of the final (working) LMM.
    pub reml_criterion: f64,
}

impl GlmmFit {
    /// Coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        self.design.coefficient_names()
    }

    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.design.coefficient_index(name)
    }

    /// Residual degrees of freedom n − p.
    pub fn df_residual(&self) -> usize {
        self.n_obs - self.coefficients.len()
    }

    /// Whether tests use t/F reference distributions (Gaussian identity models).
    pub fn is_linear(&self) -> bool {
        self.family == Family::Gaussian && self.link == Link::Identity
    }

    /// Intraclass correlation on the working scale.
    pub fn icc(&self) -> f64 {
        self.tau2 / (self.tau2 + self.dispersion)
    }

    /// Two-sided p-value of a Wald statistic: t(n − p) for linear models,
    /// standard normal otherwise.
    pub fn wald_p_value(&self, statistic: f64) -> Result<f64> {
        if !statistic.is_finite() {
            return Ok(f64::NAN);
        }
        let upper = if self.is_linear() {
            let t = StudentsT::new(0.0, 1.0, self.df_residual() as f64)
                .map_err(|e| AnalysisError::Numerical(e.to_string()))?;
            1.0 - t.cdf(statistic.abs())
        } else {
            let z = Normal::new(0.0, 1.0).map_err(|e| AnalysisError::Numerical(e.to_string()))?;
            1.0 - z.cdf(statistic.abs())
        };
        Ok((2.0 * upper).min(1.0))
    }

    /// Per-coefficient Wald tests.
    pub fn coefficient_tests(&self) -> Result<Vec<CoefficientTest>> {
        self.coefficient_names()
            .iter()
            .zip(self.coefficients.iter().zip(&self.std_errors))
            .map(|(name, (&estimate, &std_error))| {
                let statistic = if std_error > 0.0 {
                    estimate / std_error
                } else {
                    f64::NAN
                };
                Ok(CoefficientTest {
                    name: name.clone(),
                    estimate,
                    std_error,
                    statistic,
                    p_value: self.wald_p_value(statistic)?,
                })
            })
            .collect()
    }
}

/// Wald test of a single coefficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoefficientTest {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    /// z (or t for linear models).
    pub statistic: f64,
    pub p_value: f64,
}

/// Fit a mixed model to trial-level data.
pub fn fit_glmm(table: &TrialTable, spec: &GlmmSpec) -> Result<GlmmFit> {
    let formula = MixedFormula::parse(&spec.formula)?;
    let response = formula
        .response()
        .ok_or_else(|| {
            AnalysisError::FormulaParse(format!("Formula '{}' has no response", spec.formula))
        })?
        .to_string();

    let random_effect = match formula.random.as_slice() {
        [] => {
            return Err(AnalysisError::InvalidParameter(format!(
                "Formula '{}' needs a random intercept, e.g. (1 | Subject)",
                spec.formula
            )))
        }
        [single] => single,
        _ => {
            return Err(AnalysisError::UnsupportedStructure(
                "Only a single random intercept is supported".to_string(),
            ))
        }
    };

    let groups = GroupingFactor::from_random_effect(table, random_effect)?;
    let design = DesignMatrix::from_formula(table, &formula.fixed, &spec.factors, spec.coding)?;
    design.check_estimable()?;

    let y = table.numeric_column(&response)?;
    spec.family.validate(&response, &y)?;

    let n = design.n_obs();
    let p = design.n_coefficients();
    if n <= p {
        return Err(AnalysisError::Numerical(format!(
            "{} trials are too few for {} fixed effects",
            n, p
        )));
    }

    let link = spec.link();
    info!(
        formula = %spec.formula,
        family = %spec.family,
        link = %link,
        n_obs = n,
        n_groups = groups.n_groups,
        n_coefficients = p,
        "fitting mixed model"
    );

    let lmm_config = LmmConfig::default();
    let (solution, iterations, converged) = if spec.family == Family::Gaussian && link == Link::Identity {
        let weights = vec![1.0; n];
        let solution = fit_weighted_lmm(
            design.matrix(),
            &y,
            &weights,
            &groups,
            Dispersion::Estimated,
            &lmm_config,
        )?;
        let converged = solution.converged;
        (solution, 1, converged)
    } else {
        fit_pql(&design, &y, &groups, spec, link, &lmm_config)?
    };

    if !converged {
        warn!(
            formula = %spec.formula,
            iterations,
            "mixed model did not converge"
        );
    }
    if solution.singular {
        warn!(
            formula = %spec.formula,
            "random intercept variance is zero (singular fit)"
        );
    }

    let random_effects = groups
        .group_ids
        .iter()
        .cloned()
        .zip(solution.random_effects.iter().copied())
        .collect();

    Ok(GlmmFit {
        formula: spec.formula.clone(),
        response,
        family: spec.family,
        link,
        std_errors: solution.std_errors(),
        coefficients: solution.beta.iter().copied().collect(),
        covariance: solution.covariance,
        tau2: solution.tau2,
        dispersion: solution.dispersion,
        grouping: groups.column.clone(),
        random_effects,
        n_obs: n,
        n_groups: groups.n_groups,
        iterations,
        converged,
        singular: solution.singular,
        reml_criterion: solution.reml_criterion,
        design,
    })
}

/// Penalized quasi-likelihood outer loop.
fn fit_pql(
    design: &DesignMatrix,
    y: &[f64],
    groups: &GroupingFactor,
    spec: &GlmmSpec,
    link: Link,
    lmm_config: &LmmConfig,
) -> Result<(LmmSolution, usize, bool)> {
    let family = spec.family;
    let x = design.matrix();
    let n = y.len();
    let dispersion = if family.fixed_dispersion() {
        Dispersion::Fixed(1.0)
    } else {
        Dispersion::Estimated
    };

    let mut eta: Vec<f64> = y.iter().map(|&v| link.link(family.initial_mu(v))).collect();
    let mut beta_old: Option<DVector<f64>> = None;
    let mut last: Option<LmmSolution> = None;

    for iter in 0..spec.max_iter.max(1) {
        let mut working = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        for i in 0..n {
            let mu = link.linkinv(eta[i]);
            let d = link.mu_eta(eta[i]);
            working.push(eta[i] + (y[i] - mu) / d);
            weights.push(d * d / family.variance(mu));
        }

        let solution = fit_weighted_lmm(x, &working, &weights, groups, dispersion, lmm_config)?;

        let fixed = x * &solution.beta;
        eta = (0..n)
            .map(|i| fixed[i] + solution.random_effects[groups.group_indices[i]])
            .collect();

        let change = beta_old.as_ref().map(|old| {
            let scale = old.norm().max(f64::MIN_POSITIVE);
            (&solution.beta - old).norm() / scale
        });
        debug!(iteration = iter + 1, ?change, tau2 = solution.tau2, "PQL step");

        if matches!(change, Some(c) if c < spec.tol) {
            return Ok((solution, iter + 1, true));
        }
        beta_old = Some(solution.beta.clone());
        last = Some(solution);
    }

    let solution = last.ok_or_else(|| {
        AnalysisError::Numerical("PQL produced no iterations".to_string())
    })?;
    Ok((solution, spec.max_iter.max(1), false))
}
