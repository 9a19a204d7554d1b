//! Weighted linear mixed model with a single random intercept.
//!
//! Fits `z = Xβ + b[group] + ε` with `b ~ N(0, τ²)` and
//! `ε_i ~ N(0, φ / w_i)` by REML. The per-trial weights make this the inner
//! step of penalized quasi-likelihood; with unit weights it is an ordinary
//! Gaussian LMM.
//!
//! With one random intercept the marginal covariance is block diagonal,
//! `V_j = φ (W_j⁻¹ + γ 11ᵀ)` with `γ = τ²/φ`, and each block inverts in closed
//! form (Woodbury):
//!
//! `H_j⁻¹ = W_j − c_j w_j w_jᵀ`, `c_j = γ / (1 + γ s_j)`, `s_j = Σ w_j`.
//!
//! Everything the criterion needs is therefore a function of per-group sums,
//! and no n × n matrix is ever formed. The variance ratio γ is found by a
//! coarse scan over log γ followed by golden-section refinement.

use crate::data::GroupingFactor;
use crate::error::{AnalysisError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Relative size below which a Cholesky pivot marks a rank-deficient design.
const PIVOT_TOL: f64 = 1e-7;

/// Golden ratio conjugate.
const INV_PHI: f64 = 0.618_033_988_749_894_8;

/// Configuration for REML estimation of the variance ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmmConfig {
    /// Maximum golden-section iterations.
    pub max_iter: usize,
    /// Convergence tolerance on log γ.
    pub tol: f64,
    /// Lower bound of log(γ / γ₀), where γ₀ = 1 / mean weight.
    pub log_ratio_lower: f64,
    /// Upper bound of log(γ / γ₀).
    pub log_ratio_upper: f64,
    /// Number of points in the initial scan.
    pub grid_points: usize,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-6,
            log_ratio_lower: -15.0,
            log_ratio_upper: 10.0,
            grid_points: 51,
        }
    }
}

/// How the residual dispersion φ is treated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispersion {
    /// Profiled out of the REML criterion.
    Estimated,
    /// Held at a known value.
    Fixed(f64),
}

/// Result of a weighted LMM fit.
#[derive(Debug, Clone)]
pub struct LmmSolution {
    /// Fixed effects.
    pub beta: DVector<f64>,
    /// Covariance of the fixed effects, φ (XᵀV⁻¹X)⁻¹ with V scaled by φ.
    pub covariance: DMatrix<f64>,
    /// Random intercept variance τ².
    pub tau2: f64,
    /// Residual dispersion φ.
    pub dispersion: f64,
    /// Predicted random intercept per group (BLUP).
    pub random_effects: Vec<f64>,
    /// REML criterion (−2 × restricted log-likelihood, up to a constant).
    pub reml_criterion: f64,
    /// Golden-section iterations used.
    pub iterations: usize,
    /// Whether the variance ratio search converged.
    pub converged: bool,
    /// Whether τ² sits at the lower bound.
    pub singular: bool,
}

impl LmmSolution {
    /// Intraclass correlation τ² / (τ² + φ).
    pub fn icc(&self) -> f64 {
        self.tau2 / (self.tau2 + self.dispersion)
    }

    /// Standard errors of the fixed effects.
    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.beta.len())
            .map(|j| self.covariance[(j, j)].max(0.0).sqrt())
            .collect()
    }
}

/// Weighted sums of one group.
struct GroupBlock {
    /// Xⱼᵀ Wⱼ Xⱼ
    gram: DMatrix<f64>,
    /// Xⱼᵀ wⱼ
    xw: DVector<f64>,
    /// Xⱼᵀ Wⱼ zⱼ
    xwz: DVector<f64>,
    /// Σ w
    sw: f64,
    /// Σ w z
    swz: f64,
    /// Σ w z²
    swzz: f64,
    /// Σ log w
    slogw: f64,
}

impl GroupBlock {
    fn new(x: &DMatrix<f64>, z: &[f64], w: &[f64], rows: &[usize]) -> Self {
        let p = x.ncols();
        let mut block = Self {
            gram: DMatrix::zeros(p, p),
            xw: DVector::zeros(p),
            xwz: DVector::zeros(p),
            sw: 0.0,
            swz: 0.0,
            swzz: 0.0,
            slogw: 0.0,
        };
        for &i in rows {
            let wi = w[i];
            let zi = z[i];
            for a in 0..p {
                let xa = x[(i, a)];
                if xa == 0.0 {
                    continue;
                }
                block.xw[a] += wi * xa;
                block.xwz[a] += wi * xa * zi;
                for b in a..p {
                    block.gram[(a, b)] += wi * xa * x[(i, b)];
                }
            }
            block.sw += wi;
            block.swz += wi * zi;
            block.swzz += wi * zi * zi;
            block.slogw += wi.ln();
        }
        for a in 0..p {
            for b in 0..a {
                block.gram[(a, b)] = block.gram[(b, a)];
            }
        }
        block
    }
}

/// Criterion evaluation at a fixed variance ratio.
struct Evaluation {
    beta: DVector<f64>,
    a_inv: DMatrix<f64>,
    quad_form: f64,
    criterion: f64,
}

struct Problem<'a> {
    blocks: Vec<GroupBlock>,
    n: usize,
    p: usize,
    dispersion: Dispersion,
    groups: &'a GroupingFactor,
}

impl Problem<'_> {
    fn evaluate(&self, gamma: f64) -> Option<Evaluation> {
        let p = self.p;
        let mut a = DMatrix::zeros(p, p);
        let mut rhs = DVector::zeros(p);
        let mut log_det_h = 0.0;

        for block in &self.blocks {
            let c = gamma / (1.0 + gamma * block.sw);
            a += &block.gram - (&block.xw * block.xw.transpose()) * c;
            rhs += &block.xwz - &block.xw * (c * block.swz);
            log_det_h += -block.slogw + (1.0 + gamma * block.sw).ln();
        }

        let chol = a.cholesky()?;
        let pivots = chol.l().diagonal();
        let max_pivot = pivots.iter().cloned().fold(0.0, f64::max);
        if pivots.iter().any(|d| *d <= max_pivot * PIVOT_TOL) {
            return None;
        }
        let beta = chol.solve(&rhs);
        let log_det_a = 2.0 * pivots.iter().map(|d| d.ln()).sum::<f64>();

        let mut quad_form = 0.0;
        for block in &self.blocks {
            let c = gamma / (1.0 + gamma * block.sw);
            let swr = block.swz - block.xw.dot(&beta);
            let swrr = block.swzz - 2.0 * beta.dot(&block.xwz) + beta.dot(&(&block.gram * &beta));
            quad_form += swrr - c * swr * swr;
        }
        let quad_form = quad_form.max(0.0);

        let df = (self.n - p) as f64;
        let criterion = match self.dispersion {
            Dispersion::Estimated => {
                df * (quad_form / df).max(f64::MIN_POSITIVE).ln() + log_det_h + log_det_a + df
            }
            Dispersion::Fixed(phi) => {
                df * phi.ln() + log_det_h + log_det_a + quad_form / phi
            }
        };
        if !criterion.is_finite() {
            return None;
        }

        Some(Evaluation {
            beta,
            a_inv: chol.inverse(),
            quad_form,
            criterion,
        })
    }

    fn criterion(&self, gamma: f64) -> f64 {
        self.evaluate(gamma)
            .map(|e| e.criterion)
            .unwrap_or(f64::INFINITY)
    }
}

/// Fit a weighted random-intercept LMM by REML.
///
/// # Arguments
/// * `x` - Fixed effects design (n × p)
/// * `z` - Response (or working response)
/// * `weights` - Positive per-trial weights
/// * `groups` - Random intercept grouping
/// * `dispersion` - Whether φ is estimated or known
/// * `config` - Variance ratio search settings
pub fn fit_weighted_lmm(
    x: &DMatrix<f64>,
    z: &[f64],
    weights: &[f64],
    groups: &GroupingFactor,
    dispersion: Dispersion,
    config: &LmmConfig,
) -> Result<LmmSolution> {
    let n = x.nrows();
    let p = x.ncols();

    if z.len() != n || weights.len() != n || groups.n_obs() != n {
        return Err(AnalysisError::InvalidParameter(format!(
            "Dimension mismatch: design has {} rows, response {}, weights {}, groups {}",
            n,
            z.len(),
            weights.len(),
            groups.n_obs()
        )));
    }
    if n <= p {
        return Err(AnalysisError::Numerical(format!(
            "Model is saturated: {} observations for {} fixed effects",
            n, p
        )));
    }
    if weights.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
        return Err(AnalysisError::Numerical(
            "Weights must be positive and finite".to_string(),
        ));
    }

    let blocks: Vec<GroupBlock> = groups
        .members()
        .iter()
        .map(|rows| GroupBlock::new(x, z, weights, rows))
        .collect();

    let problem = Problem {
        blocks,
        n,
        p,
        dispersion,
        groups,
    };

    if problem.evaluate(0.0).is_none() {
        return Err(AnalysisError::Numerical(
            "Fixed effects design is rank deficient".to_string(),
        ));
    }

    // γ is searched on a log scale relative to the typical residual variance.
    let gamma0 = n as f64 / weights.iter().sum::<f64>();
    let to_gamma = |t: f64| gamma0 * t.exp();
    let (lower, upper) = (config.log_ratio_lower, config.log_ratio_upper);

    let n_grid = config.grid_points.max(3);
    let step = (upper - lower) / (n_grid - 1) as f64;
    let mut best_t = lower;
    let mut best_value = f64::INFINITY;
    for k in 0..n_grid {
        let t = lower + step * k as f64;
        let value = problem.criterion(to_gamma(t));
        if value < best_value {
            best_value = value;
            best_t = t;
        }
    }

    let mut lo = (best_t - step).max(lower);
    let mut hi = (best_t + step).min(upper);
    let mut t1 = hi - INV_PHI * (hi - lo);
    let mut t2 = lo + INV_PHI * (hi - lo);
    let mut f1 = problem.criterion(to_gamma(t1));
    let mut f2 = problem.criterion(to_gamma(t2));
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..config.max_iter {
        iterations = iter + 1;
        if hi - lo < config.tol {
            converged = true;
            break;
        }
        if f1 <= f2 {
            hi = t2;
            t2 = t1;
            f2 = f1;
            t1 = hi - INV_PHI * (hi - lo);
            f1 = problem.criterion(to_gamma(t1));
        } else {
            lo = t1;
            t1 = t2;
            f1 = f2;
            t2 = lo + INV_PHI * (hi - lo);
            f2 = problem.criterion(to_gamma(t2));
        }
    }

    let mut t_hat = 0.5 * (lo + hi);
    if best_value < problem.criterion(to_gamma(t_hat)) {
        t_hat = best_t;
    }
    let singular = best_t <= lower;
    let gamma = if singular { 0.0 } else { to_gamma(t_hat) };

    let eval = problem.evaluate(gamma).ok_or_else(|| {
        AnalysisError::Numerical("REML criterion could not be evaluated".to_string())
    })?;

    let phi = match dispersion {
        Dispersion::Estimated => eval.quad_form / (n - p) as f64,
        Dispersion::Fixed(phi) => phi,
    };

    let random_effects = problem
        .blocks
        .iter()
        .map(|block| {
            let swr = block.swz - block.xw.dot(&eval.beta);
            gamma * swr / (1.0 + gamma * block.sw)
        })
        .collect();

    debug!(
        n,
        p,
        n_groups = problem.groups.n_groups,
        gamma,
        phi,
        iterations,
        criterion = eval.criterion,
        "weighted REML fit"
    );

    Ok(LmmSolution {
        covariance: &eval.a_inv * phi,
        beta: eval.beta,
        tau2: gamma * phi,
        dispersion: phi,
        random_effects,
        reml_criterion: eval.criterion,
        iterations,
        converged,
        singular,
    })
}
