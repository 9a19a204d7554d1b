//! Response distributions and link functions for generalized mixed models.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::{PI, SQRT_2};

/// Smallest mean/derivative magnitude used to keep weights finite.
const EPS: f64 = 1e-10;

/// Response distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Gaussian,
    Binomial,
    Poisson,
    Gamma,
    InverseGaussian,
}

/// Link between the linear predictor and the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Identity,
    Log,
    Logit,
    Probit,
    Inverse,
    /// η = 1/μ².
    InverseSquared,
}

impl Family {
    /// Canonical link of the family.
    pub fn default_link(&self) -> Link {
        match self {
            Family::Gaussian => Link::Identity,
            Family::Binomial => Link::Logit,
            Family::Poisson => Link::Log,
            Family::Gamma => Link::Inverse,
            Family::InverseGaussian => Link::InverseSquared,
        }
    }

    /// Variance function V(μ).
    pub fn variance(&self, mu: f64) -> f64 {
        match self {
            Family::Gaussian => 1.0,
            Family::Binomial => (mu * (1.0 - mu)).max(EPS),
            Family::Poisson => mu.max(EPS),
            Family::Gamma => (mu * mu).max(EPS),
            Family::InverseGaussian => (mu * mu * mu).max(EPS),
        }
    }

    /// Whether the dispersion is fixed at 1.
    pub fn fixed_dispersion(&self) -> bool {
        matches!(self, Family::Binomial | Family::Poisson)
    }

    /// Starting means for iterative fitting.
    pub fn initial_mu(&self, y: f64) -> f64 {
        match self {
            Family::Binomial => (y + 0.5) / 2.0,
            Family::Poisson => y + 0.1,
            _ => y,
        }
    }

    /// Check that every response value lies in the family's support.
    pub fn validate(&self, response: &str, y: &[f64]) -> Result<()> {
        let bad = |value: f64, reason: &str| AnalysisError::InvalidValue {
            column: response.to_string(),
            value: value.to_string(),
            reason: format!("{} ({})", reason, self.name()),
        };
        for &v in y {
            if !v.is_finite() {
                return Err(bad(v, "response must be finite"));
            }
            match self {
                Family::Gaussian => {}
                Family::Binomial if !(0.0..=1.0).contains(&v) => {
                    return Err(bad(v, "response must lie in [0, 1]"));
                }
                Family::Poisson if v < 0.0 => {
                    return Err(bad(v, "response must be non-negative"));
                }
                Family::Gamma | Family::InverseGaussian if v <= 0.0 => {
                    return Err(bad(v, "response must be positive"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Family::Gaussian => "gaussian",
            Family::Binomial => "binomial",
            Family::Poisson => "poisson",
            Family::Gamma => "gamma",
            Family::InverseGaussian => "inverse_gaussian",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Link {
    /// η = g(μ).
    pub fn link(&self, mu: f64) -> f64 {
        match self {
            Link::Identity => mu,
            Link::Log => mu.max(EPS).ln(),
            Link::Logit => {
                let m = mu.clamp(EPS, 1.0 - EPS);
                (m / (1.0 - m)).ln()
            }
            Link::Probit => -SQRT_2 * erfc_inv(2.0 * mu.clamp(EPS, 1.0 - EPS)),
            Link::Inverse => 1.0 / mu.max(EPS),
            Link::InverseSquared => 1.0 / (mu * mu).max(EPS),
        }
    }

    /// μ = g⁻¹(η).
    pub fn linkinv(&self, eta: f64) -> f64 {
        match self {
            Link::Identity => eta,
            Link::Log => eta.exp().max(EPS),
            Link::Logit => (1.0 / (1.0 + (-eta).exp())).clamp(EPS, 1.0 - EPS),
            Link::Probit => (0.5 * erfc(-eta / SQRT_2)).clamp(EPS, 1.0 - EPS),
            Link::Inverse => 1.0 / eta.max(EPS),
            Link::InverseSquared => 1.0 / eta.max(EPS).sqrt(),
        }
    }

    /// dμ/dη at η.
    pub fn mu_eta(&self, eta: f64) -> f64 {
        let d = match self {
            Link::Identity => 1.0,
            Link::Log => eta.exp(),
            Link::Logit => {
                let e = (-eta.abs()).exp();
                e / ((1.0 + e) * (1.0 + e))
            }
            Link::Probit => (-0.5 * eta * eta).exp() / (2.0 * PI).sqrt(),
            Link::Inverse => -1.0 / (eta * eta).max(EPS),
            Link::InverseSquared => -0.5 / eta.max(EPS).powf(1.5),
        };
        if d.abs() < EPS {
            EPS.copysign(d)
        } else {
            d
        }
    }

    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Link::Identity => "identity",
            Link::Log => "log",
            Link::Logit => "logit",
            Link::Probit => "probit",
            Link::Inverse => "inverse",
            Link::InverseSquared => "1/mu^2",
        }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
