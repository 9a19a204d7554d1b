//! Multiple testing correction.

pub mod bh;
pub mod bonferroni;

pub use bh::correct_bh;
pub use bonferroni::{correct_bonferroni, correct_holm};

use serde::{Deserialize, Serialize};

/// P-value adjustment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PAdjust {
    /// Multiply by the number of tests, capped at 1.
    #[default]
    Bonferroni,
    /// Holm step-down.
    Holm,
    /// Benjamini-Hochberg false discovery rate.
    #[serde(alias = "bh", alias = "fdr")]
    BenjaminiHochberg,
    /// No adjustment.
    None,
}

impl PAdjust {
    /// Adjust a family of p-values, preserving order.
    pub fn apply(&self, p_values: &[f64]) -> Vec<f64> {
        match self {
            PAdjust::Bonferroni => correct_bonferroni(p_values),
            PAdjust::Holm => correct_holm(p_values),
            PAdjust::BenjaminiHochberg => correct_bh(p_values),
            PAdjust::None => p_values.to_vec(),
        }
    }

    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            PAdjust::Bonferroni => "bonferroni",
            PAdjust::Holm => "holm",
            PAdjust::BenjaminiHochberg => "BH",
            PAdjust::None => "none",
        }
    }
}

impl std::fmt::Display for PAdjust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Adjust the non-NaN p-values as one family; NaN entries stay NaN and do
/// not count towards the family size.
pub(crate) fn adjust_present(p_values: &[f64], adjust: impl Fn(&[f64]) -> Vec<f64>) -> Vec<f64> {
    let present: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let family: Vec<f64> = present.iter().map(|&i| p_values[i]).collect();

    let mut adjusted = vec![f64::NAN; p_values.len()];
    for (&i, p) in present.iter().zip(adjust(&family)) {
        adjusted[i] = p;
    }
    adjusted
}

/// Indices that sort p-values ascending; NaN sorts last.
pub(crate) fn ascending_order(p_values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..p_values.len()).collect();
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_bonferroni() {
        assert_eq!(PAdjust::default(), PAdjust::Bonferroni);
    }

    #[test]
    fn test_none_is_identity() {
        let p = vec![0.2, 0.01];
        assert_eq!(PAdjust::None.apply(&p), p);
    }

    #[test]
    fn test_nan_stays_unestimable() {
        let p = [0.01, f64::NAN, 0.02];
        for method in [PAdjust::Bonferroni, PAdjust::Holm, PAdjust::BenjaminiHochberg] {
            let adjusted = method.apply(&p);
            assert!(adjusted[1].is_nan(), "{} turned NaN into a number", method);
            assert!(adjusted[0].is_finite() && adjusted[2].is_finite());
        }
        // family size counts the two estimable contrasts only
        let bonf = PAdjust::Bonferroni.apply(&p);
        assert!((bonf[0] - 0.02).abs() < 1e-12);
        assert!((bonf[2] - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_yaml_aliases() {
        let m: PAdjust = serde_yaml::from_str("bh").unwrap();
        assert_eq!(m, PAdjust::BenjaminiHochberg);
        let m: PAdjust = serde_yaml::from_str("bonferroni").unwrap();
        assert_eq!(m, PAdjust::Bonferroni);
    }
}
