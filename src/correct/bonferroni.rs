//! Family-wise error rate corrections.

use super::{adjust_present, ascending_order};

/// Bonferroni correction: p × m, capped at 1. NaN p-values stay NaN.
pub fn correct_bonferroni(p_values: &[f64]) -> Vec<f64> {
    adjust_present(p_values, |family| {
        let m = family.len() as f64;
        family.iter().map(|p| (p * m).min(1.0)).collect()
    })
}

/// Holm step-down correction.
///
/// The k-th smallest p-value (1-based) is multiplied by m − k + 1, then a
/// running maximum keeps the adjusted values monotone. NaN p-values stay NaN.
pub fn correct_holm(p_values: &[f64]) -> Vec<f64> {
    adjust_present(p_values, holm)
}

fn holm(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let indices = ascending_order(p_values);

    let mut adjusted = vec![0.0; m];
    let mut running = 0.0_f64;
    for (k, &idx) in indices.iter().enumerate() {
        let value = (p_values[idx] * (m - k) as f64).min(1.0);
        running = running.max(value);
        adjusted[idx] = running;
    }
    adjusted
}
