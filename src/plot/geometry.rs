//! Pure layout helpers for figures.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Quartile summary drawn as a box without whiskers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStats {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub n: usize,
}

impl BoxStats {
    /// Quartiles by linear interpolation between order statistics.
    /// Non-finite values are ignored; `None` when nothing is left.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(Self {
            q1: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q3: quantile(&sorted, 0.75),
            n: sorted.len(),
        })
    }
}

/// Quantile of sorted data, linear interpolation.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Horizontal jitter in `[-width / 2, width / 2)`, reproducible for a seed.
pub fn jitter_offsets(n: usize, width: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let half = width.abs() / 2.0;
    if half == 0.0 {
        return vec![0.0; n];
    }
    (0..n).map(|_| rng.gen_range(-half..half)).collect()
}

/// Fraction of the data span added below and above the data.
const PAD: f64 = 0.05;
/// Fraction of the data span taken by each bracket level.
const BRACKET_STEP: f64 = 0.1;

/// Y axis range covering `values` plus room for `n_brackets` stacked brackets.
pub fn y_range(values: &[f64], n_brackets: usize) -> (f64, f64) {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < 1e-9 {
        return (min - 1.0, max + 1.0 + n_brackets as f64 * BRACKET_STEP * 2.0);
    }
    let span = max - min;
    let mut hi = max + PAD * span;
    if n_brackets > 0 {
        hi += n_brackets as f64 * BRACKET_STEP * span + PAD * span;
    }
    (min - PAD * span, hi)
}

/// Bracket `level` (0 = lowest): the y of its horizontal bar and the y of
/// the ends of its legs.
pub fn bracket_y(data_max: f64, span: f64, level: usize) -> (f64, f64) {
    let bar = data_max + PAD * span + (level as f64 + 0.5) * BRACKET_STEP * span;
    (bar, bar - 0.3 * BRACKET_STEP * span)
}

/// Blend a color towards white; `amount` 0 keeps it, 1 gives white.
pub fn lighten((r, g, b): (u8, u8, u8), amount: f64) -> (u8, u8, u8) {
    let amount = amount.clamp(0.0, 1.0);
    let channel = |c: u8| (c as f64 + (255.0 - c as f64) * amount).round() as u8;
    (channel(r), channel(g), channel(b))
}

/// Star label for a p-value.
pub fn significance_label(p: f64) -> &'static str {
    if p.is_nan() || p > 0.05 {
        "ns"
    } else if p <= 1e-4 {
        "****"
    } else if p <= 1e-3 {
        "***"
    } else if p <= 1e-2 {
        "**"
    } else {
        "*"
    }
}

/// Split the polyline through `points` into dashes: each segment becomes
/// `dashes` pieces separated by gaps of equal length.
pub fn dash_segments(points: &[(f64, f64)], dashes: usize) -> Vec<[(f64, f64); 2]> {
    let dashes = dashes.max(1);
    let pieces = 2 * dashes - 1;
    let mut out = Vec::new();
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        let at = |t: f64| (x0 + t * (x1 - x0), y0 + t * (y1 - y0));
        for d in 0..dashes {
            let start = (2 * d) as f64 / pieces as f64;
            let end = (2 * d + 1) as f64 / pieces as f64;
            out.push([at(start), at(end)]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lighten() {
        assert_eq!(lighten((76, 114, 176), 0.0), (76, 114, 176));
        assert_eq!(lighten((76, 114, 176), 1.0), (255, 255, 255));
        assert_eq!(lighten((0, 100, 255), 0.5), (128, 178, 255));
        assert_eq!(lighten((10, 10, 10), 2.0), (255, 255, 255));
    }

    #[test]
    fn test_box_stats_quartiles() {
        let stats = BoxStats::from_values(&[4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_relative_eq!(stats.q1, 2.0);
        assert_relative_eq!(stats.median, 3.0);
        assert_relative_eq!(stats.q3, 4.0);
        assert_eq!(stats.n, 5);

        let even = BoxStats::from_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_relative_eq!(even.q1, 1.75);
        assert_relative_eq!(even.median, 2.5);
        assert_relative_eq!(even.q3, 3.25);
    }

    #[test]
    fn test_box_stats_ignores_nan() {
        let stats = BoxStats::from_values(&[f64::NAN, 2.0]).unwrap();
        assert_eq!(stats.n, 1);
        assert_relative_eq!(stats.median, 2.0);
        assert!(BoxStats::from_values(&[]).is_none());
        assert!(BoxStats::from_values(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_jitter_is_seeded_and_bounded() {
        let a = jitter_offsets(50, 0.4, 7);
        let b = jitter_offsets(50, 0.4, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|x| (-0.2..0.2).contains(x)));
        assert_ne!(a, jitter_offsets(50, 0.4, 8));
        assert_eq!(jitter_offsets(3, 0.0, 1), vec![0.0; 3]);
    }

    #[test]
    fn test_y_range() {
        let (lo, hi) = y_range(&[0.0, 10.0], 0);
        assert_relative_eq!(lo, -0.5, epsilon = 1e-12);
        assert_relative_eq!(hi, 10.5, epsilon = 1e-12);

        let (_, hi) = y_range(&[0.0, 10.0], 1);
        assert_relative_eq!(hi, 12.0, epsilon = 1e-12);

        let (lo, hi) = y_range(&[3.0, 3.0], 0);
        assert_relative_eq!(lo, 2.0);
        assert_relative_eq!(hi, 4.0);

        assert_eq!(y_range(&[], 0), (0.0, 1.0));
    }

    #[test]
    fn test_brackets_fit_in_range() {
        let values = [0.0, 10.0];
        let (_, hi) = y_range(&values, 2);
        for level in 0..2 {
            let (bar, leg) = bracket_y(10.0, 10.0, level);
            assert!(leg > 10.0);
            assert!(bar < hi);
        }
    }

    #[test]
    fn test_significance_label() {
        assert_eq!(significance_label(0.2), "ns");
        assert_eq!(significance_label(0.0500001), "ns");
        assert_eq!(significance_label(0.05), "*");
        assert_eq!(significance_label(0.01), "**");
        assert_eq!(significance_label(0.001), "***");
        assert_eq!(significance_label(0.0001), "****");
        assert_eq!(significance_label(1e-12), "****");
        assert_eq!(significance_label(f64::NAN), "ns");
    }

    #[test]
    fn test_dash_segments() {
        let dashes = dash_segments(&[(0.0, 0.0), (5.0, 5.0)], 3);
        assert_eq!(dashes.len(), 3);
        assert_relative_eq!(dashes[0][0].0, 0.0);
        assert_relative_eq!(dashes[0][1].0, 1.0);
        assert_relative_eq!(dashes[2][1].1, 5.0);
        assert!(dash_segments(&[(0.0, 0.0)], 3).is_empty());
    }
}
