//! Robust and elementary statistics shared by the filter and the classifier.

use statrs::distribution::{ContinuousCDF, Normal};

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by n).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Theil-Sen estimate of `y` against `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct TheilSen {
    pub slope: f64,
    pub intercept: f64,
    /// (low, high) slope bounds; `None` when the rank interval is undefined.
    pub bounds: Option<(f64, f64)>,
}

/// Median of all pairwise slopes over pairs with distinct `x`.
///
/// `confidence` sets the width of the slope bounds (Sen 1968, normal
/// approximation with tie correction); values above 0.5 are read as a
/// confidence level, values below as a significance level.
/// Returns `None` when fewer than one pair with distinct `x` exists.
pub fn theil_sen(x: &[f64], y: &[f64], confidence: f64) -> Option<TheilSen> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let mut slopes = Vec::with_capacity(x.len() * (x.len() - 1) / 2);
    for i in 0..x.len() {
        for j in (i + 1)..x.len() {
            let dx = x[j] - x[i];
            if dx != 0.0 {
                let s = (y[j] - y[i]) / dx;
                if s.is_finite() {
                    slopes.push(s);
                }
            }
        }
    }
    if slopes.is_empty() {
        return None;
    }
    slopes.sort_by(|a, b| a.total_cmp(b));

    let slope = median(&slopes)?;
    let intercept = median(y)? - slope * median(x)?;
    let bounds = rank_bounds(&slopes, x, y, confidence);

    Some(TheilSen { slope, intercept, bounds })
}

/// Rank-based confidence bounds on the sorted pairwise `slopes`.
fn rank_bounds(slopes: &[f64], x: &[f64], y: &[f64], confidence: f64) -> Option<(f64, f64)> {
    let alpha = if confidence > 0.5 { 1.0 - confidence } else { confidence };
    let normal = Normal::new(0.0, 1.0).ok()?;
    let z = normal.inverse_cdf(alpha / 2.0);

    let nt = slopes.len() as f64;
    let ny = y.len() as f64;
    let tie_term = |k: f64| k * (k - 1.0) * (2.0 * k + 5.0);
    let sigsq = (ny * (ny - 1.0) * (2.0 * ny + 5.0)
        - tie_counts(x).into_iter().map(tie_term).sum::<f64>()
        - tie_counts(y).into_iter().map(tie_term).sum::<f64>())
        / 18.0;
    if !(sigsq >= 0.0) {
        return None;
    }
    let sigma = sigsq.sqrt();

    let last = slopes.len() as i64 - 1;
    let upper = (((nt - z * sigma) / 2.0).round_ties_even() as i64).min(last);
    let lower = (((nt + z * sigma) / 2.0).round_ties_even() as i64 - 1).max(0);
    if upper < 0 || lower > last {
        return None;
    }
    Some((slopes[lower as usize], slopes[upper as usize]))
}

/// Sizes of groups of repeated values (only groups larger than one).
fn tie_counts(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut counts = Vec::new();
    let mut run = 1usize;
    for w in sorted.windows(2) {
        if w[0] == w[1] {
            run += 1;
        } else {
            if run > 1 {
                counts.push(run as f64);
            }
            run = 1;
        }
    }
    if run > 1 {
        counts.push(run as f64);
    }
    counts
}

/// Theil-Sen slope recomputed with each point left out in turn.
///
/// Entry `i` is `None` when the remaining points do not define a slope.
pub fn leave_one_out_slopes(x: &[f64], y: &[f64], confidence: f64) -> Vec<Option<f64>> {
    (0..x.len())
        .map(|skip| {
            let xs: Vec<f64> = x.iter().enumerate().filter(|(i, _)| *i != skip).map(|(_, v)| *v).collect();
            let ys: Vec<f64> = y.iter().enumerate().filter(|(i, _)| *i != skip).map(|(_, v)| *v).collect();
            theil_sen(&xs, &ys, confidence).map(|ts| ts.slope)
        })
        .collect()
}
