//! Flat-ramp-flat ("step change") curve and its bounded least-squares fit.
//!
//! The model has four parameters `[x0, x1, y0, y1]`: constant `y0` up to
//! `x0`, a straight ramp to `(x1, y1)`, then constant `y1`. If `x0 > x1`
//! the two breakpoints are swapped before evaluation.
//!
//! Fitting uses a projected Levenberg-Marquardt iteration with a
//! forward-difference Jacobian. The model is only piecewise smooth in the
//! breakpoints, so the fit is started from the caller's guess and from the
//! best breakpoint pair on the data grid, keeping the lower-cost solution.

use crate::model::FitError;

pub type Params = [f64; 4];

#[derive(Debug, Clone, PartialEq)]
pub struct FitBounds {
    pub lower: Params,
    pub upper: Params,
}

impl FitBounds {
    /// Every lower bound strictly below its upper bound.
    pub fn is_valid(&self) -> bool {
        (0..4).all(|k| self.lower[k] < self.upper[k])
    }

    pub fn contains(&self, p: &Params) -> bool {
        (0..4).all(|k| p[k] >= self.lower[k] && p[k] <= self.upper[k])
    }

    pub fn clamp(&self, mut p: Params) -> Params {
        for k in 0..4 {
            p[k] = p[k].clamp(self.lower[k], self.upper[k]);
        }
        p
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseFit {
    pub params: Params,
    pub ssr: f64,
    pub r_squared: f64,
    pub iterations: usize,
}

/// Evaluates the flat-ramp-flat curve at `x`.
pub fn step_ramp(x: f64, p: &Params) -> f64 {
    let (x0, x1) = if p[0] >= p[1] { (p[1], p[0]) } else { (p[0], p[1]) };
    let (y0, y1) = (p[2], p[3]);
    if x <= x0 {
        y0
    } else if x <= x1 {
        (x - x0) * (y1 - y0) / (x1 - x0) + y0
    } else {
        y1
    }
}

fn sum_sq_residuals(x: &[f64], y: &[f64], p: &Params) -> f64 {
    x.iter()
        .zip(y)
        .map(|(xi, yi)| (step_ramp(*xi, p) - yi).powi(2))
        .sum()
}

/// Fits the curve to `(x, y)` inside `bounds`, starting from `initial`.
pub fn fit_step_ramp(
    x: &[f64],
    y: &[f64],
    initial: Params,
    bounds: &FitBounds,
    max_iterations: usize,
) -> Result<PiecewiseFit, FitError> {
    if x.len() != y.len() || x.len() < 3 {
        return Err(FitError::TooFewPoints(x.len().min(y.len())));
    }
    if !bounds.is_valid() {
        return Err(FitError::InvalidBounds);
    }
    if !bounds.contains(&initial) {
        return Err(FitError::InfeasibleStart);
    }

    let mean = y.iter().sum::<f64>() / y.len() as f64;
    let sst: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    if !(sst.is_finite() && sst > 0.0) {
        return Err(FitError::DegenerateSeries);
    }

    let mut starts = vec![initial];
    if let Some(grid) = grid_start(x, y, bounds) {
        starts.push(grid);
    }

    let mut best: Option<(Params, f64, usize)> = None;
    let mut last_error = None;
    for start in starts {
        match levenberg_marquardt(x, y, start, bounds, max_iterations, sst) {
            Ok((params, ssr, iterations)) => {
                if best.as_ref().is_none_or(|(_, b, _)| ssr < *b) {
                    best = Some((params, ssr, iterations));
                }
            }
            Err(e) => last_error = Some(e),
        }
    }

    match best {
        Some((params, ssr, iterations)) => Ok(PiecewiseFit {
            params,
            ssr,
            r_squared: 1.0 - ssr / sst,
            iterations,
        }),
        None => Err(last_error.unwrap_or(FitError::NonConvergence { iterations: max_iterations })),
    }
}

/// Best start among breakpoint pairs placed on data abscissae, with the
/// levels read off the data at those breakpoints.
fn grid_start(x: &[f64], y: &[f64], bounds: &FitBounds) -> Option<Params> {
    let mut best: Option<(Params, f64)> = None;
    for (i, &a) in x.iter().enumerate() {
        if a < bounds.lower[0] || a > bounds.upper[0] {
            continue;
        }
        for (j, &b) in x.iter().enumerate() {
            if b <= a || b < bounds.lower[1] || b > bounds.upper[1] {
                continue;
            }
            let candidate = bounds.clamp([a, b, y[i], y[j]]);
            let ssr = sum_sq_residuals(x, y, &candidate);
            if best.as_ref().is_none_or(|(_, s)| ssr < *s) {
                best = Some((candidate, ssr));
            }
        }
    }
    best.map(|(p, _)| p)
}

fn jacobian(x: &[f64], p: &Params, bounds: &FitBounds) -> Vec<[f64; 4]> {
    let base: Vec<f64> = x.iter().map(|xi| step_ramp(*xi, p)).collect();
    let mut jac = vec![[0.0; 4]; x.len()];
    for k in 0..4 {
        let mut h = f64::EPSILON.sqrt() * p[k].abs().max(1.0);
        if p[k] + h > bounds.upper[k] {
            h = -h;
        }
        let mut shifted = *p;
        shifted[k] += h;
        for (i, xi) in x.iter().enumerate() {
            jac[i][k] = (step_ramp(*xi, &shifted) - base[i]) / h;
        }
    }
    jac
}

/// Projected Levenberg-Marquardt. Returns (params, ssr, iterations).
fn levenberg_marquardt(
    x: &[f64],
    y: &[f64],
    start: Params,
    bounds: &FitBounds,
    max_iterations: usize,
    sst: f64,
) -> Result<(Params, f64, usize), FitError> {
    const FTOL: f64 = 1e-10;
    const MAX_LAMBDA: f64 = 1e16;

    let mut p = bounds.clamp(start);
    let mut cost = sum_sq_residuals(x, y, &p);
    let mut lambda = 1e-3;

    for iteration in 0..max_iterations {
        if cost <= f64::EPSILON * sst {
            return Ok((p, cost, iteration));
        }

        let jac = jacobian(x, &p, bounds);
        let mut jtj = [[0.0; 4]; 4];
        let mut jtr = [0.0; 4];
        for (i, row) in jac.iter().enumerate() {
            let r = step_ramp(x[i], &p) - y[i];
            for a in 0..4 {
                jtr[a] += row[a] * r;
                for b in 0..4 {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }

        loop {
            let mut damped = jtj;
            for k in 0..4 {
                damped[k][k] += lambda * jtj[k][k].max(1e-12);
            }
            let rhs = [-jtr[0], -jtr[1], -jtr[2], -jtr[3]];

            if let Some(delta) = solve4(damped, rhs) {
                let mut candidate = p;
                for k in 0..4 {
                    candidate[k] += delta[k];
                }
                let candidate = bounds.clamp(candidate);
                let candidate_cost = sum_sq_residuals(x, y, &candidate);

                if candidate_cost.is_finite() && candidate_cost < cost {
                    let improvement = (cost - candidate_cost) / cost;
                    p = candidate;
                    cost = candidate_cost;
                    lambda = (lambda / 10.0).max(1e-12);
                    if improvement < FTOL {
                        return Ok((p, cost, iteration + 1));
                    }
                    break;
                }
            }

            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                // No descent direction left inside the bounds.
                return Ok((p, cost, iteration + 1));
            }
        }
    }

    Err(FitError::NonConvergence { iterations: max_iterations })
}

/// Gaussian elimination with partial pivoting on a 4x4 system.
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot = (col..4).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if !(a[pivot][col].abs() > 1e-300) {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut out = [0.0; 4];
    for row in (0..4).rev() {
        let tail: f64 = ((row + 1)..4).map(|k| a[row][k] * out[k]).sum();
        out[row] = (b[row] - tail) / a[row][row];
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}
