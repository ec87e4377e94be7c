//! Trend classification of a water-year series.
//!
//! Depth convention: a negative slope means the water table is rising,
//! which is reported as an upward / increasing trend.
//!
//! The label is a pure function of three independent tests, see [`decide`]:
//!
//! | slope branch | step test    | stability | label                  |
//! |--------------|--------------|-----------|------------------------|
//! | Flat         | any          | any       | No trend               |
//! | Upward       | Detected     | any       | Sudden upward change   |
//! | Upward       | NotDetected  | Stable    | Increasing             |
//! | Upward       | NotDetected  | Unstable  | No trend               |
//! | Downward     | Detected     | any       | Sudden downward change |
//! | Downward     | NotDetected  | Stable    | Decreasing             |
//! | Downward     | NotDetected  | Unstable  | No trend               |

use crate::analysis::piecewise::{fit_step_ramp, FitBounds, PiecewiseFit};
use crate::analysis::robust::{leave_one_out_slopes, theil_sen};
use crate::config::ClassifierConfig;
use crate::model::{AnnualSeries, ClassificationResult, ClassifyError, FitError, StepChange, TrendLabel};
use chrono::{Months, NaiveDate};

/// Fewest annual points for which a slope is defined.
pub const MIN_POINTS_FOR_SLOPE: usize = 2;
/// Fewest annual points for which the step fit is attempted.
pub const MIN_POINTS_FOR_STEP_FIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeBranch {
    /// Slope below `-dead_zone`: depth falling, water table rising.
    Upward,
    /// Slope above `+dead_zone`.
    Downward,
    Flat,
}

impl SlopeBranch {
    pub fn from_slope(slope: f64, dead_zone: f64) -> Self {
        if slope < -dead_zone {
            SlopeBranch::Upward
        } else if slope > dead_zone {
            SlopeBranch::Downward
        } else {
            SlopeBranch::Flat
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTest {
    Detected,
    NotDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    Unstable,
}

/// The decision table.
pub fn decide(branch: SlopeBranch, step: StepTest, stability: Stability) -> TrendLabel {
    match (branch, step, stability) {
        (SlopeBranch::Flat, _, _) => TrendLabel::NoTrend,
        (SlopeBranch::Upward, StepTest::Detected, _) => TrendLabel::SuddenUpwardChange,
        (SlopeBranch::Upward, StepTest::NotDetected, Stability::Stable) => TrendLabel::Increasing,
        (SlopeBranch::Downward, StepTest::Detected, _) => TrendLabel::SuddenDownwardChange,
        (SlopeBranch::Downward, StepTest::NotDetected, Stability::Stable) => TrendLabel::Decreasing,
        (_, StepTest::NotDetected, Stability::Unstable) => TrendLabel::NoTrend,
    }
}

/// Step-change test on a fitted curve.
pub fn step_test(step: Option<&StepChange>, config: &ClassifierConfig) -> StepTest {
    match step {
        Some(s)
            if s.r_squared >= config.min_r_squared
                && s.total_years > 0
                && s.window_years as f64 / s.total_years as f64 <= config.max_window_fraction
                && s.window_years <= config.max_window_years =>
        {
            StepTest::Detected
        }
        _ => StepTest::NotDetected,
    }
}

/// Leave-one-out stability for the given branch. An undefined slope
/// (too few remaining points) counts as unstable.
pub fn stability(branch: SlopeBranch, loo_slopes: &[Option<f64>], config: &ClassifierConfig) -> Stability {
    let holds = |check: &dyn Fn(f64) -> bool| {
        !loo_slopes.is_empty() && loo_slopes.iter().all(|s| s.is_some_and(check))
    };
    let stable = match branch {
        SlopeBranch::Upward => holds(&|s| s < config.increasing_stability_bound),
        SlopeBranch::Downward => holds(&|s| s > config.decreasing_stability_bound),
        SlopeBranch::Flat => false,
    };
    if stable { Stability::Stable } else { Stability::Unstable }
}

/// Inclusive whole-year count between two dates: `trunc(days / 365 + 1)`.
pub fn years_spanned(from: NaiveDate, to: NaiveDate) -> u32 {
    let days = (to - from).num_days() as f64;
    (days / 365.0 + 1.0).max(0.0) as u32
}

fn add_years(date: NaiveDate, years: f64) -> Option<NaiveDate> {
    let years = years.round_ties_even();
    if !(0.0..=10_000.0).contains(&years) {
        return None;
    }
    date.checked_add_months(Months::new(12 * years as u32))
}

/// Converts fitted breakpoints into calendar years and window lengths.
fn to_step_change(fit: &PiecewiseFit, first: NaiveDate, last: NaiveDate) -> Option<StepChange> {
    let [x0, x1, _, _] = fit.params;
    let (lo, hi) = if x0 < x1 { (x0, x1) } else { (x1, x0) };
    let start_year = add_years(first, lo - 1.0)?;
    let end_year = add_years(start_year, hi - lo)?;
    Some(StepChange {
        r_squared: fit.r_squared,
        window_years: years_spanned(start_year, end_year),
        total_years: years_spanned(first, last),
        start_year,
        end_year,
        params: fit.params,
    })
}

/// Fits the flat-ramp-flat model with the configured bounds and the
/// standard initial guess `[2, seq[-2], round(min), round(max)]`.
pub fn fit_step_change(series: &AnnualSeries, config: &ClassifierConfig) -> Result<StepChange, FitError> {
    let n = series.len();
    if n < MIN_POINTS_FOR_STEP_FIT {
        return Err(FitError::TooFewPoints(n));
    }
    let x = series.sequences();
    let y = series.values();
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return Err(FitError::TooFewPoints(n));
    };

    let min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let bounds = FitBounds {
        lower: [1.0, 2.0, config.value_lower_bound, config.value_lower_bound],
        upper: [x[n - 2], x[n - 1], config.value_upper_bound, config.value_upper_bound],
    };
    let initial = [2.0, x[n - 2], min.round_ties_even(), max.round_ties_even()];

    let fit = fit_step_ramp(&x, &y, initial, &bounds, config.max_fit_iterations)?;
    to_step_change(&fit, first, last).ok_or(FitError::InvalidBounds)
}

/// Classifies one annual series.
///
/// Fit failures never abort: they are recorded in `fit_error` and the step
/// test reads as not detected.
pub fn classify(series: &AnnualSeries, config: &ClassifierConfig) -> Result<ClassificationResult, ClassifyError> {
    if series.len() < MIN_POINTS_FOR_SLOPE {
        return Err(ClassifyError::InsufficientData {
            points: series.len(),
            required: MIN_POINTS_FOR_SLOPE,
        });
    }
    let x = series.sequences();
    let y = series.values();
    let estimate = theil_sen(&x, &y, config.confidence).ok_or(ClassifyError::DegenerateSeries)?;
    let branch = SlopeBranch::from_slope(estimate.slope, config.dead_zone);

    let (step, fit_error) = match fit_step_change(series, config) {
        Ok(step) => (Some(step), None),
        Err(e) => (None, Some(e)),
    };
    let step_result = step_test(step.as_ref(), config);

    // Stability is only consulted when a trend exists and no step was found.
    let stable = match (branch, step_result) {
        (SlopeBranch::Flat, _) | (_, StepTest::Detected) => Stability::Unstable,
        _ => stability(branch, &leave_one_out_slopes(&x, &y, config.confidence), config),
    };

    Ok(ClassificationResult {
        label: decide(branch, step_result, stable),
        slope: estimate.slope,
        slope_bounds: estimate.bounds,
        step,
        fit_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SeriesPoint, TimeSeries};

    fn annual(values: &[f64]) -> AnnualSeries {
        AnnualSeries::from_series(&TimeSeries::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| SeriesPoint {
                    date: NaiveDate::from_ymd_opt(1990 + i as i32, 10, 1).unwrap(),
                    value: *v,
                })
                .collect(),
        ))
    }

    #[test]
    fn test_decision_table() {
        use SlopeBranch::*;
        use Stability::*;
        use StepTest::*;
        assert_eq!(decide(Flat, Detected, Stable), TrendLabel::NoTrend);
        assert_eq!(decide(Flat, NotDetected, Stable), TrendLabel::NoTrend);
        assert_eq!(decide(Upward, Detected, Unstable), TrendLabel::SuddenUpwardChange);
        assert_eq!(decide(Upward, NotDetected, Stable), TrendLabel::Increasing);
        assert_eq!(decide(Upward, NotDetected, Unstable), TrendLabel::NoTrend);
        assert_eq!(decide(Downward, Detected, Stable), TrendLabel::SuddenDownwardChange);
        assert_eq!(decide(Downward, NotDetected, Stable), TrendLabel::Decreasing);
        assert_eq!(decide(Downward, NotDetected, Unstable), TrendLabel::NoTrend);
    }

    #[test]
    fn test_slope_branch_dead_zone() {
        assert_eq!(SlopeBranch::from_slope(-0.5, 0.02), SlopeBranch::Upward);
        assert_eq!(SlopeBranch::from_slope(0.5, 0.02), SlopeBranch::Downward);
        assert_eq!(SlopeBranch::from_slope(0.02, 0.02), SlopeBranch::Flat);
        assert_eq!(SlopeBranch::from_slope(-0.05, 0.1), SlopeBranch::Flat);
    }

    #[test]
    fn test_stability_uses_branch_specific_bounds() {
        let config = ClassifierConfig::default();
        let rising = [Some(-1.0), Some(-0.9), Some(0.05)];
        assert_eq!(stability(SlopeBranch::Upward, &rising, &config), Stability::Stable);
        let wobbly = [Some(-1.0), Some(0.2)];
        assert_eq!(stability(SlopeBranch::Upward, &wobbly, &config), Stability::Unstable);
        let falling = [Some(0.4), Some(-0.01)];
        assert_eq!(stability(SlopeBranch::Downward, &falling, &config), Stability::Stable);
        let undefined = [None, None];
        assert_eq!(stability(SlopeBranch::Downward, &undefined, &config), Stability::Unstable);
    }

    #[test]
    fn test_step_test_thresholds() {
        let config = ClassifierConfig::default();
        let d = NaiveDate::from_ymd_opt(2000, 10, 1).unwrap();
        let mut step = StepChange {
            r_squared: 0.9,
            window_years: 4,
            total_years: 16,
            start_year: d,
            end_year: d,
            params: [5.0, 8.0, 10.0, 2.0],
        };
        assert_eq!(step_test(Some(&step), &config), StepTest::Detected);
        step.r_squared = 0.69;
        assert_eq!(step_test(Some(&step), &config), StepTest::NotDetected);
        step.r_squared = 0.9;
        step.window_years = 9;
        assert_eq!(step_test(Some(&step), &config), StepTest::NotDetected, "window fraction > 0.5");
        step.window_years = 16;
        step.total_years = 40;
        assert_eq!(step_test(Some(&step), &config), StepTest::NotDetected, "window > 15 years");
        assert_eq!(step_test(None, &config), StepTest::NotDetected);
    }

    #[test]
    fn test_linear_decline_is_increasing() {
        let values: Vec<f64> = (0..12).map(|i| 20.0 - i as f64).collect();
        let result = classify(&annual(&values), &ClassifierConfig::default()).unwrap();
        assert!((result.slope + 1.0).abs() < 1e-12);
        assert_eq!(result.label, TrendLabel::Increasing, "steady decline in depth must not be No trend");
    }

    #[test]
    fn test_linear_rise_is_decreasing() {
        let values: Vec<f64> = (0..12).map(|i| 5.0 + 0.5 * i as f64).collect();
        let result = classify(&annual(&values), &ClassifierConfig::default()).unwrap();
        assert_eq!(result.label, TrendLabel::Decreasing);
        assert!(result.slope_bounds.is_some());
    }

    #[test]
    fn test_flat_then_ramp_then_flat_is_sudden_upward_change() {
        let mut values = vec![10.0; 5];
        values.extend([7.333333, 4.666667, 2.0]);
        values.extend(vec![2.0; 8]);
        let result = classify(&annual(&values), &ClassifierConfig::default()).unwrap();
        assert_eq!(result.label, TrendLabel::SuddenUpwardChange);
        let step = result.step.expect("step fit should succeed");
        assert!(step.r_squared >= 0.7, "R² = {}", step.r_squared);
        assert!(step.window_years <= 15);
        assert_eq!(step.total_years, 16);
        assert!(step.start_year >= NaiveDate::from_ymd_opt(1993, 10, 1).unwrap());
        assert!(step.end_year <= NaiveDate::from_ymd_opt(1998, 10, 1).unwrap());
    }

    #[test]
    fn test_flat_series_is_no_trend() {
        let values: Vec<f64> = (0..10).map(|i| 7.0 + if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
        let result = classify(&annual(&values), &ClassifierConfig::default()).unwrap();
        assert_eq!(result.label, TrendLabel::NoTrend);
    }

    #[test]
    fn test_two_points_classify_without_step_fit() {
        let result = classify(&annual(&[10.0, 8.0]), &ClassifierConfig::default()).unwrap();
        assert!(result.step.is_none());
        assert_eq!(result.fit_error, Some(FitError::TooFewPoints(2)));
        assert_eq!(result.label, TrendLabel::NoTrend, "LOO slopes undefined for two points");
    }

    #[test]
    fn test_single_point_is_insufficient() {
        assert_eq!(
            classify(&annual(&[3.0]), &ClassifierConfig::default()),
            Err(ClassifyError::InsufficientData { points: 1, required: 2 })
        );
    }

    #[test]
    fn test_constant_series_records_fit_error_not_panic() {
        let result = classify(&annual(&[4.0; 9]), &ClassifierConfig::default()).unwrap();
        assert_eq!(result.label, TrendLabel::NoTrend);
        assert_eq!(result.fit_error, Some(FitError::DegenerateSeries));
    }

    #[test]
    fn test_years_spanned_matches_truncation() {
        let a = NaiveDate::from_ymd_opt(2000, 10, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2015, 10, 1).unwrap();
        assert_eq!(years_spanned(a, b), 16, "5479 days / 365 = 15.01 → 16");
        assert_eq!(years_spanned(a, a), 1);
    }
}
