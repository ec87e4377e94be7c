//! Three-stage quality control of daily depth series.
//!
//! 1. Flat-run removal: runs of identical consecutive values long enough to
//!    indicate a stuck sensor are removed entirely.
//! 2. Z-score removal: single pass against the mean/std of the stage-1 output.
//! 3. Annual range variation (RVI): water years whose max-min range is
//!    anomalously small or large relative to the median range are removed.
//!
//! Each stage only ever drops rows, so the output is a subset of the input.

use crate::analysis::resample::{group_by_period, next_water_year, water_year_start};
use crate::analysis::robust;
use crate::config::QualityConfig;
use crate::model::{DailySeries, TimeSeries};
use chrono::NaiveDate;

/// Range variation index of one water year.
#[derive(Debug, Clone, PartialEq)]
pub struct YearRvi {
    pub water_year: NaiveDate,
    pub range: f64,
    pub rvi: f64,
    pub removed: bool,
}

/// What each stage removed, for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub input_len: usize,
    pub flat_run_removed: usize,
    pub outliers_removed: usize,
    pub range_removed: usize,
    /// `None` when stage 3 was skipped because the median range was zero.
    pub median_range: Option<f64>,
    pub years: Vec<YearRvi>,
}

impl QualityReport {
    pub fn removed_years(&self) -> impl Iterator<Item = &YearRvi> {
        self.years.iter().filter(|y| y.removed)
    }

    pub fn total_removed(&self) -> usize {
        self.flat_run_removed + self.outliers_removed + self.range_removed
    }
}

/// Removes every maximal run of strictly-equal consecutive values whose
/// length is at least `min_run`. Shorter runs are kept as they are.
pub fn remove_flat_runs(series: &DailySeries, min_run: usize) -> DailySeries {
    let values = series.values();
    let mut drop = vec![false; values.len()];

    let mut start = 0;
    while start < values.len() {
        let mut end = start + 1;
        while end < values.len() && values[end] == values[start] {
            end += 1;
        }
        if end - start >= min_run {
            drop[start..end].iter_mut().for_each(|d| *d = true);
        }
        start = end;
    }

    series.filter(|i, _| !drop[i])
}

/// Drops rows further than `z_threshold` population standard deviations
/// from the mean. Statistics are computed once over the input.
pub fn remove_zscore_outliers(series: &DailySeries, z_threshold: f64) -> DailySeries {
    let values = series.values();
    let (Some(mean), Some(std)) = (robust::mean(&values), robust::population_std(&values)) else {
        return series.clone();
    };
    let limit = z_threshold * std;
    series.filter(|_, p| (p.value - mean).abs() <= limit)
}

/// Per water year max-min range and its RVI against the median range.
///
/// Returns `None` for the median when it is zero or undefined, in which
/// case no RVI can be formed.
pub fn water_year_rvi(series: &DailySeries, rvi_min: f64, rvi_max: f64) -> (Option<f64>, Vec<YearRvi>) {
    let ranges: Vec<(NaiveDate, f64)> = group_by_period(series, water_year_start)
        .into_iter()
        .map(|(start, values)| {
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            (start, max - min)
        })
        .collect();

    let range_values: Vec<f64> = ranges.iter().map(|(_, r)| *r).collect();
    let median = robust::median(&range_values).filter(|m| m.is_finite() && *m > 0.0);
    let Some(median) = median else {
        return (None, Vec::new());
    };

    let years = ranges
        .into_iter()
        .map(|(water_year, range)| {
            let rvi = range / median;
            YearRvi {
                water_year,
                range,
                rvi,
                removed: rvi < rvi_min || rvi > rvi_max,
            }
        })
        .collect();
    (Some(median), years)
}

/// Removes whole water years whose RVI falls outside `[rvi_min, rvi_max]`.
/// Each window runs from Oct 1 of the flagged year through Oct 1 of the
/// next, both ends inclusive. The median range is fixed up front and not
/// recomputed per removal.
pub fn remove_anomalous_years(
    series: &DailySeries,
    rvi_min: f64,
    rvi_max: f64,
) -> (DailySeries, Option<f64>, Vec<YearRvi>) {
    let (median, years) = water_year_rvi(series, rvi_min, rvi_max);
    let windows: Vec<(NaiveDate, NaiveDate)> = years
        .iter()
        .filter(|y| y.removed)
        .map(|y| (y.water_year, next_water_year(y.water_year)))
        .collect();

    let cleaned = series.filter(|_, p| !windows.iter().any(|(s, e)| p.date >= *s && p.date <= *e));
    (cleaned, median, years)
}

/// Runs the three stages in order.
pub fn quality_control(series: &DailySeries, config: &QualityConfig) -> (TimeSeries, QualityReport) {
    let stage1 = remove_flat_runs(series, config.flat_run_length);
    let stage2 = remove_zscore_outliers(&stage1, config.z_threshold);
    let (stage3, median_range, years) = remove_anomalous_years(&stage2, config.rvi_min, config.rvi_max);

    let report = QualityReport {
        input_len: series.len(),
        flat_run_removed: series.len() - stage1.len(),
        outliers_removed: stage1.len() - stage2.len(),
        range_removed: stage2.len() - stage3.len(),
        median_range,
        years,
    };
    (stage3, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeriesPoint;
    use chrono::Datelike;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series_of(values: &[f64]) -> TimeSeries {
        let start = d(2000, 1, 1);
        TimeSeries::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| SeriesPoint { date: start + chrono::Duration::days(i as i64), value: *v })
                .collect(),
        )
    }

    /// Daily seasonal signal over `years` water years starting 2000-10-01,
    /// amplitude chosen per water year.
    fn seasonal(years: i64, amplitude: impl Fn(i32) -> f64) -> TimeSeries {
        let start = d(2000, 10, 1);
        let end = d(2000 + years as i32, 10, 1);
        let days = (end - start).num_days();
        TimeSeries::new(
            (0..days)
                .map(|i| {
                    let date = start + chrono::Duration::days(i);
                    let phase = 2.0 * std::f64::consts::PI * i as f64 / 365.25;
                    let amp = amplitude(water_year_start(date).year());
                    SeriesPoint { date, value: 10.0 + amp * phase.sin() + 0.0001 * i as f64 }
                })
                .collect(),
        )
    }

    #[test]
    fn test_flat_runs_of_three_or_more_removed_entirely() {
        let input = series_of(&[1.0, 2.0, 2.0, 3.0, 3.0, 3.0, 4.0, 5.0, 5.0, 5.0, 5.0, 6.0]);
        let output = remove_flat_runs(&input, 3);
        assert_eq!(output.values(), vec![1.0, 2.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_flat_run_at_series_end_removed() {
        let output = remove_flat_runs(&series_of(&[1.0, 7.0, 7.0, 7.0]), 3);
        assert_eq!(output.values(), vec![1.0]);
    }

    #[test]
    fn test_flat_run_filter_keeps_dates_of_survivors() {
        let input = series_of(&[9.0, 9.0, 9.0, 4.0]);
        let output = remove_flat_runs(&input, 3);
        assert_eq!(output.points()[0].date, d(2000, 1, 4));
    }

    #[test]
    fn test_zscore_removes_gross_outlier_only() {
        let mut values: Vec<f64> = (0..19).map(|i| 1.0 + (i % 2) as f64 + 0.01 * i as f64).collect();
        values.push(100.0);
        let input = series_of(&values);
        let output = remove_zscore_outliers(&input, 3.0);
        assert_eq!(output.len(), 19);
        assert!(!output.values().contains(&100.0));

        let mean = robust::mean(&values).unwrap();
        let std = robust::population_std(&values).unwrap();
        assert!(output.values().iter().all(|v| (v - mean).abs() <= 3.0 * std));
    }

    #[test]
    fn test_zscore_single_pass_not_iterated() {
        // A second pass without 1000.0 would also drop 30.0; only one pass runs.
        let mut values: Vec<f64> = (0..40).map(|i| 1.0 + (i % 3) as f64 * 0.5).collect();
        values.push(30.0);
        values.push(1000.0);
        let output = remove_zscore_outliers(&series_of(&values), 3.0);
        assert!(!output.values().contains(&1000.0));
        assert!(output.values().contains(&30.0), "30.0 is within 3 std of the first-pass statistics");
    }

    #[test]
    fn test_zscore_on_constant_series_keeps_everything() {
        let input = series_of(&[4.0, 4.0]);
        assert_eq!(remove_zscore_outliers(&input, 3.0), input);
    }

    #[test]
    fn test_anomalously_flat_year_removed_and_others_untouched() {
        let input = seasonal(5, |wy| if wy == 2003 { 0.05 } else { 1.0 });
        let (output, median, years) = remove_anomalous_years(&input, 0.2, 5.0);

        assert!(median.is_some());
        let removed: Vec<_> = years.iter().filter(|y| y.removed).map(|y| y.water_year).collect();
        assert_eq!(removed, vec![d(2003, 10, 1)]);

        let in_window = |date: NaiveDate| date >= d(2003, 10, 1) && date <= d(2004, 10, 1);
        assert!(output.points().iter().all(|p| !in_window(p.date)));
        let outside = input.points().iter().filter(|p| !in_window(p.date)).count();
        assert_eq!(output.len(), outside, "rows outside the removed year must survive");
    }

    #[test]
    fn test_removed_year_takes_following_october_first_with_it() {
        let input = seasonal(5, |wy| if wy == 2002 { 0.05 } else { 1.0 });
        let (output, _, _) = remove_anomalous_years(&input, 0.2, 5.0);

        let dates: Vec<NaiveDate> = output.points().iter().map(|p| p.date).collect();
        assert!(dates.contains(&d(2002, 9, 30)), "day before the window survives");
        assert!(!dates.contains(&d(2002, 10, 1)));
        assert!(!dates.contains(&d(2003, 10, 1)), "closing Oct 1 is inside the window");
        assert!(dates.contains(&d(2003, 10, 2)), "day after the window survives");
    }

    #[test]
    fn test_anomalously_volatile_year_removed() {
        let input = seasonal(5, |wy| if wy == 2001 { 8.0 } else { 1.0 });
        let (_, _, years) = remove_anomalous_years(&input, 0.2, 5.0);
        let removed: Vec<_> = years.iter().filter(|y| y.removed).map(|y| y.water_year).collect();
        assert_eq!(removed, vec![d(2001, 10, 1)]);
    }

    #[test]
    fn test_zero_median_range_skips_stage() {
        let input = TimeSeries::new(vec![
            SeriesPoint { date: d(2000, 10, 1), value: 1.0 },
            SeriesPoint { date: d(2001, 10, 1), value: 2.0 },
            SeriesPoint { date: d(2002, 10, 1), value: 3.0 },
        ]);
        let (output, median, years) = remove_anomalous_years(&input, 0.2, 5.0);
        assert_eq!(output, input);
        assert!(median.is_none());
        assert!(years.is_empty());
    }

    #[test]
    fn test_clean_series_is_a_fixed_point() {
        let clean = seasonal(6, |_| 1.0);
        let config = QualityConfig::default();
        let (once, report) = quality_control(&clean, &config);
        assert_eq!(once, clean, "clean series should pass unchanged");
        assert_eq!(report.total_removed(), 0);
        let (twice, _) = quality_control(&once, &config);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_quality_control_output_is_subset() {
        let mut values: Vec<f64> = (0..400).map(|i| (i as f64 * 0.37).sin() * 2.0 + 20.0).collect();
        values[10] = 5.0;
        values[11] = 5.0;
        values[12] = 5.0;
        values[200] = 500.0;
        let input = series_of(&values);
        let (output, report) = quality_control(&input, &QualityConfig::default());
        assert!(output.len() <= input.len());
        assert!(output.points().iter().all(|p| input.points().contains(p)));
        assert_eq!(report.flat_run_removed, 3);
        assert!(report.outliers_removed >= 1);
    }
}
