//! Resampling raw readings into daily, monthly and water-year series.
//!
//! Every aggregation is "mean of what is there, drop empty periods":
//! nothing is ever zero- or null-filled.

use crate::model::{AnnualSeries, DailySeries, MonthlySeries, RawReading, SeriesPoint, TimeSeries};
use chrono::{Datelike, Months, NaiveDate};
use std::collections::BTreeMap;

/// First month of the water year (October).
pub const WATER_YEAR_START_MONTH: u32 = 10;

/// The 1 October that opens the water year containing `date`.
pub fn water_year_start(date: NaiveDate) -> NaiveDate {
    let year = if date.month() >= WATER_YEAR_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    };
    NaiveDate::from_ymd_opt(year, WATER_YEAR_START_MONTH, 1).unwrap_or(date)
}

/// The 1 October that closes the water year opened by `start`.
pub fn next_water_year(start: NaiveDate) -> NaiveDate {
    start.checked_add_months(Months::new(12)).unwrap_or(NaiveDate::MAX)
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Groups values by the period key `key(date)`, preserving date order.
pub fn group_by_period<F>(series: &TimeSeries, key: F) -> BTreeMap<NaiveDate, Vec<f64>>
where
    F: Fn(NaiveDate) -> NaiveDate,
{
    let mut groups: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for p in series.points() {
        groups.entry(key(p.date)).or_default().push(p.value);
    }
    groups
}

fn mean_by_period<F>(series: &TimeSeries, key: F) -> TimeSeries
where
    F: Fn(NaiveDate) -> NaiveDate,
{
    TimeSeries::new(
        group_by_period(series, key)
            .into_iter()
            .map(|(date, values)| SeriesPoint {
                date,
                value: values.iter().sum::<f64>() / values.len() as f64,
            })
            .collect(),
    )
}

/// Daily means of usable (Good / Estimated) readings.
pub fn daily_means(readings: &[RawReading]) -> DailySeries {
    TimeSeries::new(
        readings
            .iter()
            .filter(|r| r.quality.is_usable())
            .map(|r| SeriesPoint { date: r.timestamp.date(), value: r.value })
            .collect(),
    )
}

/// Outer union of several daily series; coincident days are averaged.
pub fn merge_daily(sources: &[DailySeries]) -> DailySeries {
    TimeSeries::new(
        sources
            .iter()
            .flat_map(|s| s.points().iter().copied())
            .collect(),
    )
}

/// Converts water levels to depths below datum: `depth = elevation - level`.
pub fn to_depth(levels: &DailySeries, elevation: f64) -> DailySeries {
    levels.map_values(|level| elevation - level)
}

pub fn monthly_means(daily: &DailySeries) -> MonthlySeries {
    mean_by_period(daily, month_start)
}

/// Water-year means, dated at each water year's 1 October.
pub fn water_year_means(series: &TimeSeries) -> TimeSeries {
    mean_by_period(series, water_year_start)
}

/// Daily → monthly means → water-year means of the monthly means.
pub fn annual_series(daily: &DailySeries) -> AnnualSeries {
    AnnualSeries::from_series(&water_year_means(&monthly_means(daily)))
}
