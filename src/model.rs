/// Core data types for the groundwater trend service.
///
/// This module defines the shared domain model imported by all other modules:
/// readings, date-indexed series, station records, classification outputs
/// and the error enums that cross module boundaries.
/// It contains no I/O.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Aquifer label the registry uses for wells with no aquifer assignment.
/// Such wells are never paired in the spatial consistency check.
pub const UNALLOCATED_AQUIFER: &str = "Unallocated to aquifers";

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// Quality flag attached to every reading by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityFlag {
    Good,
    Estimated,
    /// Suspect, unchecked, missing or any flag we do not recognise.
    Other,
}

impl QualityFlag {
    pub fn from_api(flag: &str) -> Self {
        match flag.trim() {
            "Good" => QualityFlag::Good,
            "Estimated" => QualityFlag::Estimated,
            _ => QualityFlag::Other,
        }
    }

    /// Only Good and Estimated readings feed the analysis.
    pub fn is_usable(self) -> bool {
        matches!(self, QualityFlag::Good | QualityFlag::Estimated)
    }
}

/// A single raw groundwater level reading as delivered by the data source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub timestamp: NaiveDateTime, // UTC
    pub value: f64,
    pub quality: QualityFlag,
}

// ---------------------------------------------------------------------------
// Series types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// A date-indexed series with strictly increasing, unique dates.
///
/// Missing periods are simply absent; there are no null placeholders.
/// Daily, monthly and water-year aggregates all share this shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    points: Vec<SeriesPoint>,
}

pub type DailySeries = TimeSeries;
pub type MonthlySeries = TimeSeries;

impl TimeSeries {
    /// Builds a series from unordered points. Points sharing a date are
    /// averaged and non-finite values are dropped.
    pub fn new(points: Vec<SeriesPoint>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for p in points.into_iter().filter(|p| p.value.is_finite()) {
            let slot = by_date.entry(p.date).or_insert((0.0, 0));
            slot.0 += p.value;
            slot.1 += 1;
        }
        let points = by_date
            .into_iter()
            .map(|(date, (sum, n))| SeriesPoint { date, value: sum / n as f64 })
            .collect();
        TimeSeries { points }
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&SeriesPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|p| p.value).sum::<f64>() / self.points.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.points.iter().map(|p| p.value).reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.points.iter().map(|p| p.value).reduce(f64::min)
    }

    /// Keeps the points for which `keep` returns true. The result is always
    /// a subset of `self`, so ordering and uniqueness carry over.
    pub fn filter<F>(&self, mut keep: F) -> TimeSeries
    where
        F: FnMut(usize, &SeriesPoint) -> bool,
    {
        let points = self
            .points
            .iter()
            .enumerate()
            .filter(|(i, p)| keep(*i, p))
            .map(|(_, p)| *p)
            .collect();
        TimeSeries { points }
    }

    /// Applies `f` to every value, keeping dates.
    pub fn map_values<F>(&self, f: F) -> TimeSeries
    where
        F: Fn(f64) -> f64,
    {
        TimeSeries::new(
            self.points
                .iter()
                .map(|p| SeriesPoint { date: p.date, value: f(p.value) })
                .collect(),
        )
    }
}

/// One water-year mean, dated at the 1 October that opens the water year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnualPoint {
    pub date: NaiveDate,
    pub value: f64,
    /// Whole years elapsed since the first point, plus one.
    pub sequence: u32,
}

/// Water-year aggregate ("YMG") with a derived 1-based `sequence` field.
///
/// This is the only per-station artifact that gets persisted; the classifier
/// and the spatial scorer both read it back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnualSeries {
    points: Vec<AnnualPoint>,
}

impl AnnualSeries {
    /// Derives `sequence` as `trunc(days_since_first / 365) + 1`.
    pub fn from_series(series: &TimeSeries) -> Self {
        let Some(first) = series.first().map(|p| p.date) else {
            return AnnualSeries::default();
        };
        let points = series
            .points()
            .iter()
            .map(|p| AnnualPoint {
                date: p.date,
                value: p.value,
                sequence: ((p.date - first).num_days() / 365 + 1) as u32,
            })
            .collect();
        AnnualSeries { points }
    }

    pub fn points(&self) -> &[AnnualPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    pub fn sequences(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.sequence as f64).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|p| p.value).sum::<f64>() / self.points.len() as f64)
    }

    /// Restricts to `[start, end]` inclusive and re-derives `sequence` from
    /// the new first point.
    pub fn restrict(&self, start: NaiveDate, end: NaiveDate) -> AnnualSeries {
        AnnualSeries::from_series(&self.to_series().filter(|_, p| p.date >= start && p.date <= end))
    }

    pub fn to_series(&self) -> TimeSeries {
        TimeSeries::new(
            self.points
                .iter()
                .map(|p| SeriesPoint { date: p.date, value: p.value })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Station types
// ---------------------------------------------------------------------------

/// One row of the input station registry.
#[derive(Debug, Clone, PartialEq)]
pub struct StationMeta {
    pub station_id: String,
    /// Manual ("dipped") readings locator, if the station has one.
    pub dipped: Option<String>,
    /// Automated ("logged") readings locator, if the station has one.
    pub logged: Option<String>,
    /// Datum elevation; depth = elevation - level.
    pub elevation: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub aquifer: String,
}

impl StationMeta {
    pub fn locators(&self) -> impl Iterator<Item = &str> {
        self.dipped.iter().chain(self.logged.iter()).map(String::as_str)
    }
}

/// Summary statistics written for a qualified station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSummary {
    /// Rows in the cleaned daily series.
    pub count: usize,
    pub mean_depth: f64,
    pub max_depth: f64,
    pub min_depth: f64,
    pub first_year: NaiveDate,
    pub last_year: NaiveDate,
    pub total_years: u32,
    /// Length of the AnnualSeries.
    pub annual_len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StationStatus {
    Qualified(StationSummary),
    InsufficientData,
    NegativeMeanDepth,
}

impl StationStatus {
    pub fn state_label(&self) -> &'static str {
        match self {
            StationStatus::Qualified(_) => "qualified",
            StationStatus::InsufficientData => "insufficient data",
            StationStatus::NegativeMeanDepth => "negative mean depth",
        }
    }

    pub fn is_qualified(&self) -> bool {
        matches!(self, StationStatus::Qualified(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub station_id: String,
    pub status: StationStatus,
}

// ---------------------------------------------------------------------------
// Classification types
// ---------------------------------------------------------------------------

/// Trend labels, in the depth convention: a falling depth value is a
/// rising water table, which is reported as an "upward"/"increasing" trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendLabel {
    SuddenUpwardChange,
    Increasing,
    SuddenDownwardChange,
    Decreasing,
    NoTrend,
}

impl TrendLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendLabel::SuddenUpwardChange => "Sudden upward change",
            TrendLabel::Increasing => "Increasing",
            TrendLabel::SuddenDownwardChange => "Sudden downward change",
            TrendLabel::Decreasing => "Decreasing",
            TrendLabel::NoTrend => "No trend",
        }
    }

    /// Steady (non-step) trends.
    pub fn is_gradual(self) -> bool {
        matches!(self, TrendLabel::Increasing | TrendLabel::Decreasing)
    }
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Sudden upward change" => Ok(TrendLabel::SuddenUpwardChange),
            "Increasing" | "Slow increasing" => Ok(TrendLabel::Increasing),
            "Sudden downward change" => Ok(TrendLabel::SuddenDownwardChange),
            "Decreasing" | "Slow decreasing" => Ok(TrendLabel::Decreasing),
            "No trend" => Ok(TrendLabel::NoTrend),
            other => Err(format!("unknown trend label '{}'", other)),
        }
    }
}

/// Result of fitting the flat-ramp-flat model to an AnnualSeries.
#[derive(Debug, Clone, PartialEq)]
pub struct StepChange {
    pub r_squared: f64,
    /// Ramp duration in years (inclusive count).
    pub window_years: u32,
    /// Series duration in years (inclusive count).
    pub total_years: u32,
    pub start_year: NaiveDate,
    pub end_year: NaiveDate,
    /// Fitted [x0, x1, y0, y1].
    pub params: [f64; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: TrendLabel,
    /// Theil-Sen slope of value against sequence.
    pub slope: f64,
    /// Lower/upper slope bounds at the configured confidence.
    pub slope_bounds: Option<(f64, f64)>,
    /// `None` when the piecewise fit failed or could not be attempted.
    pub step: Option<StepChange>,
    /// Why the step fit is missing, if it is.
    pub fit_error: Option<FitError>,
}

/// Per-station outcome of the spatial consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyRecord {
    pub station_id: String,
    pub neighbors: usize,
    pub consistent: usize,
    pub inconsistent: usize,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching readings from the data source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Non-2xx HTTP response.
    Http(u16),
    /// Connection, TLS or timeout failure before a status was received.
    Transport(String),
    /// The response body could not be decoded.
    Parse(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Http(code) => write!(f, "HTTP error: {}", code),
            SourceError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SourceError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Errors that stop a series from being classified at all.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyError {
    InsufficientData { points: usize, required: usize },
    /// No usable pairwise slope could be formed.
    DegenerateSeries,
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifyError::InsufficientData { points, required } => {
                write!(f, "Insufficient data: {} points, {} required", points, required)
            }
            ClassifyError::DegenerateSeries => write!(f, "Degenerate series: no slope defined"),
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Failures of the piecewise step-change fit.
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    TooFewPoints(usize),
    /// A lower bound is not strictly below its upper bound.
    InvalidBounds,
    /// The initial guess lies outside the bounds.
    InfeasibleStart,
    /// Zero total variance; R² is undefined.
    DegenerateSeries,
    NonConvergence { iterations: usize },
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitError::TooFewPoints(n) => write!(f, "too few points for piecewise fit: {}", n),
            FitError::InvalidBounds => write!(f, "piecewise fit bounds are empty"),
            FitError::InfeasibleStart => write!(f, "initial guess outside fit bounds"),
            FitError::DegenerateSeries => write!(f, "series has zero variance"),
            FitError::NonConvergence { iterations } => {
                write!(f, "fit did not converge after {} iterations", iterations)
            }
        }
    }
}

impl std::error::Error for FitError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_time_series_sorts_and_averages_duplicate_dates() {
        let ts = TimeSeries::new(vec![
            SeriesPoint { date: d(2020, 1, 2), value: 3.0 },
            SeriesPoint { date: d(2020, 1, 1), value: 1.0 },
            SeriesPoint { date: d(2020, 1, 2), value: 5.0 },
            SeriesPoint { date: d(2020, 1, 3), value: f64::NAN },
        ]);
        assert_eq!(ts.len(), 2, "NaN row should be dropped and duplicates merged");
        assert_eq!(ts.points()[0].date, d(2020, 1, 1));
        assert_eq!(ts.points()[1].value, 4.0);
    }

    #[test]
    fn test_annual_sequence_is_one_based_elapsed_years() {
        let ts = TimeSeries::new(vec![
            SeriesPoint { date: d(2000, 10, 1), value: 1.0 },
            SeriesPoint { date: d(2001, 10, 1), value: 2.0 },
            SeriesPoint { date: d(2004, 10, 1), value: 3.0 },
        ]);
        let annual = AnnualSeries::from_series(&ts);
        let seq: Vec<u32> = annual.points().iter().map(|p| p.sequence).collect();
        assert_eq!(seq, vec![1, 2, 5], "gaps in water years show up as gaps in sequence");
    }

    #[test]
    fn test_restrict_recomputes_sequence() {
        let ts = TimeSeries::new(
            (0..6)
                .map(|k| SeriesPoint { date: d(2000 + k, 10, 1), value: k as f64 })
                .collect(),
        );
        let annual = AnnualSeries::from_series(&ts);
        let restricted = annual.restrict(d(2002, 10, 1), d(2004, 10, 1));
        assert_eq!(restricted.len(), 3);
        assert_eq!(restricted.points()[0].sequence, 1);
        assert_eq!(restricted.points()[2].sequence, 3);
    }

    #[test]
    fn test_trend_label_parses_legacy_names() {
        assert_eq!("Slow increasing".parse::<TrendLabel>(), Ok(TrendLabel::Increasing));
        assert_eq!("Decreasing".parse::<TrendLabel>(), Ok(TrendLabel::Decreasing));
        assert!("Sideways".parse::<TrendLabel>().is_err());
        for label in [
            TrendLabel::SuddenUpwardChange,
            TrendLabel::Increasing,
            TrendLabel::SuddenDownwardChange,
            TrendLabel::Decreasing,
            TrendLabel::NoTrend,
        ] {
            assert_eq!(label.as_str().parse::<TrendLabel>(), Ok(label));
        }
    }

    #[test]
    fn test_quality_flags() {
        assert!(QualityFlag::from_api("Good").is_usable());
        assert!(QualityFlag::from_api("Estimated").is_usable());
        assert!(!QualityFlag::from_api("Suspect").is_usable());
        assert!(!QualityFlag::from_api("").is_usable());
    }
}
