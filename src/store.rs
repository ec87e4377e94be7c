/// CSV persistence for per-station annual series and the three reports.
///
/// Each stage hands its results to a single writer here once the batch is
/// done; nothing is appended while stations are still being processed.
/// Column names follow the established report layout so downstream
/// spreadsheets keep working.

use crate::model::{
    AnnualSeries, ClassificationResult, ClassifyError, ConsistencyRecord, SeriesPoint, StationRecord,
    StationStatus, TimeSeries, TrendLabel,
};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Written in place of a label when a station could not be classified.
pub const CLASSIFICATION_FAILED: &str = "classification failed";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Csv(csv::Error),
    Parse(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O error: {}", e),
            StoreError::Csv(e) => write!(f, "Store CSV error: {}", e),
            StoreError::Parse(msg) => write!(f, "Store parse error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<csv::Error> for StoreError {
    fn from(e: csv::Error) -> Self {
        StoreError::Csv(e)
    }
}

// ---------------------------------------------------------------------------
// Generic CSV helpers
// ---------------------------------------------------------------------------

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Writes `rows` to `path` with a header, replacing any existing file.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Annual series files
// ---------------------------------------------------------------------------

/// `{dir}/{station_id}.csv`. Ids that could escape `dir` are rejected.
pub fn annual_path(dir: &Path, station_id: &str) -> Result<PathBuf, StoreError> {
    if station_id.is_empty() || station_id.contains(['/', '\\']) || station_id == ".." {
        return Err(StoreError::Parse(format!("station id '{}' is not a valid file name", station_id)));
    }
    Ok(dir.join(format!("{}.csv", station_id)))
}

/// Persists an annual series as `date,value` rows.
pub fn write_annual(dir: &Path, station_id: &str, series: &AnnualSeries) -> Result<PathBuf, StoreError> {
    let path = annual_path(dir, station_id)?;
    let rows: Vec<SeriesPoint> = series
        .points()
        .iter()
        .map(|p| SeriesPoint { date: p.date, value: p.value })
        .collect();
    write_rows(&path, &rows)?;
    Ok(path)
}

/// Reads an annual series back; `sequence` is re-derived from the dates.
pub fn read_annual(dir: &Path, station_id: &str) -> Result<AnnualSeries, StoreError> {
    let path = annual_path(dir, station_id)?;
    let points: Vec<SeriesPoint> = read_rows(&path)?;
    Ok(AnnualSeries::from_series(&TimeSeries::new(points)))
}

// ---------------------------------------------------------------------------
// Summary report
// ---------------------------------------------------------------------------

/// One row of the station summary report. Statistics are empty unless the
/// station qualified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    #[serde(rename = "No")]
    pub station_id: String,
    pub state: String,
    #[serde(rename = "data amount")]
    pub count: Option<usize>,
    pub mean_depth: Option<f64>,
    pub max_depth: Option<f64>,
    pub min_depth: Option<f64>,
    #[serde(rename = "first year")]
    pub first_year: Option<NaiveDate>,
    #[serde(rename = "last year")]
    pub last_year: Option<NaiveDate>,
    #[serde(rename = "total year")]
    pub total_years: Option<u32>,
    #[serde(rename = "cover year")]
    pub annual_len: Option<usize>,
}

impl SummaryRow {
    pub fn is_qualified(&self) -> bool {
        self.state == "qualified"
    }
}

impl From<&StationRecord> for SummaryRow {
    fn from(record: &StationRecord) -> Self {
        let mut row = SummaryRow {
            station_id: record.station_id.clone(),
            state: record.status.state_label().to_string(),
            count: None,
            mean_depth: None,
            max_depth: None,
            min_depth: None,
            first_year: None,
            last_year: None,
            total_years: None,
            annual_len: None,
        };
        if let StationStatus::Qualified(s) = &record.status {
            row.count = Some(s.count);
            row.mean_depth = Some(s.mean_depth);
            row.max_depth = Some(s.max_depth);
            row.min_depth = Some(s.min_depth);
            row.first_year = Some(s.first_year);
            row.last_year = Some(s.last_year);
            row.total_years = Some(s.total_years);
            row.annual_len = Some(s.annual_len);
        }
        row
    }
}

pub fn write_summary_report(path: &Path, records: &[StationRecord]) -> Result<(), StoreError> {
    let rows: Vec<SummaryRow> = records.iter().map(SummaryRow::from).collect();
    write_rows(path, &rows)
}

pub fn read_summary_report(path: &Path) -> Result<Vec<SummaryRow>, StoreError> {
    read_rows(path)
}

// ---------------------------------------------------------------------------
// Classification report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRow {
    #[serde(rename = "No")]
    pub station_id: String,
    pub classification: String,
    pub ts_slope: Option<f64>,
    pub slope_low: Option<f64>,
    pub slope_high: Option<f64>,
    #[serde(rename = "pw_R2")]
    pub r_squared: Option<f64>,
    pub windows: Option<u32>,
    #[serde(rename = "start year")]
    pub start_year: Option<NaiveDate>,
    #[serde(rename = "end year")]
    pub end_year: Option<NaiveDate>,
}

impl ClassificationRow {
    pub fn from_outcome(station_id: &str, outcome: &Result<ClassificationResult, ClassifyError>) -> Self {
        match outcome {
            Ok(result) => ClassificationRow {
                station_id: station_id.to_string(),
                classification: result.label.as_str().to_string(),
                ts_slope: Some(result.slope),
                slope_low: result.slope_bounds.map(|(lo, _)| lo),
                slope_high: result.slope_bounds.map(|(_, hi)| hi),
                r_squared: result.step.as_ref().map(|s| s.r_squared),
                windows: result.step.as_ref().map(|s| s.window_years),
                start_year: result.step.as_ref().map(|s| s.start_year),
                end_year: result.step.as_ref().map(|s| s.end_year),
            },
            Err(_) => Self::failed(station_id),
        }
    }

    /// Sentinel row for a station that could not be classified.
    pub fn failed(station_id: &str) -> Self {
        ClassificationRow {
            station_id: station_id.to_string(),
            classification: CLASSIFICATION_FAILED.to_string(),
            ts_slope: None,
            slope_low: None,
            slope_high: None,
            r_squared: None,
            windows: None,
            start_year: None,
            end_year: None,
        }
    }

    /// `None` for the failure sentinel or an unrecognised label.
    pub fn label(&self) -> Option<TrendLabel> {
        self.classification.parse().ok()
    }
}

pub fn write_classification_report(path: &Path, rows: &[ClassificationRow]) -> Result<(), StoreError> {
    write_rows(path, rows)
}

pub fn read_classification_report(path: &Path) -> Result<Vec<ClassificationRow>, StoreError> {
    read_rows(path)
}

// ---------------------------------------------------------------------------
// Consistency report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyRow {
    #[serde(rename = "No")]
    pub station_id: String,
    #[serde(rename = "Num of station")]
    pub neighbors: usize,
    #[serde(rename = "Num of consistent")]
    pub consistent: usize,
    #[serde(rename = "Num of inconsistent")]
    pub inconsistent: usize,
}

impl From<&ConsistencyRecord> for ConsistencyRow {
    fn from(r: &ConsistencyRecord) -> Self {
        ConsistencyRow {
            station_id: r.station_id.clone(),
            neighbors: r.neighbors,
            consistent: r.consistent,
            inconsistent: r.inconsistent,
        }
    }
}

pub fn write_consistency_report(path: &Path, records: &[ConsistencyRecord]) -> Result<(), StoreError> {
    let rows: Vec<ConsistencyRow> = records.iter().map(ConsistencyRow::from).collect();
    write_rows(path, &rows)
}

pub fn read_consistency_report(path: &Path) -> Result<Vec<ConsistencyRow>, StoreError> {
    read_rows(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
