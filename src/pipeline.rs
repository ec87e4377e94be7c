/// Per-station pipeline and the three batch stages.
///
/// - `download`: fetch → daily means → depth → quality filter → annual
///   series → qualification. Writes one annual file per qualified station
///   and the summary report.
/// - `classify`: reads the summary report, classifies every qualified
///   station's annual series, writes the classification report.
/// - `consistency`: reads both reports plus the registry, scores every
///   eligible station against its neighbors, writes the consistency report.
///
/// Per-station failures never cross into the batch loop: they become a
/// sentinel row and the loop moves on. Only report I/O aborts a stage.

use crate::analysis::classify::{classify, years_spanned};
use crate::analysis::quality::{quality_control, QualityReport};
use crate::analysis::resample::{annual_series, daily_means, merge_daily, to_depth};
use crate::analysis::spatial::{score_all, SpatialCandidate};
use crate::config::{AppConfig, QualificationConfig};
use crate::ingest::ReadingSource;
use crate::logging::{self, Component};
use crate::model::{
    AnnualSeries, ConsistencyRecord, DailySeries, StationMeta, StationRecord, StationStatus, StationSummary,
};
use crate::store::{self, ClassificationRow, StoreError};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Per-station processing
// ---------------------------------------------------------------------------

/// Everything the download stage learns about one station.
#[derive(Debug, Clone)]
pub struct StationOutcome {
    pub record: StationRecord,
    /// Present only for qualified stations.
    pub annual: Option<AnnualSeries>,
    pub quality: QualityReport,
    /// Locators whose fetch failed and were treated as empty.
    pub failed_sources: usize,
}

/// Fetches every locator of `station` and merges the daily means. A failed
/// source contributes nothing; the remaining sources still count.
pub fn fetch_station_levels<S: ReadingSource>(source: &S, station: &StationMeta) -> (DailySeries, usize) {
    let mut daily = Vec::new();
    let mut failed = 0;
    for locator in station.locators() {
        match source.fetch_readings(locator) {
            Ok(readings) => {
                logging::debug(
                    Component::Source,
                    Some(&station.station_id),
                    &format!("{} readings from {}", readings.len(), locator),
                );
                daily.push(daily_means(&readings));
            }
            Err(e) => {
                logging::log_source_failure(&station.station_id, locator, &e);
                failed += 1;
            }
        }
    }
    (merge_daily(&daily), failed)
}

/// Applies the qualification rules to a cleaned daily series and its
/// annual aggregate.
pub fn qualify(cleaned: &DailySeries, annual: &AnnualSeries, config: &QualificationConfig) -> StationStatus {
    if cleaned.len() <= config.min_daily_points || annual.len() <= config.min_annual_points {
        return StationStatus::InsufficientData;
    }
    let annual_mean = annual.mean().unwrap_or(0.0);
    if config.require_positive_mean_depth && annual_mean <= 0.0 {
        return StationStatus::NegativeMeanDepth;
    }

    match summarize(cleaned, annual) {
        Some(s) => StationStatus::Qualified(s),
        None => StationStatus::InsufficientData,
    }
}

fn summarize(cleaned: &DailySeries, annual: &AnnualSeries) -> Option<StationSummary> {
    let first_year = annual.first_date()?;
    let last_year = annual.last_date()?;
    Some(StationSummary {
        count: cleaned.len(),
        mean_depth: cleaned.mean()?,
        max_depth: cleaned.max()?,
        min_depth: cleaned.min()?,
        first_year,
        last_year,
        total_years: years_spanned(first_year, last_year),
        annual_len: annual.len(),
    })
}

/// Runs the download-side pipeline for one station.
pub fn process_station<S: ReadingSource>(source: &S, station: &StationMeta, config: &AppConfig) -> StationOutcome {
    let id = station.station_id.as_str();
    let (levels, failed_sources) = fetch_station_levels(source, station);
    let depths = to_depth(&levels, station.elevation);

    let (cleaned, quality) = quality_control(&depths, &config.quality);
    logging::debug(
        Component::Quality,
        Some(id),
        &format!(
            "{} daily rows: {} flat-run, {} z-score, {} range-variation removed",
            quality.input_len, quality.flat_run_removed, quality.outliers_removed, quality.range_removed
        ),
    );
    for year in quality.removed_years() {
        logging::debug(
            Component::Quality,
            Some(id),
            &format!("water year {} removed (RVI {:.3})", year.water_year, year.rvi),
        );
    }

    let annual = annual_series(&cleaned);
    let status = qualify(&cleaned, &annual, &config.qualification);
    logging::info(Component::Quality, Some(id), &format!("state: {}", status.state_label()));

    StationOutcome {
        annual: status.is_qualified().then_some(annual),
        record: StationRecord { station_id: station.station_id.clone(), status },
        quality,
        failed_sources,
    }
}

// ---------------------------------------------------------------------------
// Batch stages
// ---------------------------------------------------------------------------

/// Download stage over the whole registry.
pub fn run_download<S: ReadingSource>(
    source: &S,
    stations: &[StationMeta],
    config: &AppConfig,
) -> Result<Vec<StationRecord>, StoreError> {
    let annual_dir = config.paths.annual_dir();
    std::fs::create_dir_all(&annual_dir)?;

    let mut records = Vec::with_capacity(stations.len());
    let mut qualified = 0;
    let (mut locators, mut failed_locators) = (0, 0);
    for station in stations {
        let mut outcome = process_station(source, station, config);
        locators += station.locators().count();
        failed_locators += outcome.failed_sources;
        if let Some(annual) = &outcome.annual {
            match store::write_annual(&annual_dir, &station.station_id, annual) {
                Ok(_) => qualified += 1,
                Err(e) => {
                    logging::error(
                        Component::Store,
                        Some(&station.station_id),
                        &format!("annual series not written: {}", e),
                    );
                    outcome.record.status = StationStatus::InsufficientData;
                }
            }
        }
        records.push(outcome.record);
    }

    store::write_summary_report(&config.paths.summary_report(), &records)?;
    logging::log_download_summary(records.len(), qualified, locators, failed_locators);
    Ok(records)
}

/// Classification stage over every qualified station of the summary report.
pub fn run_classification(config: &AppConfig) -> Result<Vec<ClassificationRow>, StoreError> {
    let summary = store::read_summary_report(&config.paths.summary_report())?;
    let annual_dir = config.paths.annual_dir();

    let mut rows = Vec::new();
    for entry in summary.iter().filter(|r| r.is_qualified()) {
        let id = entry.station_id.as_str();
        let row = match store::read_annual(&annual_dir, id) {
            Ok(series) => {
                let outcome = classify(&series, &config.classifier);
                match &outcome {
                    Ok(result) => {
                        if let Some(e) = &result.fit_error {
                            logging::debug(Component::Classifier, Some(id), &format!("step fit skipped: {}", e));
                        }
                        logging::info(
                            Component::Classifier,
                            Some(id),
                            &format!("{} (slope {:.4})", result.label, result.slope),
                        );
                    }
                    Err(e) => logging::warn(Component::Classifier, Some(id), &format!("not classified: {}", e)),
                }
                ClassificationRow::from_outcome(id, &outcome)
            }
            Err(e) => {
                logging::error(Component::Store, Some(id), &format!("annual series unreadable: {}", e));
                ClassificationRow::failed(id)
            }
        };
        rows.push(row);
    }

    store::write_classification_report(&config.paths.classification_report(), &rows)?;
    let failed = rows.iter().filter(|r| r.label().is_none()).count();
    logging::log_batch_summary(Component::Classifier, "Classification", rows.len(), rows.len() - failed, failed);
    Ok(rows)
}

/// Joins the registry, summary report and classification report into
/// spatial candidates. Stations missing from either report are dropped.
pub fn spatial_candidates(
    stations: &[StationMeta],
    summary: &[store::SummaryRow],
    classification: &[ClassificationRow],
) -> Vec<SpatialCandidate> {
    let total_years: HashMap<&str, u32> = summary
        .iter()
        .filter(|r| r.is_qualified())
        .filter_map(|r| Some((r.station_id.as_str(), r.total_years?)))
        .collect();
    let labels: HashMap<&str, _> = classification
        .iter()
        .filter_map(|r| Some((r.station_id.as_str(), r.label()?)))
        .collect();

    stations
        .iter()
        .filter_map(|s| {
            let id = s.station_id.as_str();
            Some(SpatialCandidate {
                station_id: s.station_id.clone(),
                latitude: s.latitude,
                longitude: s.longitude,
                aquifer: s.aquifer.clone(),
                label: *labels.get(id)?,
                total_years: *total_years.get(id)?,
            })
        })
        .collect()
}

/// Consistency stage. Annual series are loaded once for every candidate.
pub fn run_consistency(stations: &[StationMeta], config: &AppConfig) -> Result<Vec<ConsistencyRecord>, StoreError> {
    let summary = store::read_summary_report(&config.paths.summary_report())?;
    let classification = store::read_classification_report(&config.paths.classification_report())?;
    let candidates = spatial_candidates(stations, &summary, &classification);

    let annual_dir = config.paths.annual_dir();
    let mut series = HashMap::new();
    for candidate in &candidates {
        match store::read_annual(&annual_dir, &candidate.station_id) {
            Ok(s) => {
                series.insert(candidate.station_id.clone(), s);
            }
            Err(e) => logging::warn(
                Component::Spatial,
                Some(&candidate.station_id),
                &format!("annual series unreadable, station skipped: {}", e),
            ),
        }
    }

    let records = score_all(&candidates, &series, &config.spatial, &config.classifier);
    for r in &records {
        logging::debug(
            Component::Spatial,
            Some(&r.station_id),
            &format!("{} neighbors: {} consistent, {} inconsistent", r.neighbors, r.consistent, r.inconsistent),
        );
    }

    store::write_consistency_report(&config.paths.consistency_report(), &records)?;
    let with_neighbors = records.iter().filter(|r| r.neighbors > 0).count();
    logging::info(
        Component::Spatial,
        None,
        &format!("Consistency complete: {} stations scored, {} with neighbors", records.len(), with_neighbors),
    );
    Ok(records)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
