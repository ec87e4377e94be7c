//! Spatial consistency of trends among nearby wells.
//!
//! For every eligible center station, neighbors are found by a coarse
//! lat/long box, then by true great-circle distance and a shared aquifer.
//! Each pair is re-classified over its common time window and tallied as
//! consistent or inconsistent.

use crate::analysis::classify::classify;
use crate::config::{ClassifierConfig, SpatialConfig};
use crate::model::{
    AnnualSeries, ClassificationResult, ClassifyError, ConsistencyRecord, TrendLabel, UNALLOCATED_AQUIFER,
};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Mean Earth radius (IUGG), km.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Haversine great-circle distance in kilometers.
pub fn great_circle_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// A station as seen by the spatial scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialCandidate {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub aquifer: String,
    /// Full-record label from the classification stage.
    pub label: TrendLabel,
    pub total_years: u32,
}

/// Only steady trends over a long enough record take part.
pub fn is_eligible(candidate: &SpatialCandidate, config: &SpatialConfig) -> bool {
    candidate.total_years > config.min_total_years && candidate.label.is_gradual()
}

/// Strict coarse box around the center.
fn in_bounding_box(center: &SpatialCandidate, other: &SpatialCandidate, config: &SpatialConfig) -> bool {
    other.latitude > center.latitude - config.lat_window_deg
        && other.latitude < center.latitude + config.lat_window_deg
        && other.longitude > center.longitude - config.long_window_deg
        && other.longitude < center.longitude + config.long_window_deg
}

fn same_aquifer(center: &SpatialCandidate, other: &SpatialCandidate) -> bool {
    center.aquifer != UNALLOCATED_AQUIFER && center.aquifer == other.aquifer
}

/// Neighbors of `center` among `candidates` (the center itself excluded).
pub fn neighbors<'a>(
    center: &SpatialCandidate,
    candidates: &'a [SpatialCandidate],
    config: &SpatialConfig,
) -> Vec<&'a SpatialCandidate> {
    candidates
        .iter()
        .filter(|c| c.station_id != center.station_id)
        .filter(|c| in_bounding_box(center, c, config))
        .filter(|c| {
            great_circle_km(center.latitude, center.longitude, c.latitude, c.longitude) <= config.max_distance_km
        })
        .filter(|c| same_aquifer(center, c))
        .collect()
}

/// Overlapping date range `[max(first), min(last)]`, if non-empty.
pub fn common_window(a: &AnnualSeries, b: &AnnualSeries) -> Option<(NaiveDate, NaiveDate)> {
    let start = a.first_date()?.max(b.first_date()?);
    let end = a.last_date()?.min(b.last_date()?);
    (start <= end).then_some((start, end))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairVerdict {
    Consistent,
    Inconsistent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Scored(PairVerdict),
    /// One of the restricted series has too few points; not counted.
    ShortOverlap,
    /// Re-classification failed on the restricted window; not counted.
    Failed(ClassifyError),
}

/// Consistent if either side shows no trend or the slopes share a sign.
pub fn agreement(a: &ClassificationResult, b: &ClassificationResult) -> PairVerdict {
    if a.label == TrendLabel::NoTrend || b.label == TrendLabel::NoTrend || a.slope * b.slope > 0.0 {
        PairVerdict::Consistent
    } else {
        PairVerdict::Inconsistent
    }
}

/// Scores one pair over its common window.
pub fn score_pair(
    a: &AnnualSeries,
    b: &AnnualSeries,
    spatial: &SpatialConfig,
    classifier: &ClassifierConfig,
) -> PairOutcome {
    let Some((start, end)) = common_window(a, b) else {
        return PairOutcome::ShortOverlap;
    };
    let a = a.restrict(start, end);
    let b = b.restrict(start, end);
    if a.len() <= spatial.min_overlap_points || b.len() <= spatial.min_overlap_points {
        return PairOutcome::ShortOverlap;
    }
    match (classify(&a, classifier), classify(&b, classifier)) {
        (Ok(ra), Ok(rb)) => PairOutcome::Scored(agreement(&ra, &rb)),
        (Err(e), _) | (_, Err(e)) => PairOutcome::Failed(e),
    }
}

/// Tallies every scored neighbor of `center`. Neighbors whose series is
/// missing from `series` are skipped.
pub fn score_station(
    center: &SpatialCandidate,
    candidates: &[SpatialCandidate],
    series: &HashMap<String, AnnualSeries>,
    spatial: &SpatialConfig,
    classifier: &ClassifierConfig,
) -> ConsistencyRecord {
    let mut record = ConsistencyRecord {
        station_id: center.station_id.clone(),
        neighbors: 0,
        consistent: 0,
        inconsistent: 0,
    };
    let Some(center_series) = series.get(&center.station_id) else {
        return record;
    };

    for neighbor in neighbors(center, candidates, spatial) {
        let Some(neighbor_series) = series.get(&neighbor.station_id) else {
            continue;
        };
        if let PairOutcome::Scored(verdict) = score_pair(center_series, neighbor_series, spatial, classifier) {
            record.neighbors += 1;
            match verdict {
                PairVerdict::Consistent => record.consistent += 1,
                PairVerdict::Inconsistent => record.inconsistent += 1,
            }
        }
    }
    record
}

/// Filters `candidates` to eligible stations and scores each one against
/// the others.
pub fn score_all(
    candidates: &[SpatialCandidate],
    series: &HashMap<String, AnnualSeries>,
    spatial: &SpatialConfig,
    classifier: &ClassifierConfig,
) -> Vec<ConsistencyRecord> {
    let eligible: Vec<SpatialCandidate> = candidates
        .iter()
        .filter(|c| is_eligible(c, spatial))
        .cloned()
        .collect();
    eligible
        .iter()
        .map(|center| score_station(center, &eligible, series, spatial, classifier))
        .collect()
}
