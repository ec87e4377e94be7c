/// End-to-end tests of the three batch stages against an in-memory data source
///
/// These tests verify:
/// 1. Download stage: fetch → daily → depth → quality filter → annual files + summary report
/// 2. Classification stage reads back what download wrote and labels steady trends
/// 3. Consistency stage pairs neighbors and tallies agreement
/// 4. Failing sources and empty stations become sentinel rows, not aborts
///
/// No network access is needed; everything is written to a temporary directory.

use gwtrend_service::config::AppConfig;
use gwtrend_service::ingest::ReadingSource;
use gwtrend_service::model::{QualityFlag, RawReading, SourceError, StationMeta, StationStatus, TrendLabel};
use gwtrend_service::{pipeline, store};

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const ELEVATION: f64 = 100.0;

/// Daily water levels over 12 water years starting 2005-10-01, rising by
/// `level_trend` metres per year with a seasonal cycle. Every day also gets
/// a wild Suspect reading that must never reach the analysis.
fn synthetic_levels(level_trend: f64) -> Vec<RawReading> {
    let start = NaiveDate::from_ymd_opt(2005, 10, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2017, 10, 1).unwrap();
    let days = (end - start).num_days();

    let mut readings = Vec::with_capacity(2 * days as usize);
    for i in 0..days {
        let date = start + Duration::days(i);
        let t = i as f64 / 365.25;
        let noise = 0.01 * ((i * 7919) % 13) as f64;
        readings.push(RawReading {
            timestamp: date.and_hms_opt(9, 0, 0).unwrap(),
            value: 50.0 + level_trend * t + (2.0 * std::f64::consts::PI * t).sin() + noise,
            quality: QualityFlag::Good,
        });
        readings.push(RawReading {
            timestamp: date.and_hms_opt(21, 0, 0).unwrap(),
            value: -999.0,
            quality: QualityFlag::Other,
        });
    }
    readings
}

struct FakeSource {
    responses: HashMap<String, Result<Vec<RawReading>, SourceError>>,
}

impl ReadingSource for FakeSource {
    fn fetch_readings(&self, locator: &str) -> Result<Vec<RawReading>, SourceError> {
        self.responses
            .get(locator)
            .cloned()
            .unwrap_or(Err(SourceError::Http(404)))
    }
}

fn station(id: &str, lat: f64, long: f64, dipped: Option<&str>, logged: Option<&str>) -> StationMeta {
    StationMeta {
        station_id: id.to_string(),
        dipped: dipped.map(String::from),
        logged: logged.map(String::from),
        elevation: ELEVATION,
        latitude: lat,
        longitude: long,
        aquifer: "Chalk".to_string(),
    }
}

fn fixture() -> (FakeSource, Vec<StationMeta>) {
    let short: Vec<RawReading> = synthetic_levels(0.5).into_iter().take(200).collect();
    let responses = [
        ("m/rise", Ok(synthetic_levels(0.5))),
        ("m/rise2", Ok(synthetic_levels(0.3))),
        ("m/rise2-logger", Err(SourceError::Http(503))),
        ("m/fall", Ok(synthetic_levels(-0.4))),
        ("m/short", Ok(short)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let stations = vec![
        station("RISE", 51.000, -1.000, Some("m/rise"), None),
        station("RISE2", 51.010, -1.020, Some("m/rise2"), Some("m/rise2-logger")),
        station("FALL", 51.020, -0.990, None, Some("m/fall")),
        station("SHORT", 51.005, -1.005, Some("m/short"), None),
        station("EMPTY", 51.015, -1.010, None, None),
    ];
    (FakeSource { responses }, stations)
}

fn temp_config() -> (tempfile::TempDir, AppConfig) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = AppConfig::default();
    config.paths.output_dir = dir.path().to_path_buf();
    (dir, config)
}

// ---------------------------------------------------------------------------
// Stage Tests
// ---------------------------------------------------------------------------

#[test]
fn test_download_stage_qualifies_long_records_only() {
    let (_dir, config) = temp_config();
    let (source, stations) = fixture();

    let records = pipeline::run_download(&source, &stations, &config).expect("download stage should complete");
    assert_eq!(records.len(), 5, "every registry station gets a summary row");

    let state = |id: &str| records.iter().find(|r| r.station_id == id).map(|r| r.status.state_label());
    assert_eq!(state("RISE"), Some("qualified"));
    assert_eq!(state("RISE2"), Some("qualified"), "a failing logger must not sink the dipped series");
    assert_eq!(state("FALL"), Some("qualified"));
    assert_eq!(state("SHORT"), Some("insufficient data"));
    assert_eq!(state("EMPTY"), Some("insufficient data"));

    let Some(StationStatus::Qualified(summary)) = records.iter().find(|r| r.station_id == "RISE").map(|r| &r.status)
    else {
        panic!("RISE should be qualified");
    };
    assert_eq!(summary.annual_len, 12);
    assert_eq!(summary.total_years, 12);
    assert_eq!(summary.first_year, NaiveDate::from_ymd_opt(2005, 10, 1).unwrap());
    assert!(summary.max_depth < 60.0, "Suspect -999 readings must have been dropped");

    let annual = store::read_annual(&config.paths.annual_dir(), "RISE").expect("annual file written");
    assert_eq!(annual.len(), 12);
    assert!(store::read_annual(&config.paths.annual_dir(), "SHORT").is_err(), "no file for unqualified stations");

    let rows = store::read_summary_report(&config.paths.summary_report()).unwrap();
    assert_eq!(rows.iter().filter(|r| r.is_qualified()).count(), 3);
}

#[test]
fn test_classification_stage_labels_steady_trends() {
    let (_dir, config) = temp_config();
    let (source, stations) = fixture();
    pipeline::run_download(&source, &stations, &config).unwrap();

    let rows = pipeline::run_classification(&config).expect("classification stage should complete");
    assert_eq!(rows.len(), 3, "only qualified stations are classified");

    let label = |id: &str| rows.iter().find(|r| r.station_id == id).and_then(|r| r.label());
    // Rising water level = falling depth = increasing trend.
    assert_eq!(label("RISE"), Some(TrendLabel::Increasing));
    assert_eq!(label("RISE2"), Some(TrendLabel::Increasing));
    assert_eq!(label("FALL"), Some(TrendLabel::Decreasing));

    let rise = rows.iter().find(|r| r.station_id == "RISE").unwrap();
    let slope = rise.ts_slope.unwrap();
    assert!((slope + 0.5).abs() < 0.05, "depth slope should be about -0.5 m/yr, got {}", slope);
    let (lo, hi) = (rise.slope_low.unwrap(), rise.slope_high.unwrap());
    assert!(lo <= slope && slope <= hi);

    let back = store::read_classification_report(&config.paths.classification_report()).unwrap();
    assert_eq!(back, rows);
}

#[test]
fn test_consistency_stage_tallies_neighbors() {
    let (_dir, config) = temp_config();
    let (source, stations) = fixture();
    pipeline::run_download(&source, &stations, &config).unwrap();
    pipeline::run_classification(&config).unwrap();

    let records = pipeline::run_consistency(&stations, &config).expect("consistency stage should complete");
    assert_eq!(records.len(), 3, "all three steady-trend stations are centers");

    let tally = |id: &str| {
        records
            .iter()
            .find(|r| r.station_id == id)
            .map(|r| (r.neighbors, r.consistent, r.inconsistent))
    };
    assert_eq!(tally("RISE"), Some((2, 1, 1)));
    assert_eq!(tally("RISE2"), Some((2, 1, 1)));
    assert_eq!(tally("FALL"), Some((2, 0, 2)));

    let rows = store::read_consistency_report(&config.paths.consistency_report()).unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_classification_without_summary_report_fails_cleanly() {
    let (_dir, config) = temp_config();
    assert!(pipeline::run_classification(&config).is_err());
}
